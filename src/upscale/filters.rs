//! Pixel filters used by the fallback upscaler
//!
//! Both filters clamp at the image border (edge pixels are repeated), so
//! the output keeps the input's exact dimensions.

use image::{Rgb, RgbImage};

/// 3x3 sharpening kernel (sums to 1, so flat areas are unchanged)
pub const SHARPEN_KERNEL: [[f32; 3]; 3] = [
    [-1.0, -1.0, -1.0],
    [-1.0, 9.0, -1.0],
    [-1.0, -1.0, -1.0],
];

/// Settings of the non-local-means denoiser
#[derive(Debug, Clone, Copy)]
pub struct DenoiseParams {
    /// Filter strength; larger removes more noise (and more detail)
    pub strength: f32,
    /// Radius of the patch compared around each pixel
    pub patch_radius: u32,
    /// Radius of the neighbourhood searched for similar patches
    pub search_radius: u32,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        Self {
            strength: 10.0,
            patch_radius: 1,
            search_radius: 3,
        }
    }
}

fn clamp_coord(v: i64, max: u32) -> u32 {
    v.clamp(0, max as i64 - 1) as u32
}

/// Convolve every channel with a 3x3 kernel. Kept over `imageops::filter3x3`
/// because edge samples are clamped here, so the one-pixel border is sharpened too.
pub fn convolve3x3(img: &RgbImage, kernel: &[[f32; 3]; 3]) -> RgbImage {
    let (width, height) = img.dimensions();

    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0.0f32; 3];
        for (ky, row) in kernel.iter().enumerate() {
            for (kx, weight) in row.iter().enumerate() {
                let sx = clamp_coord(x as i64 + kx as i64 - 1, width);
                let sy = clamp_coord(y as i64 + ky as i64 - 1, height);
                let p = img.get_pixel(sx, sy);
                for c in 0..3 {
                    acc[c] += p[c] as f32 * weight;
                }
            }
        }
        Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}

/// Sharpen with [`SHARPEN_KERNEL`]
pub fn sharpen(img: &RgbImage) -> RgbImage {
    convolve3x3(img, &SHARPEN_KERNEL)
}

/// Colour non-local-means denoising.
///
/// Each output pixel is a weighted mean of the pixels in its search window;
/// the weight falls off with the mean squared difference between the two
/// pixels' surrounding patches, across all three channels.
pub fn denoise(img: &RgbImage, params: DenoiseParams) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let pr = params.patch_radius as i64;
    let sr = params.search_radius as i64;
    let patch_len = ((2 * pr + 1) * (2 * pr + 1) * 3) as f32;
    let h2 = params.strength.max(f32::EPSILON).powi(2);

    // Edge-padded float copy so the inner loops need no clamping
    let pad = pr + sr;
    let padded_width = width as i64 + 2 * pad;
    let padded_height = height as i64 + 2 * pad;
    let mut padded = Vec::with_capacity((padded_width * padded_height * 3) as usize);
    for y in 0..padded_height {
        for x in 0..padded_width {
            let p = img.get_pixel(clamp_coord(x - pad, width), clamp_coord(y - pad, height));
            padded.extend(p.0.iter().map(|&v| v as f32));
        }
    }
    let idx = |x: i64, y: i64| (((y + pad) * padded_width + (x + pad)) * 3) as usize;

    RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let mut acc = [0.0f32; 3];
        let mut total = 0.0f32;

        for dy in -sr..=sr {
            for dx in -sr..=sr {
                let (qx, qy) = (x + dx, y + dy);

                let mut dist = 0.0f32;
                for py in -pr..=pr {
                    let a = idx(x - pr, y + py);
                    let b = idx(qx - pr, qy + py);
                    let run = ((2 * pr + 1) * 3) as usize;
                    for (va, vb) in padded[a..a + run].iter().zip(&padded[b..b + run]) {
                        let d = va - vb;
                        dist += d * d;
                    }
                }

                let weight = (-(dist / patch_len) / h2).exp();
                let q = idx(qx, qy);
                for c in 0..3 {
                    acc[c] += padded[q + c] * weight;
                }
                total += weight;
            }
        }

        // The centre pixel always contributes weight 1, so total >= 1
        Rgb(acc.map(|v| (v / total).round().clamp(0.0, 255.0) as u8))
    })
}
