//! RAW sensor data loader
//!
//! Loads the actual sensor data from RAW files (not embedded JPEGs) and
//! renders it at half resolution: every 2x2 Bayer cell becomes one RGB
//! pixel, so no interpolation is needed.
use image::{Rgb, RgbImage};
use std::path::Path;

/// Display gamma applied to the linear sensor values
const GAMMA: f32 = 1.0 / 2.2;

/// Decode a RAW file's sensor data into an 8-bit sRGB-ish image
pub fn decode_sensor(path: &Path) -> Result<RgbImage, String> {
    let raw_image = rawloader::decode_file(path)
        .map_err(|e| format!("Failed to decode RAW: {:?}", e))?;

    let width = raw_image.width;
    let height = raw_image.height;
    let cpp = raw_image.cpp.max(1);

    // Normalize everything to 0.0-1.0 linear values
    let black = raw_image.blacklevels[0] as f32;
    let range = (raw_image.whitelevels[0] as f32 - black).max(1.0);
    let values: Vec<f32> = match &raw_image.data {
        rawloader::RawImageData::Integer(values) => values
            .iter()
            .map(|&v| ((v as f32 - black) / range).clamp(0.0, 1.0))
            .collect(),
        rawloader::RawImageData::Float(values) => {
            values.iter().map(|&v| v.clamp(0.0, 1.0)).collect()
        }
    };

    if values.len() < width * height * cpp {
        return Err(format!(
            "Sensor data too short: {} values for {}x{}x{}",
            values.len(),
            width,
            height,
            cpp
        ));
    }

    let wb = normalized_white_balance(raw_image.wb_coeffs);

    // Already-demosaiced (linear RGB) files
    if cpp >= 3 {
        let img = RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let base = (y as usize * width + x as usize) * cpp;
            to_pixel([
                values[base] * wb[0],
                values[base + 1] * wb[1],
                values[base + 2] * wb[2],
            ])
        });
        return Ok(img);
    }

    let out_width = width / 2;
    let out_height = height / 2;
    if out_width == 0 || out_height == 0 {
        return Err(format!("RAW image too small: {}x{}", width, height));
    }

    let img = RgbImage::from_fn(out_width as u32, out_height as u32, |x, y| {
        let mut sums = [0.0f32; 3];
        let mut counts = [0u32; 3];

        for dy in 0..2 {
            for dx in 0..2 {
                let row = y as usize * 2 + dy;
                let col = x as usize * 2 + dx;
                // 0 = R, 1 = G, 2 = B, 3 = second green / emerald
                let channel = raw_image.cfa.color_at(row, col).min(3);
                let channel = if channel == 3 { 1 } else { channel };
                sums[channel] += values[row * width + col];
                counts[channel] += 1;
            }
        }

        let mut rgb = [0.0f32; 3];
        for c in 0..3 {
            if counts[c] > 0 {
                rgb[c] = sums[c] / counts[c] as f32 * wb[c];
            }
        }
        to_pixel(rgb)
    });

    Ok(img)
}

/// Normalize as-shot white balance so green = 1.0.
/// Missing or broken coefficients fall back to neutral.
fn normalized_white_balance(coeffs: [f32; 4]) -> [f32; 3] {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !(valid(coeffs[0]) && valid(coeffs[1]) && valid(coeffs[2])) {
        return [1.0, 1.0, 1.0];
    }

    let g_ref = coeffs[1];
    [coeffs[0] / g_ref, 1.0, coeffs[2] / g_ref]
}

fn to_pixel(linear: [f32; 3]) -> Rgb<u8> {
    let encode = |v: f32| (v.clamp(0.0, 1.0).powf(GAMMA) * 255.0).round() as u8;
    Rgb([encode(linear[0]), encode(linear[1]), encode(linear[2])])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_fails() {
        let result = decode_sensor(Path::new("/nonexistent/path.nef"));
        assert!(result.is_err());
    }

    #[test]
    fn test_white_balance_normalization() {
        assert_eq!(normalized_white_balance([2.0, 1.0, 1.5, f32::NAN]), [2.0, 1.0, 1.5]);
        assert_eq!(normalized_white_balance([4.0, 2.0, 3.0, 2.0]), [2.0, 1.0, 1.5]);
        assert_eq!(normalized_white_balance([f32::NAN, 1.0, 1.0, 1.0]), [1.0, 1.0, 1.0]);
        assert_eq!(normalized_white_balance([0.0, 0.0, 0.0, 0.0]), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_to_pixel_clamps() {
        assert_eq!(to_pixel([0.0, 1.0, 2.0]), Rgb([0, 255, 255]));
        assert_eq!(to_pixel([-1.0, 0.0, 0.0]), Rgb([0, 0, 0]));
    }
}
