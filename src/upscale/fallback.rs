//! In-process fallback upscaler
//!
//! Fixed pipeline: decode, Lanczos resize to exactly 4x, 3x3 sharpen,
//! colour non-local-means denoise, PNG encode. No further fallback exists:
//! any failure here is the request's failure.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::ImageFormat;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::filters::{self, DenoiseParams};
use super::{Method, UpscaleError, UpscaleRequest, UpscaleResult, UpscaleStrategy};
use crate::config::SCALE_FACTOR;
use crate::decode;
use crate::state::{Category, ContentStore};

pub struct EnhancedFallback {
    store: Arc<ContentStore>,
    params: FallbackParams,
}

/// Knobs of one fallback run
#[derive(Debug, Clone, Copy)]
pub struct FallbackParams {
    /// Largest output, in pixels, the pipeline will allocate for
    pub max_output_pixels: u64,
    pub denoise: DenoiseParams,
}

impl FallbackParams {
    pub fn with_limit(max_output_pixels: u64) -> Self {
        Self {
            max_output_pixels,
            denoise: DenoiseParams::default(),
        }
    }
}

impl EnhancedFallback {
    pub fn new(store: Arc<ContentStore>, max_output_pixels: u64) -> Self {
        Self {
            store,
            params: FallbackParams::with_limit(max_output_pixels),
        }
    }
}

#[async_trait]
impl UpscaleStrategy for EnhancedFallback {
    fn method(&self) -> Method {
        Method::Fallback
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleResult, UpscaleError> {
        let store = Arc::clone(&self.store);
        let input = request.input.clone();
        let params = self.params;

        // Spawn blocking because the pixel work is CPU-intensive
        tokio::task::spawn_blocking(move || upscale_blocking(&store, &input, params))
            .await
            .map_err(|e| UpscaleError::Processing(format!("Task join error: {}", e)))?
    }
}

/// Blocking implementation of the fallback pipeline
pub fn upscale_blocking(
    store: &ContentStore,
    input: &Path,
    params: FallbackParams,
) -> Result<UpscaleResult, UpscaleError> {
    // Step 1: Decode
    let img = decode::open_image(input)?;
    let (width, height) = (img.width(), img.height());

    // Checked before any buffer is sized from the target; the filters hold
    // several copies of the output at once
    let output_pixels = u64::from(width) * u64::from(height) * u64::from(SCALE_FACTOR * SCALE_FACTOR);
    let too_large = || UpscaleError::TooLarge {
        width,
        height,
        limit: params.max_output_pixels,
    };
    if output_pixels > params.max_output_pixels {
        return Err(too_large());
    }
    let (Some(target_width), Some(target_height)) = (
        width.checked_mul(SCALE_FACTOR),
        height.checked_mul(SCALE_FACTOR),
    ) else {
        return Err(too_large());
    };

    info!(width, height, target_width, target_height, "running fallback upscaler");

    // Step 2: Resize with a Lanczos kernel
    let upscaled = imageops::resize(&img.to_rgb8(), target_width, target_height, FilterType::Lanczos3);

    // Step 3: Counteract resampling blur
    let sharpened = filters::sharpen(&upscaled);

    // Step 4: Suppress the noise sharpening amplified
    let denoised = filters::denoise(&sharpened, params.denoise);

    // Step 5: Encode losslessly into a fresh store entry
    let pending = store.reserve(Category::Upscaled, "upscaled_enhanced", "png");
    denoised
        .save_with_format(pending.path(), ImageFormat::Png)
        .map_err(|e| UpscaleError::Processing(e.to_string()))?;
    let stored = store.commit(pending)?;

    if (stored.width, stored.height) != (target_width, target_height) {
        if let Err(e) = store.delete(&stored.id) {
            warn!(id = %stored.id, error = %e, "failed to remove mis-sized fallback output");
        }
        return Err(UpscaleError::Processing(format!(
            "expected {}x{} output, got {}x{}",
            target_width, target_height, stored.width, stored.height
        )));
    }

    info!(id = %stored.id, width = stored.width, height = stored.height, "fallback upscaler finished");

    Ok(UpscaleResult {
        output: stored,
        method: Method::Fallback,
        scale_factor: SCALE_FACTOR,
    })
}
