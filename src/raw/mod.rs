/// Camera RAW decoding
///
/// This module handles:
/// - Extracting the largest embedded JPEG preview from a RAW file (preview.rs)
/// - Decoding the sensor data itself when no usable preview exists (loader.rs)

pub mod loader;
pub mod preview;

use image::{DynamicImage, ImageFormat};
use std::path::Path;
use tracing::debug;

use crate::decode::DecodeError;

/// Decode a camera RAW file into a displayable image.
///
/// Tier 1 is the camera's own full-size JPEG preview (fast, already
/// rendered). Tier 2 demosaics the sensor data at half resolution.
pub fn decode(path: &Path) -> Result<DynamicImage, DecodeError> {
    let data = std::fs::read(path)?;

    if let Some(jpeg) = preview::largest_embedded_jpeg(&data) {
        debug!(bytes = jpeg.len(), "using embedded RAW preview");
        return Ok(image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?);
    }

    debug!("no embedded preview, decoding sensor data");
    loader::decode_sensor(path)
        .map(DynamicImage::ImageRgb8)
        .map_err(DecodeError::Raw)
}
