//! Format conversion
//!
//! Decode the input, re-encode it in the requested format, store the result.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::decode::{self, DecodeError};
use crate::state::{Category, ContentStore, StoreError, StoredFile};

/// JPEG quality used for every lossy conversion
const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unsupported target format: {0}")]
    UnsupportedTarget(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Conversion failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Conversion failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Formats a file can be converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Jpeg,
    Png,
    WebP,
    Bmp,
    Gif,
    Tiff,
}

impl TargetFormat {
    /// Parse the `format` form field
    pub fn parse(value: &str) -> Result<Self, ConvertError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(TargetFormat::Jpeg),
            "png" => Ok(TargetFormat::Png),
            "webp" => Ok(TargetFormat::WebP),
            "bmp" => Ok(TargetFormat::Bmp),
            "gif" => Ok(TargetFormat::Gif),
            "tif" | "tiff" => Ok(TargetFormat::Tiff),
            other => Err(ConvertError::UnsupportedTarget(other.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Png => "png",
            TargetFormat::WebP => "webp",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Gif => "gif",
            TargetFormat::Tiff => "tiff",
        }
    }

    /// Upper-case name reported back to clients
    pub fn label(&self) -> String {
        self.extension().to_ascii_uppercase()
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            TargetFormat::Jpeg => ImageFormat::Jpeg,
            TargetFormat::Png => ImageFormat::Png,
            TargetFormat::WebP => ImageFormat::WebP,
            TargetFormat::Bmp => ImageFormat::Bmp,
            TargetFormat::Gif => ImageFormat::Gif,
            TargetFormat::Tiff => ImageFormat::Tiff,
        }
    }
}

/// Convert `input` to `target` and store the result.
///
/// Nothing is left in the store when decoding or encoding fails.
pub fn convert(
    store: &ContentStore,
    input: &Path,
    target: TargetFormat,
) -> Result<StoredFile, ConvertError> {
    let img = decode::open_image(input)?;

    let pending = store.reserve(Category::Converted, "converted", target.extension());
    encode(&img, target, pending.path())?;
    let stored = store.commit(pending)?;

    info!(
        id = %stored.id,
        format = target.extension(),
        width = stored.width,
        height = stored.height,
        "converted image"
    );
    Ok(stored)
}

/// Encode `img` into `path` with the fixed per-format settings
fn encode(img: &DynamicImage, target: TargetFormat, path: &Path) -> Result<(), ConvertError> {
    let mut writer = BufWriter::new(File::create(path)?);

    match target {
        TargetFormat::Jpeg => {
            // JPEG has no alpha and no 16-bit samples
            let rgb = img.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)?;
        }
        TargetFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut writer, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        TargetFormat::WebP => {
            // The bundled WebP encoder is lossless only
            let rgba = img.to_rgba8();
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut writer))?;
        }
        TargetFormat::Gif | TargetFormat::Bmp => {
            img.to_rgba8().write_to(&mut writer, target.image_format())?;
        }
        TargetFormat::Tiff => {
            // The TIFF encoder needs Seek, which BufWriter<File> provides
            img.write_to(&mut writer, target.image_format())?;
        }
    }

    writer.flush()?;
    Ok(())
}
