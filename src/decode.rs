//! Input decoding shared by conversion and the fallback upscaler
//!
//! Raster formats go straight through the `image` crate. HEIC/HEIF has no
//! decoder linked in, and camera RAW depends on the `camera-raw` feature;
//! both report a distinct "missing capability" error when unavailable.

use image::{DynamicImage, ImageReader};
use std::path::Path;
use thiserror::Error;

/// Upload extensions the service accepts (lowercase, without the dot)
pub const ACCEPTED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "bmp", "heic", "heif",
    // Camera RAW
    "dng", "nef", "cr2", "arw", "raf", "orf", "rw2",
];

const HEIF_EXTENSIONS: &[&str] = &["heic", "heif"];
const CAMERA_RAW_EXTENSIONS: &[&str] = &["dng", "nef", "cr2", "arw", "raf", "orf", "rw2"];

#[derive(Error, Debug)]
pub enum DecodeError {
    /// The input family needs a decoder this build doesn't have
    #[error("{0} input is not supported by this deployment")]
    MissingCapability(&'static str),

    #[error("Failed to read image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to decode RAW: {0}")]
    Raw(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How an input file has to be decoded, judged by its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Raster,
    Heif,
    CameraRaw,
}

/// Lowercase extension of a file name, if any
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether an uploaded file name has an accepted extension
pub fn is_accepted(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn input_kind(path: &Path) -> InputKind {
    let ext = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(extension_of)
        .unwrap_or_default();

    if HEIF_EXTENSIONS.contains(&ext.as_str()) {
        InputKind::Heif
    } else if CAMERA_RAW_EXTENSIONS.contains(&ext.as_str()) {
        InputKind::CameraRaw
    } else {
        InputKind::Raster
    }
}

/// Check up front whether this build can decode `path` at all
pub fn ensure_supported(path: &Path) -> Result<InputKind, DecodeError> {
    match input_kind(path) {
        InputKind::Heif => Err(DecodeError::MissingCapability("HEIC/HEIF")),
        #[cfg(not(feature = "camera-raw"))]
        InputKind::CameraRaw => Err(DecodeError::MissingCapability("Camera RAW")),
        kind => Ok(kind),
    }
}

/// Decode an input file into a pixel buffer
pub fn open_image(path: &Path) -> Result<DynamicImage, DecodeError> {
    match ensure_supported(path)? {
        #[cfg(feature = "camera-raw")]
        InputKind::CameraRaw => crate::raw::decode(path),
        _ => {
            // Sniff the content rather than trusting the extension
            let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
            Ok(img)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::tests::png_bytes;

    #[test]
    fn test_accepted_extensions() {
        assert!(is_accepted("photo.PNG"));
        assert!(is_accepted("a.b.jpeg"));
        assert!(is_accepted("IMG_0001.HEIC"));
        assert!(is_accepted("DSC_0001.NEF"));
        assert!(!is_accepted("notes.txt"));
        assert!(!is_accepted("png"));
        assert!(!is_accepted("trailing."));
    }

    #[test]
    fn test_heif_is_missing_capability() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phone.heic");
        std::fs::write(&path, b"ftypheic").unwrap();

        assert!(matches!(
            open_image(&path),
            Err(DecodeError::MissingCapability("HEIC/HEIF"))
        ));
    }

    #[test]
    fn test_content_is_sniffed() {
        let dir = tempfile::tempdir().unwrap();
        // PNG bytes behind a .jpg name still decode
        let path = dir.path().join("mislabelled.jpg");
        std::fs::write(&path, png_bytes(5, 4)).unwrap();

        let img = open_image(&path).unwrap();
        assert_eq!((img.width(), img.height()), (5, 4));
    }

    #[test]
    fn test_truncated_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        let mut bytes = png_bytes(20, 20);
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, bytes).unwrap();

        assert!(open_image(&path).is_err());
    }

    #[test]
    fn test_input_kind() {
        assert_eq!(input_kind(Path::new("/x/a.HEIF")), InputKind::Heif);
        assert_eq!(input_kind(Path::new("/x/a.dng")), InputKind::CameraRaw);
        assert_eq!(input_kind(Path::new("/x/a.webp")), InputKind::Raster);
    }
}
