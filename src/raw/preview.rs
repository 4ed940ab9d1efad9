//! Embedded preview extraction from RAW files
//! Most cameras store a full-size JPEG rendering next to the sensor data

use image::ImageFormat;

/// Embedded JPEGs smaller than this are thumbnails, not previews
const MIN_PREVIEW_BYTES: usize = 10_000;

/// Scan RAW file bytes for JPEG streams and return the largest one that
/// actually decodes
pub fn largest_embedded_jpeg(buffer: &[u8]) -> Option<Vec<u8>> {
    let mut candidates = scan_jpegs(buffer);

    // Try from largest to smallest
    candidates.sort_by(|a, b| b.len().cmp(&a.len()));

    candidates
        .into_iter()
        .filter(|jpeg| jpeg.len() >= MIN_PREVIEW_BYTES)
        .find(|jpeg| image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).is_ok())
        .map(|jpeg| jpeg.to_vec())
}

/// Every SOI..EOI byte range in the buffer
fn scan_jpegs(buffer: &[u8]) -> Vec<&[u8]> {
    let jpeg_start = b"\xff\xd8\xff"; // JPEG Start Of Image (SOI)
    let jpeg_end = b"\xff\xd9"; // JPEG End Of Image (EOI)

    let mut found = Vec::new();
    let mut pos = 0;
    while pos + jpeg_start.len() <= buffer.len() {
        if !buffer[pos..].starts_with(jpeg_start) {
            pos += 1;
            continue;
        }

        // Find the corresponding EOI
        match buffer[pos..].windows(2).position(|w| w == jpeg_end) {
            Some(offset) => {
                let end = pos + offset + 2;
                found.push(&buffer[pos..end]);
                pos = end;
            }
            None => break,
        }
    }
    found
}
