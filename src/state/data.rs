//! Shared data structures for the file store
//!
//! These structs describe what the store hands back to the API layer
//! and to the sweeper. None of them hold a file handle; every access
//! re-resolves the file by its identifier.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// What produced a stored file. Recorded in the catalog at creation time
/// and only used for display.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Converted,
    Upscaled,
    Processed,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Converted => "converted",
            Category::Upscaled => "upscaled",
            Category::Processed => "processed",
        }
    }

    /// Parse the catalog column; unknown values degrade to `Processed`
    pub fn from_db(value: &str) -> Self {
        match value {
            "converted" => Category::Converted,
            "upscaled" => Category::Upscaled,
            _ => Category::Processed,
        }
    }
}

/// Represents a single file in the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Generated identifier, also the file name (e.g. "<uuid>_upscaled.png")
    pub id: String,
    /// Absolute path inside the store root
    pub path: PathBuf,
    /// Last modification time, used for expiry
    pub modified: DateTime<Utc>,
    /// Size on disk in bytes
    pub size: u64,
    /// Pixel width (0 if the file isn't a readable image)
    pub width: u32,
    /// Pixel height (0 if the file isn't a readable image)
    pub height: u32,
    pub category: Category,
}

/// Outcome of a best-effort bulk delete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDelete {
    /// Identifiers that were removed
    pub deleted: Vec<String>,
    /// Identifiers that could not be removed, with the reason
    pub failed: Vec<(String, String)>,
}

impl BatchDelete {
    /// Number of entries the batch looked at
    pub fn total(&self) -> usize {
        self.deleted.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_db_round_trip() {
        for category in [Category::Converted, Category::Upscaled, Category::Processed] {
            assert_eq!(Category::from_db(category.as_str()), category);
        }
        assert_eq!(Category::from_db("something-else"), Category::Processed);
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&Category::Upscaled).unwrap();
        assert_eq!(json, "\"upscaled\"");
    }
}
