//! Flat on-disk content store
//!
//! One directory, one file per generated identifier. Identifiers are
//! `<uuid-v4>_<label>.<ext>`, so creations never collide and no locking is
//! needed: deleting a file that is already gone is treated as benign.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::catalog::Catalog;
use super::data::{BatchDelete, Category, StoredFile};

/// Longest label kept from a client-supplied file name
const MAX_LABEL_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The store. Shared between request workers and the sweeper behind an `Arc`.
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    catalog: Catalog,
}

impl ContentStore {
    /// Open the store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>, catalog: Catalog) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root, catalog })
    }

    /// Absolute path of the store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Map an identifier to its path. Anything that could escape the root
    /// (separators, `..`, hidden names) is reported as not found.
    fn resolve(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains(['/', '\\', '\0'])
            && id != "..";
        if !valid {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    /// Write `bytes` under a fresh identifier derived from `suggested_name`
    /// and record its category. Never overwrites.
    #[cfg(test)]
    pub fn put(&self, bytes: &[u8], suggested_name: &str, category: Category) -> Result<StoredFile> {
        let id = new_id(&sanitize_label(suggested_name));
        let path = self.write_new(&id, bytes)?;

        self.catalog.record(&id, category)?;
        info!(id = %id, size = bytes.len(), category = category.as_str(), "stored file");
        describe(&id, &path, category)
    }

    /// Store a raw client upload. The returned guard deletes the file when
    /// dropped, so uploads never outlive the request that received them.
    pub fn put_transient(&self, bytes: &[u8], suggested_name: &str) -> Result<TransientUpload> {
        let id = new_id(&sanitize_label(suggested_name));
        let path = self.write_new(&id, bytes)?;
        debug!(id = %id, size = bytes.len(), "stored upload");

        let file = describe(&id, &path, Category::Processed)?;
        Ok(TransientUpload { file })
    }

    fn write_new(&self, id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resolve(id)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(path)
    }

    /// Reserve a fresh identifier for a file some other writer (an encoder,
    /// an external process) will create. Nothing is written yet.
    pub fn reserve(&self, category: Category, label: &str, extension: &str) -> PendingFile {
        let id = new_id(&format!("{}.{}", label, extension));
        let path = self.root.join(&id);
        PendingFile {
            id,
            path,
            category,
            committed: false,
        }
    }

    /// Adopt a reserved file once its writer is done with it.
    ///
    /// Fails with `NotFound` if nothing was written. On any failure the
    /// reservation is dropped and whatever was written is removed.
    pub fn commit(&self, mut pending: PendingFile) -> Result<StoredFile> {
        if !pending.path.is_file() {
            return Err(StoreError::NotFound(pending.id.clone()));
        }

        let stored = describe(&pending.id, &pending.path, pending.category)?;
        self.catalog.record(&pending.id, pending.category)?;
        pending.committed = true;

        info!(
            id = %stored.id,
            size = stored.size,
            width = stored.width,
            height = stored.height,
            category = stored.category.as_str(),
            "stored file"
        );
        Ok(stored)
    }

    /// Look up one file with its metadata
    pub fn get(&self, id: &str) -> Result<StoredFile> {
        let path = self.resolve(id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let category = self.catalog.category_of(id)?.unwrap_or(Category::Processed);
        describe(id, &path, category).map_err(|e| not_found_if_missing(e, id))
    }

    /// Enumerate current files, newest first.
    ///
    /// Files that vanish mid-listing are skipped; files that aren't readable
    /// images are listed with 0x0 dimensions.
    pub fn list(&self) -> Result<Vec<StoredFile>> {
        let categories = self.catalog.categories().unwrap_or_else(|e| {
            warn!(error = %e, "catalog unavailable, listing without categories");
            Default::default()
        });

        let mut files = Vec::new();
        for (id, path) in self.entries() {
            let category = categories.get(&id).copied().unwrap_or(Category::Processed);
            match describe(&id, &path, category) {
                Ok(file) => files.push(file),
                Err(e) => debug!(id = %id, error = %e, "skipping unreadable entry"),
            }
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(files)
    }

    /// Delete one file
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.resolve(id)?;
        fs::remove_file(&path).map_err(|e| not_found_if_missing(e.into(), id))?;
        self.forget(id);

        info!(id = %id, "deleted file");
        Ok(())
    }

    /// Delete every file. Best-effort: one failure doesn't stop the rest.
    pub fn delete_all(&self) -> BatchDelete {
        let mut batch = BatchDelete::default();

        for (id, path) in self.entries() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    self.forget(&id);
                    debug!(id = %id, "deleted file");
                    batch.deleted.push(id);
                }
                // Removed concurrently by another worker or the sweeper
                Err(e) if e.kind() == ErrorKind::NotFound => self.forget(&id),
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to delete file");
                    batch.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            deleted = batch.deleted.len(),
            failed = batch.failed.len(),
            "deleted all files"
        );
        batch
    }

    /// Delete every file last modified more than `max_age` ago.
    /// Best-effort per file; returns how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
            return 0;
        };

        let mut removed = 0;
        for (id, path) in self.entries() {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if modified >= cutoff {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    self.forget(&id);
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => self.forget(&id),
                Err(e) => warn!(id = %id, error = %e, "failed to sweep file"),
            }
        }

        // Rows whose files vanished out of band never show up above
        match self.catalog.prune_before(DateTime::<Utc>::from(cutoff)) {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned expired catalog rows"),
            Err(e) => warn!(error = %e, "failed to prune catalog"),
        }

        if removed > 0 {
            info!(removed, "swept expired files");
        }
        removed
    }

    /// Identifier and path of every regular file directly in the root
    fn entries(&self) -> Vec<(String, PathBuf)> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let id = e.file_name().to_str()?.to_string();
                Some((id, e.into_path()))
            })
            .collect()
    }

    fn forget(&self, id: &str) {
        if let Err(e) = self.catalog.forget(id) {
            warn!(id = %id, error = %e, "failed to drop catalog entry");
        }
    }
}

/// A reserved identifier whose file is written by someone else.
/// Dropping it without `ContentStore::commit` removes any partial output.
#[derive(Debug)]
pub struct PendingFile {
    id: String,
    path: PathBuf,
    category: Category,
    committed: bool,
}

impl PendingFile {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(id = %self.id, "discarded partial output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(id = %self.id, error = %e, "failed to discard partial output"),
        }
    }
}

/// A raw upload that lives exactly as long as its request
#[derive(Debug)]
pub struct TransientUpload {
    file: StoredFile,
}

impl TransientUpload {
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn id(&self) -> &str {
        &self.file.id
    }
}

impl Drop for TransientUpload {
    fn drop(&mut self) {
        match fs::remove_file(&self.file.path) {
            Ok(()) => debug!(id = %self.file.id, "removed upload"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(id = %self.file.id, error = %e, "failed to remove upload"),
        }
    }
}

/// Build a collision-free identifier: random UUID plus a readable label
fn new_id(label: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), label)
}

/// Reduce a client file name to a safe label: base name only, ASCII
/// alphanumerics plus `.`, `-`, `_`, bounded length
fn sanitize_label(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut label: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if label.len() > MAX_LABEL_LEN {
        // Keep the tail so the extension survives
        label = label[label.len() - MAX_LABEL_LEN..].to_string();
    }
    if label.trim_matches('.').is_empty() {
        return "upload".to_string();
    }
    label
}

/// Read size, timestamp and pixel dimensions of a file
fn describe(id: &str, path: &Path, category: Category) -> Result<StoredFile> {
    let metadata = fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata.modified()?.into();
    let (width, height) = image::image_dimensions(path).unwrap_or((0, 0));

    Ok(StoredFile {
        id: id.to_string(),
        path: path.to_path_buf(),
        modified,
        size: metadata.len(),
        width,
        height,
        category,
    })
}

fn not_found_if_missing(error: StoreError, id: &str) -> StoreError {
    match error {
        StoreError::Io(e) if e.kind() == ErrorKind::NotFound => StoreError::NotFound(id.to_string()),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;

    pub(crate) fn open_store(dir: &Path) -> ContentStore {
        ContentStore::open(dir.join("uploads"), Catalog::open_in_memory().unwrap()).unwrap()
    }

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn age(path: &Path, by: Duration) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_put_reads_back_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let stored = store.put(&png_bytes(12, 7), "photo.png", Category::Converted).unwrap();

        assert!(stored.id.ends_with("_photo.png"));
        assert_eq!(stored.path.parent().unwrap(), store.root());
        assert_eq!((stored.width, stored.height), (12, 7));
        assert_eq!(stored.category, Category::Converted);
        assert_eq!(store.get(&stored.id).unwrap().category, Category::Converted);
    }

    #[test]
    fn test_list_degrades_unreadable_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.put(b"not an image", "notes.png", Category::Processed).unwrap();
        let files = store.list().unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!((files[0].width, files[0].height), (0, 0));
    }

    #[test]
    fn test_concurrent_puts_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .put(format!("payload {}", i).as_bytes(), "same.png", Category::Processed)
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(store.list().unwrap().len(), 16);
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let stored = store.put(b"x", "a.bmp", Category::Processed).unwrap();
        store.delete(&stored.id).unwrap();

        assert!(matches!(store.delete(&stored.id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.get(&stored.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_traversal_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        for id in ["../secret.txt", "..", ".hidden", "", "a/b", "a\\b"] {
            assert!(matches!(store.get(id), Err(StoreError::NotFound(_))), "{id}");
            assert!(matches!(store.delete(id), Err(StoreError::NotFound(_))), "{id}");
        }
    }

    #[test]
    fn test_delete_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.put(b"1", "one.png", Category::Converted).unwrap();
        store.put(b"2", "two.png", Category::Upscaled).unwrap();

        let first = store.delete_all();
        assert_eq!(first.deleted.len(), 2);
        assert!(first.failed.is_empty());
        assert_eq!(store.catalog().len().unwrap(), 0);

        let second = store.delete_all();
        assert_eq!(second.total(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let old = store.put(b"old", "old.png", Category::Converted).unwrap();
        let fresh = store.put(b"fresh", "fresh.png", Category::Converted).unwrap();

        age(&old.path, Duration::from_secs(25 * 60 * 60));
        age(&fresh.path, Duration::from_secs(23 * 60 * 60));

        let removed = store.sweep(Duration::from_secs(24 * 60 * 60));

        assert_eq!(removed, 1);
        let ids: Vec<String> = store.list().unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![fresh.id]);
        assert_eq!(store.catalog().category_of(&old.id).unwrap(), None);

        // A second pass finds nothing left to do
        assert_eq!(store.sweep(Duration::from_secs(24 * 60 * 60)), 0);
    }

    #[test]
    fn test_sweep_prunes_rows_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let kept = store.put(b"kept", "kept.png", Category::Upscaled).unwrap();
        // Left behind by a file removed out of band
        store
            .catalog()
            .record_at(
                "ghost_converted.png",
                Category::Converted,
                Utc::now() - chrono::Duration::hours(48),
            )
            .unwrap();

        assert_eq!(store.sweep(Duration::from_secs(24 * 60 * 60)), 0);

        assert_eq!(store.catalog().category_of("ghost_converted.png").unwrap(), None);
        assert_eq!(store.catalog().category_of(&kept.id).unwrap(), Some(Category::Upscaled));
        assert_eq!(store.catalog().len().unwrap(), 1);
    }

    #[test]
    fn test_uncommitted_reservation_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let pending = store.reserve(Category::Upscaled, "upscaled", "png");
        fs::write(pending.path(), b"partial").unwrap();
        let path = pending.path().to_path_buf();
        drop(pending);

        assert!(!path.exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_commit_requires_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let pending = store.reserve(Category::Upscaled, "upscaled", "png");
        assert!(matches!(store.commit(pending), Err(StoreError::NotFound(_))));

        let pending = store.reserve(Category::Upscaled, "upscaled", "png");
        fs::write(pending.path(), png_bytes(3, 3)).unwrap();
        let stored = store.commit(pending).unwrap();

        assert!(stored.path.exists());
        assert!(stored.id.ends_with("_upscaled.png"));
        assert_eq!(store.get(&stored.id).unwrap().category, Category::Upscaled);
    }

    #[test]
    fn test_transient_upload_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let upload = store.put_transient(b"raw", "../../etc/passwd").unwrap();
        assert!(upload.id().ends_with("_passwd"));
        assert!(upload.path().exists());
        let path = upload.path().to_path_buf();

        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("my photo (1).JPG"), "my_photo__1_.JPG");
        assert_eq!(sanitize_label("C:\\Users\\me\\x.png"), "x.png");
        assert_eq!(sanitize_label(".."), "upload");
        assert_eq!(sanitize_label(""), "upload");
        assert!(sanitize_label(&format!("{}.png", "a".repeat(300))).ends_with(".png"));
    }
}
