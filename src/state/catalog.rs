use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result as SqlResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::data::Category;

/// The Catalog records which operation produced each stored file.
///
/// The store directory stays the source of truth for what exists; the
/// catalog only remembers the category tag so listings don't have to
/// guess it from file names.
pub struct Catalog {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Catalog {
    /// Open (or create) the catalog database at the given path.
    pub fn open(db_path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        let catalog = Catalog {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        catalog.init_schema()?;

        tracing::info!(path = %db_path.display(), "catalog initialized");
        Ok(catalog)
    }

    /// Catalog that lives only as long as the process (tests)
    #[cfg(test)]
    pub fn open_in_memory() -> SqlResult<Self> {
        let catalog = Catalog {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id              TEXT PRIMARY KEY,
                category        TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            )",
            [],
        )?;

        // Concurrent request workers and the sweeper share this file
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(())
    }

    /// A poisoned lock only means another worker panicked mid-statement;
    /// SQLite itself stays consistent, so keep going.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the path to the database file (None when in memory)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Remember the category of a newly created file
    pub fn record(&self, id: &str, category: Category) -> SqlResult<()> {
        self.record_at(id, category, Utc::now())
    }

    pub fn record_at(&self, id: &str, category: Category, created_at: DateTime<Utc>) -> SqlResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO files (id, category, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, category.as_str(), created_at.timestamp()],
        )?;
        Ok(())
    }

    /// Category of one file, if it was recorded
    pub fn category_of(&self, id: &str) -> SqlResult<Option<Category>> {
        let value: Option<String> = self
            .conn()
            .query_row("SELECT category FROM files WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.map(|v| Category::from_db(&v)))
    }

    /// Every recorded category, keyed by identifier
    pub fn categories(&self) -> SqlResult<HashMap<String, Category>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, category FROM files")?;

        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let category: String = row.get(1)?;
            Ok((id, Category::from_db(&category)))
        })?;

        let mut categories = HashMap::new();
        for row in rows {
            let (id, category) = row?;
            categories.insert(id, category);
        }
        Ok(categories)
    }

    /// Drop the row of a deleted file. Missing rows are not an error.
    pub fn forget(&self, id: &str) -> SqlResult<()> {
        self.conn()
            .execute("DELETE FROM files WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Drop every row created before `cutoff`, whether or not its file
    /// still exists. Returns the number of rows removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> SqlResult<usize> {
        self.conn()
            .execute("DELETE FROM files WHERE created_at < ?1", [cutoff.timestamp()])
    }

    /// Count of recorded files
    pub fn len(&self) -> SqlResult<i64> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record("a_upscaled.png", Category::Upscaled).unwrap();
        catalog.record("b_converted.jpg", Category::Converted).unwrap();

        assert_eq!(
            catalog.category_of("a_upscaled.png").unwrap(),
            Some(Category::Upscaled)
        );
        assert_eq!(catalog.category_of("missing").unwrap(), None);

        let all = catalog.categories().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b_converted.jpg"], Category::Converted);
    }

    #[test]
    fn test_forget_is_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.record("x.png", Category::Processed).unwrap();

        catalog.forget("x.png").unwrap();
        catalog.forget("x.png").unwrap();

        assert_eq!(catalog.len().unwrap(), 0);
    }

    #[test]
    fn test_prune_before_drops_only_old_rows() {
        let catalog = Catalog::open_in_memory().unwrap();
        let now = Utc::now();
        catalog
            .record_at("old.png", Category::Upscaled, now - chrono::Duration::hours(48))
            .unwrap();
        catalog.record("fresh.png", Category::Converted).unwrap();

        let pruned = catalog.prune_before(now - chrono::Duration::hours(24)).unwrap();

        assert_eq!(pruned, 1);
        assert_eq!(catalog.category_of("old.png").unwrap(), None);
        assert_eq!(catalog.category_of("fresh.png").unwrap(), Some(Category::Converted));
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let catalog = Catalog::open(&path).unwrap();
            assert_eq!(catalog.path(), Some(path.as_path()));
            catalog.record("kept.png", Category::Converted).unwrap();
        }

        let reopened = Catalog::open(&path).unwrap();
        assert_eq!(
            reopened.category_of("kept.png").unwrap(),
            Some(Category::Converted)
        );
    }
}
