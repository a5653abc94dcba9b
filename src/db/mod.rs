mod schema;
pub mod folders;
pub mod groups;
pub mod images;
pub mod people;
pub mod retry;
pub mod rough;
pub mod scans;
pub mod tags;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub use folders::Folder;
pub use groups::GroupTable;
pub use images::{CatalogRef, CatalogStats, DerivedSizes, ImageDetails, ImageRecord, NewImage};
pub use people::{Person, PersonRegion, Pet, PetRegion};
pub use retry::RetryPolicy;
pub use scans::{ScanStatus, ScanSummary};
pub use schema::{MIGRATIONS, SCHEMA};
pub use tags::{ImageTag, Tag};

use crate::config::DatabaseConfig;

/// Owner of one SQLite connection to the catalog.
///
/// Every worker opens its own `Database`. Reads and writes go through a
/// [`Catalog`] borrowed from either the connection itself or from an open
/// transaction.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        Self::open_path(&config.path, Duration::from_millis(config.busy_timeout_ms))
    }

    pub fn open_path(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }

    /// Catalog access outside of any explicit transaction (autocommit).
    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(&self.conn)
    }

    /// Start a write transaction. `IMMEDIATE` takes SQLite's write lock up
    /// front so that two batches never deadlock upgrading read locks.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Repository handle over a connection, transaction or savepoint.
///
/// Operations are spread over the submodules by entity (`images`,
/// `folders`, `tags`, `people`, `rough`, `scans`).
#[derive(Clone, Copy)]
pub struct Catalog<'c> {
    conn: &'c Connection,
    retry: RetryPolicy,
}

impl<'c> Catalog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.initialize().unwrap();
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let db = test_db();
        db.initialize().unwrap();

        let tables: i64 = db
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('images', 'folders', 'tags', 'rough_dates', 'rough_locations')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/catalog.db");
        let db = Database::open_path(&path, Duration::from_secs(1)).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());
    }
}
