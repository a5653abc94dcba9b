use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::path::PathBuf;

use super::Catalog;

/// Per-class file counts for one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub found: usize,
    pub new: usize,
    pub moved: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScanSummary {
    pub fn merge(&mut self, other: &ScanSummary) {
        self.found += other.found;
        self.new += other.new;
        self.moved += other.moved;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} found: {} new, {} moved, {} changed, {} unchanged, {} skipped, {} failed",
            self.found, self.new, self.moved, self.changed, self.unchanged, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Completed,
    Failed,
}

impl ScanStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl Catalog<'_> {
    pub fn start_scan(&self, roots: &[PathBuf]) -> Result<i64> {
        let roots = roots
            .iter()
            .map(|r| r.to_string_lossy())
            .collect::<Vec<_>>()
            .join(":");
        self.conn
            .execute("INSERT INTO scans (roots) VALUES (?1)", params![roots])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_scan(&self, scan_id: i64, summary: &ScanSummary, status: ScanStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE scans SET completed_at = CURRENT_TIMESTAMP,
                 files_found = ?1, files_new = ?2, files_moved = ?3, files_changed = ?4,
                 files_unchanged = ?5, files_failed = ?6, status = ?7
             WHERE id = ?8",
            params![
                summary.found as i64,
                summary.new as i64,
                summary.moved as i64,
                summary.changed as i64,
                summary.unchanged as i64,
                summary.failed as i64,
                status.as_str(),
                scan_id
            ],
        )?;
        Ok(())
    }

    /// Summary and status of the most recent finished scan.
    pub fn last_scan(&self) -> Result<Option<(String, ScanSummary, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT completed_at, files_found, files_new, files_moved, files_changed,
                        files_unchanged, files_failed, status
                 FROM scans WHERE completed_at IS NOT NULL ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    let summary = ScanSummary {
                        found: row.get::<_, i64>(1)? as usize,
                        new: row.get::<_, i64>(2)? as usize,
                        moved: row.get::<_, i64>(3)? as usize,
                        changed: row.get::<_, i64>(4)? as usize,
                        unchanged: row.get::<_, i64>(5)? as usize,
                        skipped: 0,
                        failed: row.get::<_, i64>(6)? as usize,
                    };
                    Ok((row.get(0)?, summary, row.get(7)?))
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_scan_history_roundtrip() {
        let db = test_db();
        let catalog = db.catalog();
        assert!(catalog.last_scan().unwrap().is_none());

        let id = catalog.start_scan(&[PathBuf::from("/photos")]).unwrap();
        let summary = ScanSummary {
            found: 3,
            new: 2,
            unchanged: 1,
            ..ScanSummary::default()
        };
        catalog.finish_scan(id, &summary, ScanStatus::Completed).unwrap();

        let (_, stored, status) = catalog.last_scan().unwrap().unwrap();
        assert_eq!(stored, summary);
        assert_eq!(status, "completed");
    }
}
