//! Get-or-create with retry on unique-constraint races.
//!
//! Two workers can both miss a lookup and both insert the same key. The
//! loser sees a unique violation, backs off and looks again. After the
//! last attempt one plain re-fetch decides.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::config::ScannerConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(20),
        }
    }
}

impl From<&ScannerConfig> for RetryPolicy {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): doubling base delay
    /// plus up to half of it again as jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let backoff = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0..=backoff / 2);
        Duration::from_millis(backoff + jitter)
    }
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// Look up a row and create it when missing.
///
/// `find` must be a pure lookup; `create` an insert that fails with a
/// unique violation when the row already exists.
pub fn get_or_create<T, F, C>(policy: &RetryPolicy, what: &str, mut find: F, mut create: C) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<Option<T>>,
    C: FnMut() -> rusqlite::Result<T>,
{
    for attempt in 0..policy.attempts {
        if let Some(existing) = find()? {
            return Ok(existing);
        }
        match create() {
            Ok(created) => return Ok(created),
            Err(e) if is_unique_violation(&e) => {
                let delay = policy.delay(attempt);
                debug!(what, attempt, ?delay, "unique violation on create, retrying");
                thread::sleep(delay);
            }
            Err(e) => return Err(e.into()),
        }
    }

    find()?.ok_or_else(|| {
        anyhow!(
            "{} still conflicting after {} attempts and not found on re-fetch",
            what,
            policy.attempts
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::cell::Cell;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);")
            .unwrap();
        conn
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_creates_when_missing_and_finds_after() {
        let conn = conn();
        let find = || {
            conn.query_row("SELECT id FROM t WHERE name = ?1", ["a"], |r| r.get::<_, i64>(0))
                .optional()
        };
        let create = || {
            conn.execute("INSERT INTO t (name) VALUES (?1)", ["a"])?;
            Ok(conn.last_insert_rowid())
        };

        let first = get_or_create(&fast(), "t", find, create).unwrap();
        let second = get_or_create(&fast(), "t", find, create).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_lost_race_falls_back_to_existing_row() {
        let conn = conn();
        let lookups = Cell::new(0);

        // The first lookup misses as if another writer had not committed yet.
        let find = || {
            lookups.set(lookups.get() + 1);
            if lookups.get() == 1 {
                return Ok(None);
            }
            conn.query_row("SELECT id FROM t WHERE name = ?1", ["b"], |r| r.get::<_, i64>(0))
                .optional()
        };
        conn.execute("INSERT INTO t (name) VALUES (?1)", params!["b"]).unwrap();
        let existing = conn.last_insert_rowid();
        let create = || {
            conn.execute("INSERT INTO t (name) VALUES (?1)", ["b"])?;
            Ok(conn.last_insert_rowid())
        };

        let id = get_or_create(&fast(), "t", find, create).unwrap();
        assert_eq!(id, existing);
        assert_eq!(lookups.get(), 2);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let conn = conn();
        let find = || Ok(None::<i64>);
        let create = || {
            conn.execute("INSERT INTO missing_table (name) VALUES (?1)", ["c"])?;
            Ok(conn.last_insert_rowid())
        };
        assert!(get_or_create(&fast(), "t", find, create).is_err());
    }
}
