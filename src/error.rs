//! Errors the ingestion pipeline has to tell apart.
//!
//! Most code returns `anyhow::Result`. The types here are the ones a
//! caller matches on: a [`FileError`] only costs the file it names, while
//! a [`LockError`] or anything else aborts the batch.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline step a file was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fingerprint,
    Extract,
    Assets,
    Folder,
    Sync,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fingerprint => "fingerprint",
            Stage::Extract => "extract",
            Stage::Assets => "assets",
            Stage::Folder => "folder",
            Stage::Sync => "sync",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("unprocessable file {path} during {stage}: {source:#}")]
    Unprocessable {
        path: PathBuf,
        stage: Stage,
        source: anyhow::Error,
    },
}

impl FileError {
    pub fn unprocessable(path: impl Into<PathBuf>, stage: Stage, source: anyhow::Error) -> Self {
        FileError::Unprocessable {
            path: path.into(),
            stage,
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {path} (stale cleanup already attempted)")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Whether an error only affects the file being processed.
pub fn is_file_local(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FileError>().is_some()
}
