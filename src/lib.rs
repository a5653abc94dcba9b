//! Photo catalog indexer.
//!
//! Walks image trees, fingerprints and classifies every file against the
//! SQLite catalog, and turns embedded metadata (regions, keyword trees,
//! location fields) into catalog entities. [`sync`] writes catalog edits
//! back into the files.

pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod interpret;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod reaper;
pub mod scanner;
pub mod sync;
