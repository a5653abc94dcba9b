use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub assets: AssetConfig,

    #[serde(default)]
    pub permissions: PermissionConfig,

    #[serde(default)]
    pub geo: GeoConfig,

    #[serde(default)]
    pub trash: TrashConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// How long a connection waits on a locked database before failing (ms).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    data_dir().join("shoebox.db")
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directories whose contents make up the catalog. Folder trees are
    /// built relative to the root a file was found under.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "tiff".to_string(),
        "tif".to_string(),
        "webp".to_string(),
    ]
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            image_extensions: default_image_extensions(),
        }
    }
}

impl LibraryConfig {
    /// The configured root that contains `path`, if any. The longest
    /// matching root wins when roots are nested.
    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(|root| root.as_path())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of batches processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_hash_chunk_size")]
    pub hash_chunk_size: usize,

    /// Threads used by BLAKE3 itself for each chunk. 1 hashes on the caller.
    #[serde(default = "default_hash_threads")]
    pub hash_threads: usize,

    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_batch_size() -> usize {
    50
}

fn default_workers() -> usize {
    4
}

fn default_hash_chunk_size() -> usize {
    1024 * 1024
}

fn default_hash_threads() -> usize {
    1
}

fn default_lock_timeout_secs() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    20
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            hash_chunk_size: default_hash_chunk_size(),
            hash_threads: default_hash_threads(),
            lock_timeout_secs: default_lock_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl ScannerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: PathBuf,

    #[serde(default = "default_large_dir")]
    pub large_dir: PathBuf,

    #[serde(default = "default_max_thumbnail_side")]
    pub max_thumbnail_side: u32,

    #[serde(default = "default_max_large_side")]
    pub max_large_side: u32,

    #[serde(default = "default_webp_quality")]
    pub webp_quality: u8,

    /// Directory holding the advisory lock files.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

fn default_thumbnail_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("shoebox/thumbnails")
}

fn default_large_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("shoebox/large")
}

fn default_max_thumbnail_side() -> u32 {
    256
}

fn default_max_large_side() -> u32 {
    2048
}

fn default_webp_quality() -> u8 {
    80
}

fn default_lock_dir() -> PathBuf {
    data_dir().join("locks")
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            thumbnail_dir: default_thumbnail_dir(),
            large_dir: default_large_dir(),
            max_thumbnail_side: default_max_thumbnail_side(),
            max_large_side: default_max_large_side(),
            webp_quality: default_webp_quality(),
            lock_dir: default_lock_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PermissionConfig {
    #[serde(default)]
    pub view_groups: Vec<String>,

    #[serde(default)]
    pub edit_groups: Vec<String>,

    /// Replace existing group assignments instead of merging into them.
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeoConfig {
    /// CSV with `alpha2,alpha3,name,official_name` rows replacing the
    /// built-in country table.
    #[serde(default)]
    pub countries_csv: Option<PathBuf>,

    /// CSV with `code,name` rows (ISO 3166-2) replacing the built-in table.
    #[serde(default)]
    pub subdivisions_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashConfig {
    /// Days a soft-deleted image is kept before the reaper removes it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shoebox")
}

impl Config {
    /// Load from `SHOEBOX_CONFIG` or the default location, writing a
    /// default file if none exists yet.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shoebox")
    }

    pub fn log_dir() -> PathBuf {
        data_dir().join("logs")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SHOEBOX_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}
