//! Shoebox daemon for background catalog maintenance.
//!
//! Polls the catalog and
//! - writes edits of dirty images back into their files
//! - hard-deletes images that stayed in the trash past the retention period
//!
//! ## Usage
//!
//! ```bash
//! shoebox-daemon              # Run in foreground
//! shoebox-daemon --once       # Process pending work once and exit
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use shoebox::config::Config;
use shoebox::db::Database;
use shoebox::geo::GeoTable;
use shoebox::logging::{self, LogTarget};
use shoebox::metadata::ExifTool;
use shoebox::reaper;
use shoebox::scanner::AssetStore;
use shoebox::sync::MetadataSync;

struct DaemonArgs {
    /// Overrides `daemon.poll_interval_secs`.
    poll_interval: Option<u64>,
    once: bool,
    config_path: Option<PathBuf>,
    stderr: bool,
}

fn main() -> Result<()> {
    let args = parse_args();

    let target = if args.stderr {
        LogTarget::Stderr
    } else {
        LogTarget::System
    };
    logging::init(target, Some(Config::log_dir()))?;

    info!("Shoebox daemon starting...");

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let geo = GeoTable::load(&config.geo)?;
    let exiftool = ExifTool::new();
    if !exiftool.is_available() {
        warn!("exiftool not found in PATH, metadata sync will fail until it is installed");
    }

    let db = Database::open(&config.database)?;
    db.initialize()?;
    info!("Database opened at {:?}", config.database.path);

    let worker = Worker {
        config: &config,
        db: &db,
        sync: MetadataSync::new(&exiftool, &geo),
        store: AssetStore::new(&config.assets),
    };

    if args.once {
        info!("Running in single-shot mode");
        worker.process_pending()?;
    } else {
        let interval = args.poll_interval.unwrap_or(config.daemon.poll_interval_secs).max(1);
        info!("Running in daemon mode, polling every {} seconds", interval);
        loop {
            if let Err(e) = worker.process_pending() {
                error!("Error processing pending work: {:#}", e);
            }
            thread::sleep(Duration::from_secs(interval));
        }
    }

    info!("Shoebox daemon stopped");
    Ok(())
}

struct Worker<'a> {
    config: &'a Config,
    db: &'a Database,
    sync: MetadataSync<'a>,
    store: AssetStore,
}

impl Worker<'_> {
    fn process_pending(&self) -> Result<()> {
        let catalog = self.db.catalog();

        let synced = self.sync.sync_dirty(&catalog)?;
        if synced.failed > 0 {
            warn!(failed = synced.failed, "some images could not be synced, will retry");
        }

        let reaped = reaper::reap(&catalog, &self.store, self.config.trash.retention_days)?;
        if reaped.images_removed > 0 {
            info!(
                images = reaped.images_removed,
                bytes = reaped.bytes_freed,
                "trash emptied"
            );
        }
        Ok(())
    }
}

fn parse_args() -> DaemonArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = DaemonArgs {
        poll_interval: None,
        once: false,
        config_path: None,
        stderr: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--stderr" => {
                parsed.stderr = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(interval) => parsed.poll_interval = Some(interval),
                        Err(_) => {
                            eprintln!("Error: --interval expects a number of seconds");
                            std::process::exit(1);
                        }
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"shoebox-daemon - Background maintenance for the Shoebox catalog

USAGE:
    shoebox-daemon [OPTIONS]

OPTIONS:
    --once, -1          Process pending work once and exit
    --interval, -i N    Poll interval in seconds (default: daemon.poll_interval_secs)
    --config, -c PATH   Path to config file
    --stderr            Log to the terminal instead of the journal/log file
    --help, -h          Show this help message

ENVIRONMENT:
    SHOEBOX_CONFIG      Path to config file (overrides default location)
    SHOEBOX_LOG         Log level (trace, debug, info, warn, error)

Each pass:
  - writes catalog edits back into dirty image files
  - hard-deletes images soft-deleted longer than trash.retention_days
"#
    );
}
