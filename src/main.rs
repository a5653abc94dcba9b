use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use shoebox::config::Config;
use shoebox::db::Database;
use shoebox::geo::GeoTable;
use shoebox::logging::{self, LogTarget};
use shoebox::metadata::ExifTool;
use shoebox::reaper;
use shoebox::scanner::{AssetStore, ScanProgress, Scanner, ThumbnailGenerator};
use shoebox::sync::MetadataSync;

enum Command {
    Index(Vec<PathBuf>),
    Sync,
    Reap,
    Stats,
}

struct Args {
    command: Command,
    config_path: Option<PathBuf>,
    stderr: bool,
    view_groups: Vec<String>,
    edit_groups: Vec<String>,
    overwrite_groups: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut command = None;
    let mut dirs = Vec::new();
    let mut parsed = Args {
        command: Command::Stats,
        config_path: None,
        stderr: false,
        view_groups: Vec::new(),
        edit_groups: Vec::new(),
        overwrite_groups: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("shoebox {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--stderr" => parsed.stderr = true,
            "--overwrite-groups" => parsed.overwrite_groups = true,
            flag @ ("--config" | "-c" | "--view-group" | "--edit-group") => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires an argument", flag);
                    std::process::exit(1);
                };
                match flag {
                    "--view-group" => parsed.view_groups.push(value.clone()),
                    "--edit-group" => parsed.edit_groups.push(value.clone()),
                    _ => parsed.config_path = Some(PathBuf::from(value)),
                }
                i += 1;
            }
            "index" | "sync" | "reap" | "stats" if command.is_none() => {
                command = Some(args[i].clone());
            }
            other if command.as_deref() == Some("index") && !other.starts_with('-') => {
                dirs.push(PathBuf::from(other));
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed.command = match command.as_deref() {
        Some("index") => Command::Index(dirs),
        Some("sync") => Command::Sync,
        Some("reap") => Command::Reap,
        Some("stats") => Command::Stats,
        _ => {
            print_help();
            std::process::exit(1);
        }
    };
    parsed
}

fn print_help() {
    println!(
        r#"shoebox - photo catalog indexer

USAGE:
    shoebox [OPTIONS] <COMMAND>

COMMANDS:
    index [DIR...]      Index DIRs (default: configured library roots)
    sync                Write catalog edits back into dirty files
    reap                Hard-delete images past the trash retention period
    stats               Show catalog counts and the last index run

OPTIONS:
    --config, -c PATH   Path to config file
    --view-group NAME   Grant view access to NAME on indexed items (repeatable)
    --edit-group NAME   Grant edit access to NAME on indexed items (repeatable)
    --overwrite-groups  Replace existing group assignments instead of merging
    --stderr            Log to the terminal instead of the journal/log file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SHOEBOX_CONFIG      Path to config file (overrides default location)
    SHOEBOX_LOG         Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/shoebox/config.toml

See also: shoebox-daemon --help"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let target = if args.stderr {
        LogTarget::Stderr
    } else {
        LogTarget::System
    };
    let _ = logging::init(target, Some(Config::log_dir()));

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.permissions.view_groups.extend(args.view_groups.iter().cloned());
    config.permissions.edit_groups.extend(args.edit_groups.iter().cloned());
    config.permissions.overwrite |= args.overwrite_groups;

    match &args.command {
        Command::Index(dirs) => index(&config, dirs),
        Command::Sync => sync(&config),
        Command::Reap => reap(&config),
        Command::Stats => stats(&config),
    }
}

fn index(config: &Config, dirs: &[PathBuf]) -> Result<()> {
    let geo = GeoTable::load(&config.geo)?;
    let exiftool = ExifTool::new();
    if !exiftool.is_available() {
        bail!("exiftool not found in PATH; it is required to read image metadata");
    }

    let mut scanner = Scanner::new(config, &geo, &exiftool, &ThumbnailGenerator);
    if !dirs.is_empty() {
        let roots = dirs
            .iter()
            .map(|d| d.canonicalize().with_context(|| format!("Cannot index {}", d.display())))
            .collect::<Result<Vec<_>>>()?;
        scanner = scanner.with_roots(roots);
    }
    if scanner.options().library.roots.is_empty() {
        bail!("no directories to index: pass DIRs or set library.roots in the config");
    }

    let (tx, rx) = mpsc::channel();
    let scanner = scanner.with_progress(tx);

    let summary = thread::scope(|s| {
        s.spawn(move || report_progress(rx));
        // the scanner owns the sender, dropping it ends the reporter
        let result = scanner.index();
        drop(scanner);
        result
    })?;

    println!("{}", summary);
    Ok(())
}

fn report_progress(rx: mpsc::Receiver<ScanProgress>) {
    for progress in rx {
        match progress {
            ScanProgress::Started { total_files } => println!("Found {} files", total_files),
            ScanProgress::Classified {
                new,
                moved,
                changed,
                unchanged,
            } => println!(
                "{} new, {} moved, {} changed, {} unchanged",
                new, moved, changed, unchanged
            ),
            ScanProgress::Processing { current, total, path } => {
                eprintln!("[{}/{}] {}", current, total, path)
            }
            ScanProgress::Error { message } => eprintln!("Error: {}", message),
            ScanProgress::Completed { .. } => {}
        }
    }
}

fn sync(config: &Config) -> Result<()> {
    let geo = GeoTable::load(&config.geo)?;
    let exiftool = ExifTool::new();
    if !exiftool.is_available() {
        bail!("exiftool not found in PATH; it is required to write image metadata");
    }

    let db = Database::open(&config.database)?;
    db.initialize()?;
    let summary = MetadataSync::new(&exiftool, &geo).sync_dirty(&db.catalog())?;
    println!(
        "{} written, {} cleared, {} failed",
        summary.written, summary.cleared, summary.failed
    );
    Ok(())
}

fn reap(config: &Config) -> Result<()> {
    let db = Database::open(&config.database)?;
    db.initialize()?;
    let store = AssetStore::new(&config.assets);
    let result = reaper::reap(&db.catalog(), &store, config.trash.retention_days)?;
    println!(
        "{} images removed, {} bytes of assets freed",
        result.images_removed, result.bytes_freed
    );
    Ok(())
}

fn stats(config: &Config) -> Result<()> {
    let db = Database::open(&config.database)?;
    db.initialize()?;
    let catalog = db.catalog();
    let stats = catalog.stats()?;

    println!("Images:     {}", stats.images);
    println!("  dirty:    {}", stats.dirty);
    println!("  starred:  {}", stats.starred);
    println!("  in trash: {}", stats.deleted);
    println!("Folders:    {}", stats.folders);
    println!("Tags:       {}", stats.tags);
    println!("People:     {}", stats.people);
    println!("Pets:       {}", stats.pets);
    println!("Locations:  {}", stats.locations);
    println!("Dates:      {}", stats.dates);

    match catalog.last_scan()? {
        Some((completed_at, summary, status)) => {
            println!("Last index: {} ({}) {}", completed_at, status, summary)
        }
        None => println!("Last index: never"),
    }
    Ok(())
}
