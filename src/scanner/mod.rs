pub mod change_detection;
pub mod discovery;
pub mod hashing;
pub mod ingest;
pub mod thumbnails;

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{Catalog, Database, ScanStatus, ScanSummary};
use crate::error::{is_file_local, FileError, Stage};
use crate::geo::GeoTable;
use crate::metadata::MetadataBackend;

pub use change_detection::{classify, CatalogIndex, Classification, Discovered, Matched};
pub use discovery::discover_images;
pub use hashing::{content_hash, fingerprint, perceptual_hash, ContentHasher, Fingerprint};
pub use ingest::{IngestContext, IngestOptions, Outcome, RunIndex, Task};
pub use thumbnails::{AssetGenerator, AssetSpec, AssetStore, RenderedAssets, ThumbnailGenerator};

#[derive(Debug, Clone)]
pub enum ScanProgress {
    Started { total_files: usize },
    Classified { new: usize, moved: usize, changed: usize, unchanged: usize },
    Processing { current: usize, total: usize, path: String },
    Error { message: String },
    Completed { summary: ScanSummary },
}

/// Drives one indexing run: discover, fingerprint, classify, then ingest
/// the moved, changed and new files in parallel batches.
pub struct Scanner<'a> {
    options: IngestOptions,
    geo: &'a GeoTable,
    metadata: &'a dyn MetadataBackend,
    generator: &'a dyn AssetGenerator,
    store: AssetStore,
    progress_tx: Option<mpsc::Sender<ScanProgress>>,
}

impl<'a> Scanner<'a> {
    pub fn new(
        config: &Config,
        geo: &'a GeoTable,
        metadata: &'a dyn MetadataBackend,
        generator: &'a dyn AssetGenerator,
    ) -> Self {
        Self {
            options: IngestOptions::from_config(config),
            geo,
            metadata,
            generator,
            store: AssetStore::new(&config.assets),
            progress_tx: None,
        }
    }

    /// Index these directories instead of the configured library roots.
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.options.library.roots = roots;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<ScanProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    fn send(&self, progress: ScanProgress) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(progress);
        }
    }

    fn context<'s>(&'s self, run: &'s RunIndex) -> IngestContext<'s> {
        IngestContext {
            options: &self.options,
            geo: self.geo,
            metadata: self.metadata,
            generator: self.generator,
            store: &self.store,
            run,
        }
    }

    fn open_database(&self) -> Result<Database> {
        Database::open_path(&self.options.database, self.options.busy_timeout)
    }

    pub fn index(&self) -> Result<ScanSummary> {
        let roots = &self.options.library.roots;
        let paths = discover_images(roots, &self.options.library.image_extensions)?;
        info!(roots = ?roots, files = paths.len(), "starting index run");
        self.send(ScanProgress::Started {
            total_files: paths.len(),
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .thread_name(|i| format!("ingest-{}", i))
            .build()
            .context("Failed to build worker pool")?;

        let mut summary = ScanSummary {
            found: paths.len(),
            ..ScanSummary::default()
        };

        let hashed = pool.install(|| self.hash_all(&paths))?;
        summary.failed += paths.len() - hashed.len();

        let db = self.open_database()?;
        db.initialize()?;
        let catalog = db.catalog().with_retry(self.options.retry);
        let scan_id = catalog.start_scan(roots)?;

        let result = self.ingest(&pool, &catalog, &hashed);
        match result {
            Ok(ingested) => {
                summary.merge(&ingested);
                catalog.finish_scan(scan_id, &summary, ScanStatus::Completed)?;
                info!(%summary, "index run finished");
                self.send(ScanProgress::Completed { summary });
                Ok(summary)
            }
            Err(e) => {
                if let Err(finish_err) = catalog.finish_scan(scan_id, &summary, ScanStatus::Failed) {
                    warn!("failed to record scan failure: {:#}", finish_err);
                }
                self.send(ScanProgress::Error {
                    message: format!("{:#}", e),
                });
                Err(e)
            }
        }
    }

    /// Content hashes of every readable file. Unreadable ones are logged
    /// and left out.
    fn hash_all(&self, paths: &[PathBuf]) -> Result<Vec<(PathBuf, String)>> {
        let hasher = ContentHasher::new(self.options.hash_chunk_size, self.options.hash_threads)?;

        let hashed = paths
            .par_iter()
            .filter_map(|path| match hasher.content_hash(path) {
                Ok(hash) => Some((path.clone(), hash)),
                Err(e) => {
                    let err = FileError::unprocessable(path, Stage::Fingerprint, e);
                    warn!("{}", err);
                    self.send(ScanProgress::Error {
                        message: err.to_string(),
                    });
                    None
                }
            })
            .collect();
        Ok(hashed)
    }

    fn ingest(
        &self,
        pool: &rayon::ThreadPool,
        catalog: &Catalog,
        hashed: &[(PathBuf, String)],
    ) -> Result<ScanSummary> {
        let index = CatalogIndex::load(catalog)?;
        let classification = classify(hashed, &index);
        info!(
            new = classification.new.len(),
            moved = classification.moved.len(),
            changed = classification.changed.len(),
            unchanged = classification.unchanged.len(),
            "files classified"
        );
        self.send(ScanProgress::Classified {
            new: classification.new.len(),
            moved: classification.moved.len(),
            changed: classification.changed.len(),
            unchanged: classification.unchanged.len(),
        });

        let run = RunIndex::new(&classification);
        let Classification {
            new,
            moved,
            changed,
            unchanged,
        } = classification;

        let mut summary = ScanSummary {
            unchanged: unchanged.len(),
            ..ScanSummary::default()
        };

        // Moves first so that a path freed by a move is seen as such by
        // the changed and new phases.
        let phases: [Vec<Task>; 3] = [
            moved.into_iter().map(Task::Moved).collect(),
            changed.into_iter().map(Task::Changed).collect(),
            new.into_iter().map(Task::New).collect(),
        ];
        let total: usize = phases.iter().map(Vec::len).sum();
        let processed = AtomicUsize::new(0);

        for tasks in &phases {
            if tasks.is_empty() {
                continue;
            }
            let phase = pool.install(|| {
                tasks
                    .par_chunks(self.options.batch_size)
                    .map(|batch| match self.run_batch(&run, batch, &processed, total) {
                        Ok(batch_summary) => batch_summary,
                        Err(e) => {
                            error!(files = batch.len(), "batch rolled back: {:#}", e);
                            self.send(ScanProgress::Error {
                                message: format!("batch of {} files rolled back: {:#}", batch.len(), e),
                            });
                            ScanSummary {
                                failed: batch.len(),
                                ..ScanSummary::default()
                            }
                        }
                    })
                    .reduce(ScanSummary::default, |mut a, b| {
                        a.merge(&b);
                        a
                    })
            });
            summary.merge(&phase);
        }

        Ok(summary)
    }

    /// One transaction over `batch`, one savepoint per file.
    fn run_batch(
        &self,
        run: &RunIndex,
        batch: &[Task],
        processed: &AtomicUsize,
        total: usize,
    ) -> Result<ScanSummary> {
        let ctx = self.context(run);
        let mut summary = ScanSummary::default();

        let prepared: Vec<_> = batch.iter().map(|task| (task, ingest::prepare(&ctx, task))).collect();

        let mut db = self.open_database()?;
        let mut tx = db.transaction()?;

        for (task, prepared) in prepared {
            let current = processed.fetch_add(1, Ordering::Relaxed) + 1;
            self.send(ScanProgress::Processing {
                current,
                total,
                path: task.path().to_string_lossy().to_string(),
            });

            let prepared = match prepared {
                Ok(p) => p,
                Err(e) if is_file_local(&e) => {
                    self.file_failed(&e);
                    summary.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let sp = tx.savepoint()?;
            let outcome = ingest::apply(&Catalog::new(&sp).with_retry(self.options.retry), &ctx, &prepared);
            match outcome {
                Ok(outcome) => {
                    sp.commit()?;
                    match outcome {
                        Outcome::Created(_) => summary.new += 1,
                        Outcome::Moved(_) => summary.moved += 1,
                        Outcome::Updated(_) => summary.changed += 1,
                        Outcome::Skipped => summary.skipped += 1,
                    }
                }
                Err(e) if is_file_local(&e) => {
                    // dropping the savepoint rolls it back
                    drop(sp);
                    self.file_failed(&e);
                    summary.failed += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("while ingesting {}", task.path().display())));
                }
            }
        }

        tx.commit()?;
        debug!(files = batch.len(), "batch committed");
        Ok(summary)
    }

    fn file_failed(&self, err: &anyhow::Error) {
        warn!("{:#}", err);
        self.send(ScanProgress::Error {
            message: format!("{:#}", err),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DerivedSizes;
    use crate::metadata::{Keyword, MetadataRecord};
    use anyhow::bail;
    use image::{Rgb, RgbImage};
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct FakeMetadata {
        records: Mutex<HashMap<PathBuf, MetadataRecord>>,
        broken: Mutex<HashSet<PathBuf>>,
    }

    impl FakeMetadata {
        fn set(&self, path: &Path, record: MetadataRecord) {
            self.records.lock().unwrap().insert(path.to_path_buf(), record);
        }
    }

    impl MetadataBackend for FakeMetadata {
        fn read(&self, path: &Path) -> Result<MetadataRecord> {
            if self.broken.lock().unwrap().contains(path) {
                bail!("corrupt metadata block");
            }
            Ok(self.records.lock().unwrap().get(path).cloned().unwrap_or_default())
        }

        fn write(&self, _path: &Path, _record: &MetadataRecord) -> Result<()> {
            Ok(())
        }
    }

    struct FakeAssets;

    impl AssetGenerator for FakeAssets {
        fn render(&self, _input: &Path, _spec: &AssetSpec) -> Result<RenderedAssets> {
            Ok(RenderedAssets {
                thumbnail: b"thumb".to_vec(),
                large: b"large".to_vec(),
                sizes: DerivedSizes {
                    thumbnail_width: 8,
                    thumbnail_height: 8,
                    large_width: 16,
                    large_height: 16,
                },
            })
        }
    }

    struct Fixture {
        dir: TempDir,
        config: Config,
        geo: GeoTable,
        metadata: FakeMetadata,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let mut config = Config::default();
            config.database.path = dir.path().join("catalog.db");
            config.database.busy_timeout_ms = 10_000;
            config.library.roots = vec![dir.path().join("photos")];
            config.assets.thumbnail_dir = dir.path().join("thumbs");
            config.assets.large_dir = dir.path().join("large");
            config.assets.lock_dir = dir.path().join("locks");
            config.scanner.workers = 2;
            config.scanner.batch_size = 2;
            config.scanner.lock_timeout_secs = 5;
            fs::create_dir_all(dir.path().join("photos")).unwrap();

            Self {
                dir,
                config,
                geo: GeoTable::builtin().unwrap(),
                metadata: FakeMetadata::default(),
            }
        }

        fn photo(&self, rel: &str) -> PathBuf {
            self.dir.path().join("photos").join(rel)
        }

        fn write_image(&self, rel: &str, seed: u8) -> PathBuf {
            let path = self.photo(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            RgbImage::from_fn(16, 16, |x, y| Rgb([seed, (x * 16) as u8, (y * 16) as u8]))
                .save(&path)
                .unwrap();
            path
        }

        fn scanner(&self) -> Scanner<'_> {
            Scanner::new(&self.config, &self.geo, &self.metadata, &FakeAssets)
        }

        fn index(&self) -> ScanSummary {
            self.scanner().index().unwrap()
        }

        fn db(&self) -> Database {
            Database::open(&self.config.database).unwrap()
        }
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let fx = Fixture::new();
        fx.write_image("a.png", 1);
        fx.write_image("2021/b.png", 2);
        fx.write_image("2021/c.png", 3);

        let (tx, rx) = mpsc::channel();
        let first = fx.scanner().with_progress(tx).index().unwrap();
        assert_eq!((first.found, first.new, first.failed), (3, 3, 0));

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(ScanProgress::Started { total_files: 3 })));
        assert!(matches!(events.last(), Some(ScanProgress::Completed { .. })));

        let db = fx.db();
        let catalog = db.catalog();
        let image = catalog.find_image_by_path(&fx.photo("a.png")).unwrap().unwrap();
        assert!(!image.dirty);
        assert_eq!((image.width, image.height), (16, 16));
        assert_eq!(image.large_width, 16);
        assert!(AssetStore::new(&fx.config.assets).thumbnail_path(image.id).exists());
        let before = catalog.stats().unwrap();

        let second = fx.index();
        assert_eq!(second.unchanged, 3);
        assert_eq!(second.new + second.moved + second.changed + second.failed, 0);
        assert_eq!(catalog.stats().unwrap(), before);
        assert!(catalog.dirty_images().unwrap().is_empty());

        let (_, recorded, status) = catalog.last_scan().unwrap().unwrap();
        assert_eq!(recorded, second);
        assert_eq!(status, "completed");
    }

    #[test]
    fn test_folder_chain_follows_directories() {
        let fx = Fixture::new();
        let a = fx.write_image("2020/trip/a.png", 1);
        let b = fx.write_image("2020/b.png", 2);
        let c = fx.write_image("c.png", 3);
        fx.index();

        let db = fx.db();
        let catalog = db.catalog();
        let folder_of = |path: &Path| catalog.find_image_by_path(path).unwrap().unwrap().folder_id;

        let chain: Vec<String> = catalog
            .folder_ancestors(folder_of(&a))
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(chain, vec!["2020", "trip"]);

        let year = catalog.get_folder(folder_of(&b)).unwrap().unwrap();
        assert_eq!(year.name, "2020");
        assert_eq!(year.parent_id, None);
        assert_eq!(catalog.folder_children(Some(year.id)).unwrap().len(), 1);

        let top = catalog.get_folder(folder_of(&c)).unwrap().unwrap();
        assert_eq!(top.name, "photos");
    }

    #[test]
    fn test_moved_file_keeps_its_image() {
        let fx = Fixture::new();
        let old = fx.write_image("a.png", 1);
        fx.index();
        let db = fx.db();
        let id = db.catalog().find_image_by_path(&old).unwrap().unwrap().id;

        let new = fx.photo("sorted/a.png");
        fs::create_dir_all(new.parent().unwrap()).unwrap();
        fs::rename(&old, &new).unwrap();

        let summary = fx.index();
        assert_eq!((summary.moved, summary.new), (1, 0));

        let moved = db.catalog().find_image_by_path(&new).unwrap().unwrap();
        assert_eq!(moved.id, id);
        let folder = db.catalog().get_folder(moved.folder_id).unwrap().unwrap();
        assert_eq!(folder.name, "sorted");
        assert!(db.catalog().find_image_by_path(&old).unwrap().is_none());
    }

    #[test]
    fn test_copy_of_cataloged_file_is_skipped() {
        let fx = Fixture::new();
        let original = fx.write_image("a.png", 1);
        fx.index();
        fs::copy(&original, fx.photo("copy.png")).unwrap();

        let summary = fx.index();
        assert_eq!((summary.skipped, summary.new, summary.moved), (1, 0, 0));
        assert_eq!(fx.db().catalog().stats().unwrap().images, 1);
    }

    #[test]
    fn test_replaced_file_after_move_is_a_new_image() {
        let fx = Fixture::new();
        let a = fx.write_image("a.png", 1);
        fx.index();
        let db = fx.db();
        let id = db.catalog().find_image_by_path(&a).unwrap().unwrap().id;

        let b = fx.photo("b.png");
        fs::rename(&a, &b).unwrap();
        fx.write_image("a.png", 2);

        let summary = fx.index();
        assert_eq!(
            (summary.moved, summary.new, summary.changed, summary.skipped),
            (1, 1, 0, 0)
        );

        let catalog = db.catalog();
        assert_eq!(catalog.find_image_by_path(&b).unwrap().unwrap().id, id);
        let replacement = catalog.find_image_by_path(&a).unwrap().unwrap();
        assert_ne!(replacement.id, id);

        let third = fx.index();
        assert_eq!((third.unchanged, third.found), (2, 2));
    }

    #[test]
    fn test_two_copies_of_a_moved_file_keep_one_image() {
        let fx = Fixture::new();
        let a = fx.write_image("a.png", 1);
        fx.index();

        let b = fx.photo("b.png");
        fs::rename(&a, &b).unwrap();
        fs::copy(&b, fx.photo("c.png")).unwrap();

        let summary = fx.index();
        assert_eq!((summary.moved, summary.skipped, summary.new), (1, 1, 0));
        assert_eq!(fx.db().catalog().stats().unwrap().images, 1);
    }

    #[test]
    fn test_swapped_contents_follow_their_paths() {
        let fx = Fixture::new();
        let a = fx.write_image("a.png", 1);
        let b = fx.write_image("b.png", 2);
        fx.index();
        let db = fx.db();
        let id_a = db.catalog().find_image_by_path(&a).unwrap().unwrap().id;
        let id_b = db.catalog().find_image_by_path(&b).unwrap().unwrap().id;

        let (bytes_a, bytes_b) = (fs::read(&a).unwrap(), fs::read(&b).unwrap());
        fs::write(&a, &bytes_b).unwrap();
        fs::write(&b, &bytes_a).unwrap();

        let summary = fx.index();
        assert_eq!((summary.changed, summary.skipped, summary.failed), (2, 0, 0));

        let catalog = db.catalog();
        let now_a = catalog.find_image_by_path(&a).unwrap().unwrap();
        let now_b = catalog.find_image_by_path(&b).unwrap().unwrap();
        assert_eq!((now_a.id, now_b.id), (id_a, id_b));
        assert_eq!(now_a.content_hash, content_hash(&b).unwrap());
        assert_eq!(now_b.content_hash, content_hash(&a).unwrap());

        let second = fx.index();
        assert_eq!((second.unchanged, second.changed, second.skipped), (2, 0, 0));
    }

    #[test]
    fn test_two_files_edited_to_the_same_content_keep_one_owner() {
        let fx = Fixture::new();
        let a = fx.write_image("a.png", 1);
        let b = fx.write_image("b.png", 2);
        fx.index();
        let db = fx.db();
        let id_a = db.catalog().find_image_by_path(&a).unwrap().unwrap().id;

        fx.write_image("a.png", 9);
        fx.write_image("b.png", 9);

        let first = fx.index();
        assert_eq!((first.changed, first.skipped), (1, 1));
        let owner = db.catalog().find_image_by_hash(&content_hash(&a).unwrap()).unwrap().unwrap();
        assert_eq!(owner.id, id_a);

        let second = fx.index();
        assert_eq!((second.unchanged, second.skipped, second.changed), (1, 1, 0));
    }

    #[test]
    fn test_changed_content_rederives_metadata() {
        let fx = Fixture::new();
        let path = fx.write_image("a.png", 1);
        fx.metadata.set(
            &path,
            MetadataRecord {
                keywords: vec![Keyword::branch("Trips", vec![Keyword::leaf("Beach")])],
                ..MetadataRecord::default()
            },
        );
        fx.index();

        let db = fx.db();
        let before = db.catalog().find_image_by_path(&path).unwrap().unwrap();
        assert_eq!(db.catalog().image_tags(before.id).unwrap().len(), 2);

        fx.write_image("a.png", 200);
        fx.metadata.set(
            &path,
            MetadataRecord {
                title: Some("Winter".to_string()),
                keywords: vec![Keyword::leaf("Snow")],
                ..MetadataRecord::default()
            },
        );

        let summary = fx.index();
        assert_eq!(summary.changed, 1);

        let after = db.catalog().find_image_by_path(&path).unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_ne!(after.content_hash, before.content_hash);
        assert_eq!(after.title.as_deref(), Some("Winter"));
        assert!(!after.dirty);

        let tags = db.catalog().image_tags(after.id).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag.name, "Snow");
        assert!(tags[0].applied);
    }

    #[test]
    fn test_unreadable_metadata_skips_only_that_file() {
        let fx = Fixture::new();
        fx.write_image("a.png", 1);
        let bad = fx.write_image("b.png", 2);
        fx.metadata.broken.lock().unwrap().insert(bad.clone());

        let summary = fx.index();
        assert_eq!((summary.new, summary.failed), (1, 1));
        assert!(fx.db().catalog().find_image_by_path(&bad).unwrap().is_none());

        fx.metadata.broken.lock().unwrap().clear();
        let summary = fx.index();
        assert_eq!((summary.new, summary.unchanged), (1, 1));
    }

    #[test]
    fn test_asset_write_failure_rolls_back_the_file() {
        let fx = Fixture::new();
        fx.write_image("a.png", 1);
        // a directory where the first thumbnail would be written
        let blocker = AssetStore::new(&fx.config.assets).thumbnail_path(1);
        fs::create_dir_all(&blocker).unwrap();

        let summary = fx.index();
        assert_eq!((summary.new, summary.failed), (0, 1));
        let stats = fx.db().catalog().stats().unwrap();
        assert_eq!((stats.images, stats.folders), (0, 0));

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(fx.index().new, 1);
    }
}
