//! Per-file ingestion steps.
//!
//! Work is split in two. [`prepare`] does the slow file I/O (decoding,
//! metadata extraction, rendering) without touching the catalog. [`apply`]
//! then writes the result through a [`Catalog`] bound to the file's
//! savepoint. Errors wrapped in [`FileError`] only cost the file; anything
//! else aborts the batch.

use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::change_detection::{Classification, Discovered, Matched};
use super::hashing::perceptual_hash;
use super::thumbnails::{AssetGenerator, AssetSpec, AssetStore, RenderedAssets};
use crate::config::{Config, LibraryConfig};
use crate::db::{Catalog, GroupTable, ImageDetails, ImageRecord, NewImage, RetryPolicy};
use crate::error::{FileError, Stage};
use crate::geo::GeoTable;
use crate::interpret::{apply_keywords, apply_regions, build_folder_chain};
use crate::lock::{FileLock, METADATA_UPDATE_LOCK};
use crate::metadata::{MetadataBackend, MetadataRecord};
use crate::model::{GroupMode, GroupSet};

/// Parameters of an indexing run, threaded by reference through every
/// stage.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub database: PathBuf,
    pub busy_timeout: Duration,
    pub library: LibraryConfig,
    pub groups: GroupSet,
    pub group_mode: GroupMode,
    pub assets: AssetSpec,
    pub lock_path: PathBuf,
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub workers: usize,
    pub hash_chunk_size: usize,
    pub hash_threads: usize,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        let permissions = &config.permissions;
        Self {
            database: config.database.path.clone(),
            busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
            library: config.library.clone(),
            groups: GroupSet::new(permissions.view_groups.iter(), permissions.edit_groups.iter()),
            group_mode: if permissions.overwrite {
                GroupMode::Overwrite
            } else {
                GroupMode::Merge
            },
            assets: AssetSpec::from(&config.assets),
            lock_path: FileLock::path_for(&config.assets.lock_dir, METADATA_UPDATE_LOCK),
            lock_timeout: config.scanner.lock_timeout(),
            retry: RetryPolicy::from(&config.scanner),
            batch_size: config.scanner.batch_size.max(1),
            workers: config.scanner.workers.max(1),
            hash_chunk_size: config.scanner.hash_chunk_size,
            hash_threads: config.scanner.hash_threads,
        }
    }

    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.library.root_for(path)
    }

    fn lock(&self) -> Result<FileLock> {
        Ok(FileLock::acquire(&self.lock_path, self.lock_timeout)?)
    }
}

/// Image ids the classification put in each class, for decisions that
/// depend on files other than the one being applied.
#[derive(Debug, Clone, Default)]
pub struct RunIndex {
    unchanged: HashSet<i64>,
    /// Changed image id to the hash its file now has.
    changed: HashMap<i64, String>,
}

impl RunIndex {
    pub fn new(classification: &Classification) -> Self {
        Self {
            unchanged: classification.unchanged.iter().map(|m| m.entity.id).collect(),
            changed: classification
                .changed
                .iter()
                .map(|m| (m.entity.id, m.content_hash.clone()))
                .collect(),
        }
    }

    /// The image's cataloged path was found this run with the same content.
    pub fn still_present(&self, id: i64) -> bool {
        self.unchanged.contains(&id)
    }

    /// Hash of the new content found at the image's cataloged path, when
    /// that content changed.
    pub fn incoming_hash(&self, id: i64) -> Option<&str> {
        self.changed.get(&id).map(String::as_str)
    }
}

/// Collaborators shared by every worker.
#[derive(Clone, Copy)]
pub struct IngestContext<'a> {
    pub options: &'a IngestOptions,
    pub geo: &'a GeoTable,
    pub metadata: &'a dyn MetadataBackend,
    pub generator: &'a dyn AssetGenerator,
    pub store: &'a AssetStore,
    pub run: &'a RunIndex,
}

#[derive(Debug, Clone)]
pub enum Task {
    New(Discovered),
    Moved(Matched),
    Changed(Matched),
}

impl Task {
    pub fn path(&self) -> &Path {
        match self {
            Task::New(d) => &d.path,
            Task::Moved(m) | Task::Changed(m) => &m.path,
        }
    }
}

/// Everything read from a file that is about to be (re)cataloged.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub path: PathBuf,
    pub content_hash: String,
    pub perceptual_hash: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub record: MetadataRecord,
    pub assets: RenderedAssets,
}

#[derive(Debug, Clone)]
pub enum Prepared {
    New(Extracted),
    Moved(Matched),
    Changed { entity_id: i64, extracted: Extracted },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(i64),
    Moved(i64),
    Updated(i64),
    Skipped,
}

fn file_error(path: &Path, stage: Stage) -> impl FnOnce(anyhow::Error) -> anyhow::Error + '_ {
    move |source| FileError::unprocessable(path, stage, source).into()
}

/// Read everything a task needs from disk.
pub fn prepare(ctx: &IngestContext, task: &Task) -> Result<Prepared> {
    match task {
        Task::New(d) => Ok(Prepared::New(extract(ctx, &d.path, &d.content_hash)?)),
        Task::Moved(m) => Ok(Prepared::Moved(m.clone())),
        Task::Changed(m) => Ok(Prepared::Changed {
            entity_id: m.entity.id,
            extracted: extract(ctx, &m.path, &m.content_hash)?,
        }),
    }
}

fn extract(ctx: &IngestContext, path: &Path, content_hash: &str) -> Result<Extracted> {
    let file_size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))
        .map_err(file_error(path, Stage::Fingerprint))?
        .len();
    let phash = perceptual_hash(path).map_err(file_error(path, Stage::Fingerprint))?;

    let record = ctx
        .metadata
        .read(path)
        .map_err(file_error(path, Stage::Extract))?;

    let (width, height) = match (record.width, record.height) {
        (Some(w), Some(h)) => (w, h),
        _ => image::image_dimensions(path)
            .map_err(anyhow::Error::from)
            .map_err(file_error(path, Stage::Extract))?,
    };

    let assets = ctx
        .generator
        .render(path, &ctx.options.assets)
        .map_err(file_error(path, Stage::Assets))?;

    Ok(Extracted {
        path: path.to_path_buf(),
        content_hash: content_hash.to_string(),
        perceptual_hash: phash,
        file_size,
        width,
        height,
        record,
        assets,
    })
}

/// Write a prepared file into the catalog.
pub fn apply(catalog: &Catalog, ctx: &IngestContext, prepared: &Prepared) -> Result<Outcome> {
    match prepared {
        Prepared::New(extracted) => apply_new(catalog, ctx, extracted),
        Prepared::Moved(matched) => apply_moved(catalog, ctx, matched),
        Prepared::Changed {
            entity_id,
            extracted,
        } => apply_changed(catalog, ctx, *entity_id, extracted),
    }
}

fn root_of<'o>(ctx: &IngestContext<'o>, path: &Path) -> Result<&'o Path> {
    ctx.options
        .root_for(path)
        .ok_or_else(|| anyhow!("{} is not under any library root", path.display()))
        .map_err(file_error(path, Stage::Folder))
}

fn apply_new(catalog: &Catalog, ctx: &IngestContext, extracted: &Extracted) -> Result<Outcome> {
    let path = &extracted.path;
    let options = ctx.options;

    if let Some(existing) = catalog.find_image_by_hash(&extracted.content_hash)? {
        warn!(
            path = %path.display(),
            duplicate_of = existing.id,
            duplicate_path = %existing.original_path.display(),
            "same content already cataloged, skipping"
        );
        return Ok(Outcome::Skipped);
    }

    let root = root_of(ctx, path)?;
    let folder = {
        let _lock = options.lock()?;
        build_folder_chain(catalog, root, path, &options.groups, options.group_mode)?
    };
    let source_id = catalog.get_or_create_source(&root.to_string_lossy())?;

    let id = catalog.insert_image(&NewImage {
        content_hash: &extracted.content_hash,
        perceptual_hash: Some(&extracted.perceptual_hash),
        original_path: path,
        file_size: extracted.file_size,
        folder_id: folder.id,
        source_id: Some(source_id),
    })?;
    catalog.apply_groups(GroupTable::Image, id, &options.groups, GroupMode::Merge)?;

    store_assets(catalog, ctx, id, extracted)?;
    interpret(catalog, ctx, id, extracted)?;
    catalog.mark_clean(id)?;

    info!(path = %path.display(), image_id = id, "cataloged new image");
    Ok(Outcome::Created(id))
}

fn apply_moved(catalog: &Catalog, ctx: &IngestContext, matched: &Matched) -> Result<Outcome> {
    let path = &matched.path;
    let options = ctx.options;

    let Some(entity) = catalog.get_image(matched.entity.id)? else {
        warn!(path = %path.display(), image_id = matched.entity.id, "moved image no longer cataloged, skipping");
        return Ok(Outcome::Skipped);
    };
    // The content is still at its cataloged path, or another copy already
    // took the image earlier in this run.
    if ctx.run.still_present(entity.id) || entity.original_path != matched.entity.path {
        warn!(
            path = %path.display(),
            image_id = entity.id,
            original = %entity.original_path.display(),
            "duplicate copy of a cataloged image, skipping"
        );
        return Ok(Outcome::Skipped);
    }

    let root = root_of(ctx, path)?;
    let folder = {
        let _lock = options.lock()?;
        build_folder_chain(catalog, root, path, &options.groups, options.group_mode)?
    };

    catalog.set_image_path(entity.id, path, folder.id)?;
    catalog.apply_groups(GroupTable::Image, entity.id, &options.groups, options.group_mode)?;
    catalog.mark_clean(entity.id)?;

    info!(
        from = %entity.original_path.display(),
        to = %path.display(),
        image_id = entity.id,
        "image moved"
    );
    Ok(Outcome::Moved(entity.id))
}

fn apply_changed(
    catalog: &Catalog,
    ctx: &IngestContext,
    entity_id: i64,
    extracted: &Extracted,
) -> Result<Outcome> {
    let path = &extracted.path;

    let entity: Option<ImageRecord> = catalog.get_image(entity_id)?;
    let Some(entity) = entity.filter(|e| e.original_path == *path) else {
        // The image left this path earlier in the run, so the file here is
        // a newcomer.
        debug!(path = %path.display(), image_id = entity_id, "changed file lost its image, cataloging as new");
        return apply_new(catalog, ctx, extracted);
    };

    if let Some(other) = catalog.find_image_by_hash(&extracted.content_hash)? {
        if other.id != entity.id {
            let owner_leaving = ctx
                .run
                .incoming_hash(other.id)
                .is_some_and(|incoming| incoming != extracted.content_hash);
            if !owner_leaving {
                warn!(
                    path = %path.display(),
                    image_id = entity.id,
                    duplicate_of = other.id,
                    duplicate_path = %other.original_path.display(),
                    "edited file now duplicates another cataloged image, skipping"
                );
                return Ok(Outcome::Skipped);
            }
            // The owner's file changed too, so its own task stores its new
            // hash. Until then it holds a placeholder.
            debug!(
                path = %path.display(),
                image_id = entity.id,
                from_image = other.id,
                "taking over content hash from another changed image"
            );
            catalog.release_content_hash(other.id)?;
        }
    }

    store_assets(catalog, ctx, entity.id, extracted)?;
    {
        let _lock = ctx.options.lock()?;
        catalog.clear_image_tags(entity.id)?;
        catalog.clear_image_regions(entity.id)?;
        catalog.set_image_location(entity.id, None)?;
        catalog.set_image_date(entity.id, None)?;
    }
    interpret(catalog, ctx, entity.id, extracted)?;
    catalog.set_image_content(
        entity.id,
        &extracted.content_hash,
        Some(&extracted.perceptual_hash),
        extracted.file_size,
    )?;
    catalog.mark_clean(entity.id)?;

    info!(path = %path.display(), image_id = entity.id, "image content changed, re-derived");
    Ok(Outcome::Updated(entity.id))
}

fn store_assets(catalog: &Catalog, ctx: &IngestContext, id: i64, extracted: &Extracted) -> Result<()> {
    ctx.store
        .store(id, &extracted.assets)
        .map_err(file_error(&extracted.path, Stage::Assets))?;
    catalog.set_derived_sizes(id, &extracted.assets.sizes)
}

/// Regions, keywords, date and location under the metadata-update lock,
/// then the plain descriptive fields.
fn interpret(catalog: &Catalog, ctx: &IngestContext, id: i64, extracted: &Extracted) -> Result<()> {
    let record = &extracted.record;
    let options = ctx.options;

    let (regions, keywords) = {
        let _lock = options.lock()?;
        let regions = apply_regions(catalog, id, &record.regions, &options.groups, options.group_mode)?;
        let keywords = apply_keywords(catalog, id, record, ctx.geo)?;
        (regions, keywords)
    };
    debug!(
        image_id = id,
        people = regions.people,
        pets = regions.pets,
        tags = keywords.tags,
        date = ?keywords.date.map(|d| d.to_string()),
        location = ?keywords.location,
        "metadata interpreted"
    );

    catalog.set_image_details(
        id,
        &ImageDetails {
            title: record.title.as_deref(),
            description: record.description.as_deref(),
            orientation: record.orientation,
            width: extracted.width,
            height: extracted.height,
        },
    )
}
