//! Write canonical catalog state back into the files of dirty images.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::db::{Catalog, ImageRecord};
use crate::error::{is_file_local, FileError, Stage};
use crate::geo::GeoTable;
use crate::metadata::{Area, Keyword, MetadataBackend, MetadataRecord, Region, RegionKind, DATES_ROOT};
use crate::model::{BoundingBox, RoughDate, RoughLocation, MONTH_NAMES};
use crate::scanner::ContentHasher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub written: usize,
    pub cleared: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Written,
    /// Nothing in the catalog had to go into the file.
    Cleared,
}

pub struct MetadataSync<'a> {
    backend: &'a dyn MetadataBackend,
    geo: &'a GeoTable,
    hasher: ContentHasher,
}

impl<'a> MetadataSync<'a> {
    pub fn new(backend: &'a dyn MetadataBackend, geo: &'a GeoTable) -> Self {
        Self {
            backend,
            geo,
            hasher: ContentHasher::default(),
        }
    }

    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Sync every dirty, non-deleted image. A file that cannot be read or
    /// written stays dirty and is retried on the next pass.
    pub fn sync_dirty(&self, catalog: &Catalog) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        for image in catalog.dirty_images()? {
            match self.sync_image(catalog, &image) {
                Ok(SyncOutcome::Written) => summary.written += 1,
                Ok(SyncOutcome::Cleared) => summary.cleared += 1,
                Err(e) if is_file_local(&e) => {
                    warn!("{:#}", e);
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if summary != SyncSummary::default() {
            info!(
                written = summary.written,
                cleared = summary.cleared,
                failed = summary.failed,
                "metadata sync finished"
            );
        }
        Ok(summary)
    }

    pub fn sync_image(&self, catalog: &Catalog, image: &ImageRecord) -> Result<SyncOutcome> {
        let path = &image.original_path;
        let on_file =
            |e: anyhow::Error| -> anyhow::Error { FileError::unprocessable(path, Stage::Sync, e).into() };

        let existing = self.backend.read(path).map_err(on_file)?;
        let Some(record) = build_record(catalog, image, &existing.keywords, self.geo)? else {
            debug!(path = %path.display(), image_id = image.id, "nothing to write, clearing dirty flag");
            catalog.mark_clean(image.id)?;
            return Ok(SyncOutcome::Cleared);
        };

        self.backend.write(path, &record).map_err(on_file)?;
        let content_hash = self.hasher.content_hash(path).map_err(on_file)?;
        let file_size = file_size(path).map_err(on_file)?;

        catalog.set_image_content(image.id, &content_hash, None, file_size)?;
        catalog.mark_clean(image.id)?;
        info!(path = %path.display(), image_id = image.id, "metadata written to file");
        Ok(SyncOutcome::Written)
    }
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Record holding the canonical state of `image`, or `None` when the
/// catalog has nothing to say about it.
///
/// `existing_keywords` are the keywords currently in the file. Their
/// non-date roots are carried over unchanged; the date branch is rebuilt
/// from the catalog.
pub fn build_record(
    catalog: &Catalog,
    image: &ImageRecord,
    existing_keywords: &[Keyword],
    geo: &GeoTable,
) -> Result<Option<MetadataRecord>> {
    let mut record = MetadataRecord {
        title: image.title.clone(),
        description: image.description.clone(),
        orientation: image.orientation,
        ..MetadataRecord::default()
    };

    for person in catalog.image_people(image.id)? {
        record.regions.push(region(RegionKind::Face, person.person.name, &person.bbox, person.description));
    }
    for pet in catalog.image_pets(image.id)? {
        record.regions.push(region(RegionKind::Pet, pet.pet.name, &pet.bbox, pet.description));
    }

    if let Some(location) = image.location_id.map(|id| catalog.get_location(id)).transpose()?.flatten() {
        set_location(&mut record, &location, geo);
    }

    let date = image.date_id.map(|id| catalog.get_date(id)).transpose()?.flatten();

    let populated = record.title.is_some()
        || record.description.is_some()
        || record.orientation.is_some()
        || !record.regions.is_empty()
        || record.country.is_some()
        || date.is_some();
    if !populated {
        return Ok(None);
    }

    record.keywords = existing_keywords
        .iter()
        .filter(|k| !k.name.eq_ignore_ascii_case(DATES_ROOT))
        .cloned()
        .collect();
    if let Some(date) = date {
        record.keywords.push(date_keywords(&date));
    }

    Ok(Some(record))
}

fn region(kind: RegionKind, name: String, bbox: &BoundingBox, description: Option<String>) -> Region {
    Region {
        kind,
        name,
        area: Area {
            x: bbox.center_x,
            y: bbox.center_y,
            w: bbox.width,
            h: bbox.height,
        },
        description,
    }
}

fn set_location(record: &mut MetadataRecord, location: &RoughLocation, geo: &GeoTable) {
    let country = geo
        .country(&location.country)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| location.country.clone());
    record.country = Some(country);
    record.state = location.subdivision.clone();
    record.city = location.city.clone();
    record.location = location.sub_location.clone();
}

/// `Dates → YYYY → "MM - Month" → DD`, cut off at the first part that is
/// not known.
pub fn date_keywords(date: &RoughDate) -> Keyword {
    let mut year = Keyword::leaf(format!("{:04}", date.year()));
    if let Some(month) = date.month() {
        let mut month_node = Keyword::leaf(format!("{:02} - {}", month, MONTH_NAMES[month as usize - 1]));
        if let Some(day) = date.day() {
            month_node.children.push(Keyword::leaf(format!("{:02}", day)));
        }
        year.children.push(month_node);
    }
    Keyword::branch(DATES_ROOT, vec![year])
}
