//! Hard deletion of images that stayed soft-deleted past the retention
//! period.

use anyhow::Result;
use tracing::{info, warn};

use crate::db::Catalog;
use crate::scanner::AssetStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapResult {
    pub images_removed: usize,
    /// Bytes of derived assets deleted alongside the rows.
    pub bytes_freed: u64,
}

/// Remove every image soft-deleted more than `retention_days` ago,
/// together with its thumbnail and large rendition. The original file is
/// left alone.
pub fn reap(catalog: &Catalog, store: &AssetStore, retention_days: u32) -> Result<ReapResult> {
    let mut result = ReapResult::default();

    for image in catalog.expired_deletions(retention_days)? {
        let bytes: u64 = [store.thumbnail_path(image.id), store.large_path(image.id)]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        if let Err(e) = store.remove(image.id) {
            warn!(image_id = image.id, "keeping image, failed to remove its assets: {:#}", e);
            continue;
        }
        catalog.delete_image(image.id)?;

        info!(
            image_id = image.id,
            path = %image.original_path.display(),
            deleted_at = image.deleted_at.as_deref().unwrap_or_default(),
            "reaped image"
        );
        result.images_removed += 1;
        result.bytes_freed += bytes;
    }

    Ok(result)
}
