use anyhow::{bail, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use super::retry::get_or_create;
use super::Catalog;
use crate::model::{BoundingBox, RoughDate, RoughLocation};

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: i64,
    pub content_hash: String,
    pub perceptual_hash: Option<String>,
    pub original_path: PathBuf,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub large_width: u32,
    pub large_height: u32,
    pub orientation: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub folder_id: i64,
    pub source_id: Option<i64>,
    pub location_id: Option<i64>,
    pub date_id: Option<i64>,
    pub dirty: bool,
    pub starred: bool,
    pub deleted_at: Option<String>,
}

const IMAGE_COLUMNS: &str = "id, content_hash, perceptual_hash, original_path, file_size,
    width, height, thumbnail_width, thumbnail_height, large_width, large_height, orientation,
    title, description, folder_id, source_id, location_id, date_id, dirty, starred, deleted_at";

impl ImageRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ImageRecord {
            id: row.get(0)?,
            content_hash: row.get(1)?,
            perceptual_hash: row.get(2)?,
            original_path: PathBuf::from(row.get::<_, String>(3)?),
            file_size: row.get::<_, i64>(4)? as u64,
            width: row.get(5)?,
            height: row.get(6)?,
            thumbnail_width: row.get(7)?,
            thumbnail_height: row.get(8)?,
            large_width: row.get(9)?,
            large_height: row.get(10)?,
            orientation: row.get(11)?,
            title: row.get(12)?,
            description: row.get(13)?,
            folder_id: row.get(14)?,
            source_id: row.get(15)?,
            location_id: row.get(16)?,
            date_id: row.get(17)?,
            dirty: row.get(18)?,
            starred: row.get(19)?,
            deleted_at: row.get(20)?,
        })
    }
}

/// Fields known when a file is first cataloged.
#[derive(Debug, Clone)]
pub struct NewImage<'a> {
    pub content_hash: &'a str,
    pub perceptual_hash: Option<&'a str>,
    pub original_path: &'a Path,
    pub file_size: u64,
    pub folder_id: i64,
    pub source_id: Option<i64>,
}

/// Dimensions of the generated thumbnail and large renditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedSizes {
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub large_width: u32,
    pub large_height: u32,
}

/// Facts read from a file's embedded metadata.
#[derive(Debug, Clone, Default)]
pub struct ImageDetails<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub orientation: Option<i32>,
    pub width: u32,
    pub height: u32,
}

/// What the classifier needs to know about a cataloged image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRef {
    pub id: i64,
    pub path: PathBuf,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub images: i64,
    pub dirty: i64,
    pub starred: i64,
    pub deleted: i64,
    pub folders: i64,
    pub tags: i64,
    pub people: i64,
    pub pets: i64,
    pub locations: i64,
    pub dates: i64,
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Catalog<'_> {
    pub fn insert_image(&self, image: &NewImage) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO images (content_hash, perceptual_hash, original_path, file_size, folder_id, source_id, dirty)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                image.content_hash,
                image.perceptual_hash,
                path_text(image.original_path),
                image.file_size as i64,
                image.folder_id,
                image.source_id
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_image(&self, id: i64) -> Result<Option<ImageRecord>> {
        self.image_where("id = ?1", params![id])
    }

    pub fn find_image_by_hash(&self, content_hash: &str) -> Result<Option<ImageRecord>> {
        self.image_where("content_hash = ?1", params![content_hash])
    }

    pub fn find_image_by_path(&self, path: &Path) -> Result<Option<ImageRecord>> {
        self.image_where("original_path = ?1", params![path_text(path)])
    }

    fn image_where(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Option<ImageRecord>> {
        let sql = format!("SELECT {} FROM images WHERE {}", IMAGE_COLUMNS, clause);
        let image = self
            .conn
            .query_row(&sql, params, ImageRecord::from_row)
            .optional()?;
        Ok(image)
    }

    fn images_where(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ImageRecord>> {
        let sql = format!("SELECT {} FROM images WHERE {} ORDER BY id", IMAGE_COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let images = stmt
            .query_map(params, ImageRecord::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(images)
    }

    /// Hash and path of every cataloged image, soft-deleted ones included.
    pub fn catalog_refs(&self) -> Result<Vec<CatalogRef>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, original_path, content_hash FROM images")?;
        let refs = stmt
            .query_map([], |row| {
                Ok(CatalogRef {
                    id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    content_hash: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(refs)
    }

    pub fn set_image_path(&self, id: i64, path: &Path, folder_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET original_path = ?1, folder_id = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
            params![path_text(path), folder_id, id],
        )?;
        Ok(())
    }

    pub fn set_image_folder(&self, id: i64, folder_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET folder_id = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![folder_id, id],
        )?;
        Ok(())
    }

    pub fn set_image_content(
        &self,
        id: i64,
        content_hash: &str,
        perceptual_hash: Option<&str>,
        file_size: u64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET content_hash = ?1, perceptual_hash = COALESCE(?2, perceptual_hash),
                 file_size = ?3, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?4",
            params![content_hash, perceptual_hash, file_size as i64, id],
        )?;
        Ok(())
    }

    /// Park the image's content hash on a per-image placeholder so another
    /// image can take the real one. The image's own content update
    /// replaces the placeholder later in the run.
    pub fn release_content_hash(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET content_hash = 'pending:' || id WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn set_derived_sizes(&self, id: i64, sizes: &DerivedSizes) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET thumbnail_width = ?1, thumbnail_height = ?2,
                 large_width = ?3, large_height = ?4, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?5",
            params![
                sizes.thumbnail_width,
                sizes.thumbnail_height,
                sizes.large_width,
                sizes.large_height,
                id
            ],
        )?;
        Ok(())
    }

    pub fn set_image_details(&self, id: i64, details: &ImageDetails) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET title = ?1, description = ?2, orientation = ?3,
                 width = ?4, height = ?5, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?6",
            params![
                details.title,
                details.description,
                details.orientation,
                details.width,
                details.height,
                id
            ],
        )?;
        Ok(())
    }

    pub fn set_image_location(&self, id: i64, location_id: Option<i64>) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET location_id = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![location_id, id],
        )?;
        Ok(())
    }

    pub fn set_image_date(&self, id: i64, date_id: Option<i64>) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET date_id = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![date_id, id],
        )?;
        Ok(())
    }

    pub fn get_or_create_source(&self, name: &str) -> Result<i64> {
        get_or_create(
            &self.retry,
            "source",
            || {
                self.conn
                    .query_row("SELECT id FROM sources WHERE name = ?1", params![name], |row| {
                        row.get(0)
                    })
                    .optional()
            },
            || {
                self.conn
                    .execute("INSERT INTO sources (name) VALUES (?1)", params![name])?;
                Ok(self.conn.last_insert_rowid())
            },
        )
    }

    pub fn mark_clean(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE images SET dirty = 0 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn mark_dirty(&self, id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE images SET dirty = 1, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            bail!("No image with id {}", id);
        }
        Ok(())
    }

    /// Images whose catalog state has not been written back to the file.
    pub fn dirty_images(&self) -> Result<Vec<ImageRecord>> {
        self.images_where("dirty = 1 AND deleted_at IS NULL", &[])
    }

    pub fn edit_title(&self, id: i64, title: Option<&str>) -> Result<()> {
        self.conn
            .execute("UPDATE images SET title = ?1 WHERE id = ?2", params![title, id])?;
        self.mark_dirty(id)
    }

    pub fn edit_description(&self, id: i64, description: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET description = ?1 WHERE id = ?2",
            params![description, id],
        )?;
        self.mark_dirty(id)
    }

    pub fn edit_orientation(&self, id: i64, orientation: Option<i32>) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET orientation = ?1 WHERE id = ?2",
            params![orientation, id],
        )?;
        self.mark_dirty(id)
    }

    pub fn edit_date(&self, id: i64, date: Option<&RoughDate>) -> Result<()> {
        let date_id = date.map(|d| self.get_or_create_date(d)).transpose()?;
        self.set_image_date(id, date_id)?;
        self.mark_dirty(id)
    }

    pub fn edit_location(&self, id: i64, location: Option<&RoughLocation>) -> Result<()> {
        let location_id = location
            .map(|l| self.get_or_create_location(l))
            .transpose()?;
        self.set_image_location(id, location_id)?;
        self.mark_dirty(id)
    }

    /// Name a person inside an image, creating the person if needed.
    pub fn edit_add_person(
        &self,
        id: i64,
        name: &str,
        bbox: &BoundingBox,
        description: Option<&str>,
    ) -> Result<()> {
        if !bbox.is_normalized() {
            bail!("Region for {} is outside the image", name);
        }
        let (person, _) = self.get_or_create_person(name)?;
        self.add_person_region(id, person.id, bbox, description, false)?;
        self.mark_dirty(id)
    }

    pub fn edit_add_pet(
        &self,
        id: i64,
        name: &str,
        bbox: &BoundingBox,
        description: Option<&str>,
    ) -> Result<()> {
        if !bbox.is_normalized() {
            bail!("Region for {} is outside the image", name);
        }
        let (pet, _) = self.get_or_create_pet(name)?;
        self.add_pet_region(id, pet.id, bbox, description)?;
        self.mark_dirty(id)
    }

    /// Starring is catalog-only and does not require a metadata sync.
    pub fn set_starred(&self, id: i64, starred: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET starred = ?1 WHERE id = ?2",
            params![starred, id],
        )?;
        Ok(())
    }

    pub fn soft_delete(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET deleted_at = datetime('now') WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
        )?;
        Ok(())
    }

    pub fn restore(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE images SET deleted_at = NULL WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Soft-deleted images older than the retention period.
    pub fn expired_deletions(&self, retention_days: u32) -> Result<Vec<ImageRecord>> {
        let cutoff = format!("-{} days", retention_days);
        self.images_where(
            "deleted_at IS NOT NULL AND deleted_at <= datetime('now', ?1)",
            params![cutoff],
        )
    }

    /// Remove an image row and every association that hangs off it.
    pub fn delete_image(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM images WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };

        Ok(CatalogStats {
            images: count("SELECT COUNT(*) FROM images WHERE deleted_at IS NULL")?,
            dirty: count("SELECT COUNT(*) FROM images WHERE dirty = 1 AND deleted_at IS NULL")?,
            starred: count("SELECT COUNT(*) FROM images WHERE starred = 1 AND deleted_at IS NULL")?,
            deleted: count("SELECT COUNT(*) FROM images WHERE deleted_at IS NOT NULL")?,
            folders: count("SELECT COUNT(*) FROM folders")?,
            tags: count("SELECT COUNT(*) FROM tags")?,
            people: count("SELECT COUNT(*) FROM people")?,
            pets: count("SELECT COUNT(*) FROM pets")?,
            locations: count("SELECT COUNT(*) FROM rough_locations")?,
            dates: count("SELECT COUNT(*) FROM rough_dates")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn insert(catalog: &Catalog, hash: &str, path: &str) -> i64 {
        let (folder, _) = catalog.get_or_create_folder("root", None).unwrap();
        catalog
            .insert_image(&NewImage {
                content_hash: hash,
                perceptual_hash: Some("ffff0000ffff0000"),
                original_path: Path::new(path),
                file_size: 10,
                folder_id: folder.id,
                source_id: None,
            })
            .unwrap()
    }

    #[test]
    fn test_new_image_is_clean_with_zero_derived_sizes() {
        let db = test_db();
        let catalog = db.catalog();
        let id = insert(&catalog, "aa", "/p/a.jpg");

        let image = catalog.get_image(id).unwrap().unwrap();
        assert!(!image.dirty);
        assert_eq!(image.thumbnail_width, 0);
        assert_eq!(image.large_height, 0);
        assert_eq!(catalog.find_image_by_hash("aa").unwrap().unwrap().id, id);
        assert_eq!(
            catalog.find_image_by_path(Path::new("/p/a.jpg")).unwrap().unwrap().id,
            id
        );
    }

    #[test]
    fn test_hash_and_path_are_unique() {
        let db = test_db();
        let catalog = db.catalog();
        insert(&catalog, "aa", "/p/a.jpg");

        let (folder, _) = catalog.get_or_create_folder("root", None).unwrap();
        let dup_hash = catalog.insert_image(&NewImage {
            content_hash: "aa",
            perceptual_hash: None,
            original_path: Path::new("/p/b.jpg"),
            file_size: 1,
            folder_id: folder.id,
            source_id: None,
        });
        assert!(dup_hash.is_err());
    }

    #[test]
    fn test_released_hash_can_be_taken_by_another_image() {
        let db = test_db();
        let catalog = db.catalog();
        let a = insert(&catalog, "aa", "/p/a.jpg");
        let b = insert(&catalog, "bb", "/p/b.jpg");

        assert!(catalog.set_image_content(a, "bb", None, 10).is_err());

        catalog.release_content_hash(b).unwrap();
        catalog.set_image_content(a, "bb", None, 10).unwrap();
        catalog.set_image_content(b, "aa", None, 10).unwrap();

        assert_eq!(catalog.find_image_by_hash("bb").unwrap().unwrap().id, a);
        assert_eq!(catalog.find_image_by_hash("aa").unwrap().unwrap().id, b);
        assert!(catalog.dirty_images().unwrap().is_empty());
    }

    #[test]
    fn test_edits_mark_dirty_but_starring_does_not() {
        let db = test_db();
        let catalog = db.catalog();
        let id = insert(&catalog, "aa", "/p/a.jpg");

        catalog.set_starred(id, true).unwrap();
        assert!(catalog.dirty_images().unwrap().is_empty());

        catalog.edit_title(id, Some("Beach")).unwrap();
        catalog
            .edit_date(id, Some(&RoughDate::year_month(2019, 8).unwrap()))
            .unwrap();
        let dirty = catalog.dirty_images().unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].title.as_deref(), Some("Beach"));
        assert!(dirty[0].starred);
        assert!(dirty[0].date_id.is_some());

        catalog.mark_clean(id).unwrap();
        assert!(catalog.dirty_images().unwrap().is_empty());
    }

    #[test]
    fn test_soft_deleted_images_expire() {
        let db = test_db();
        let catalog = db.catalog();
        let id = insert(&catalog, "aa", "/p/a.jpg");
        catalog.edit_title(id, Some("x")).unwrap();

        catalog.soft_delete(id).unwrap();
        assert!(catalog.dirty_images().unwrap().is_empty());
        assert!(catalog.expired_deletions(30).unwrap().is_empty());
        assert_eq!(catalog.expired_deletions(0).unwrap().len(), 1);

        let stats = catalog.stats().unwrap();
        assert_eq!(stats.images, 0);
        assert_eq!(stats.deleted, 1);

        catalog.delete_image(id).unwrap();
        assert!(catalog.get_image(id).unwrap().is_none());
    }

    #[test]
    fn test_region_edit_rejects_out_of_range_box() {
        let db = test_db();
        let catalog = db.catalog();
        let id = insert(&catalog, "aa", "/p/a.jpg");
        let bbox = BoundingBox {
            center_x: 1.5,
            center_y: 0.5,
            width: 0.1,
            height: 0.1,
        };
        assert!(catalog.edit_add_person(id, "Bob", &bbox, None).is_err());
    }
}
