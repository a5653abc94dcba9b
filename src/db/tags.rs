use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use super::retry::get_or_create;
use super::Catalog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

impl Tag {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            parent_id: row.get(3)?,
        })
    }
}

/// A tag attached to an image. `applied` is false for structural
/// ancestors the image was not tagged with directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    pub tag: Tag,
    pub applied: bool,
}

impl Catalog<'_> {
    fn find_tag_row(&self, name: &str, parent_id: Option<i64>) -> rusqlite::Result<Option<Tag>> {
        self.conn
            .query_row(
                "SELECT id, name, description, parent_id FROM tags WHERE name = ?1 AND parent_id IS ?2",
                params![name, parent_id],
                Tag::from_row,
            )
            .optional()
    }

    pub fn get_or_create_tag(&self, name: &str, parent_id: Option<i64>) -> Result<Tag> {
        get_or_create(
            &self.retry,
            "tag",
            || self.find_tag_row(name, parent_id),
            || {
                self.conn.execute(
                    "INSERT INTO tags (name, parent_id) VALUES (?1, ?2)",
                    params![name, parent_id],
                )?;
                Ok(Tag {
                    id: self.conn.last_insert_rowid(),
                    name: name.to_string(),
                    description: None,
                    parent_id,
                })
            },
        )
    }

    /// Attach a tag. Attaching the same tag twice keeps `applied` if
    /// either attachment asserted it.
    pub fn tag_image(&self, image_id: i64, tag_id: i64, applied: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tag_on_image (image_id, tag_id, applied) VALUES (?1, ?2, ?3)
             ON CONFLICT (image_id, tag_id) DO UPDATE SET applied = applied OR excluded.applied",
            params![image_id, tag_id, applied],
        )?;
        Ok(())
    }

    pub fn clear_image_tags(&self, image_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM tag_on_image WHERE image_id = ?1", params![image_id])?;
        Ok(())
    }

    pub fn image_tags(&self, image_id: i64) -> Result<Vec<ImageTag>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.id, t.name, t.description, t.parent_id, ti.applied
             FROM tags t JOIN tag_on_image ti ON ti.tag_id = t.id
             WHERE ti.image_id = ?1
             ORDER BY t.id",
        )?;
        let tags = stmt
            .query_map(params![image_id], |row| {
                Ok(ImageTag {
                    tag: Tag::from_row(row)?,
                    applied: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_db;

    #[test]
    fn test_tag_dedup_by_name_and_parent() {
        let db = test_db();
        let catalog = db.catalog();

        let travel = catalog.get_or_create_tag("Travel", None).unwrap();
        let paris = catalog.get_or_create_tag("Paris", Some(travel.id)).unwrap();
        let paris_root = catalog.get_or_create_tag("Paris", None).unwrap();
        assert_ne!(paris.id, paris_root.id);
        assert_eq!(catalog.get_or_create_tag("Paris", Some(travel.id)).unwrap(), paris);
    }
}
