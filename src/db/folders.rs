use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use super::retry::get_or_create;
use super::Catalog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

impl Folder {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Folder {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            parent_id: row.get(3)?,
        })
    }
}

impl Catalog<'_> {
    pub fn find_folder(&self, name: &str, parent_id: Option<i64>) -> Result<Option<Folder>> {
        Ok(self.find_folder_row(name, parent_id)?)
    }

    fn find_folder_row(&self, name: &str, parent_id: Option<i64>) -> rusqlite::Result<Option<Folder>> {
        self.conn
            .query_row(
                "SELECT id, name, description, parent_id FROM folders WHERE name = ?1 AND parent_id IS ?2",
                params![name, parent_id],
                Folder::from_row,
            )
            .optional()
    }

    /// Existing folder `name` under `parent_id`, or a new one. The flag is
    /// true when the folder was created by this call.
    pub fn get_or_create_folder(&self, name: &str, parent_id: Option<i64>) -> Result<(Folder, bool)> {
        get_or_create(
            &self.retry,
            "folder",
            || Ok(self.find_folder_row(name, parent_id)?.map(|f| (f, false))),
            || {
                self.conn.execute(
                    "INSERT INTO folders (name, parent_id) VALUES (?1, ?2)",
                    params![name, parent_id],
                )?;
                Ok((
                    Folder {
                        id: self.conn.last_insert_rowid(),
                        name: name.to_string(),
                        description: None,
                        parent_id,
                    },
                    true,
                ))
            },
        )
    }

    pub fn get_folder(&self, id: i64) -> Result<Option<Folder>> {
        let folder = self
            .conn
            .query_row(
                "SELECT id, name, description, parent_id FROM folders WHERE id = ?1",
                params![id],
                Folder::from_row,
            )
            .optional()?;
        Ok(folder)
    }

    /// The chain from the root down to and including `id`.
    pub fn folder_ancestors(&self, id: i64) -> Result<Vec<Folder>> {
        let mut stmt = self.conn.prepare_cached(
            "WITH RECURSIVE chain(id, name, description, parent_id, depth) AS (
                 SELECT id, name, description, parent_id, 0 FROM folders WHERE id = ?1
                 UNION ALL
                 SELECT f.id, f.name, f.description, f.parent_id, chain.depth + 1
                 FROM folders f JOIN chain ON f.id = chain.parent_id
             )
             SELECT id, name, description, parent_id FROM chain ORDER BY depth DESC",
        )?;
        let folders = stmt
            .query_map(params![id], Folder::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(folders)
    }

    pub fn folder_children(&self, parent_id: Option<i64>) -> Result<Vec<Folder>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, description, parent_id FROM folders WHERE parent_id IS ?1 ORDER BY name",
        )?;
        let folders = stmt
            .query_map(params![parent_id], Folder::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_db;

    #[test]
    fn test_siblings_are_unique_but_names_repeat_across_parents() {
        let db = test_db();
        let catalog = db.catalog();

        let (a, created) = catalog.get_or_create_folder("2020", None).unwrap();
        assert!(created);
        let (b, _) = catalog.get_or_create_folder("2021", None).unwrap();
        let (a_x, _) = catalog.get_or_create_folder("Summer", Some(a.id)).unwrap();
        let (b_x, _) = catalog.get_or_create_folder("Summer", Some(b.id)).unwrap();
        assert_ne!(a_x.id, b_x.id);

        let (again, created) = catalog.get_or_create_folder("Summer", Some(a.id)).unwrap();
        assert!(!created);
        assert_eq!(again.id, a_x.id);

        let (root_again, _) = catalog.get_or_create_folder("2020", None).unwrap();
        assert_eq!(root_again.id, a.id);
    }

    #[test]
    fn test_ancestors_run_root_first() {
        let db = test_db();
        let catalog = db.catalog();

        let (root, _) = catalog.get_or_create_folder("Trips", None).unwrap();
        let (mid, _) = catalog.get_or_create_folder("2019", Some(root.id)).unwrap();
        let (leaf, _) = catalog.get_or_create_folder("Lisbon", Some(mid.id)).unwrap();

        let names: Vec<String> = catalog
            .folder_ancestors(leaf.id)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["Trips", "2019", "Lisbon"]);
        assert_eq!(catalog.folder_children(Some(root.id)).unwrap(), vec![mid]);
    }
}
