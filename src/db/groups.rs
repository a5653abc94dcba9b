use anyhow::Result;
use rusqlite::params;

use super::Catalog;
use crate::model::{Access, GroupMode, GroupSet};

/// Rows that carry view/edit permission groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTable {
    Image,
    Folder,
    Person,
    Pet,
}

impl GroupTable {
    fn table(&self) -> &'static str {
        match self {
            GroupTable::Image => "image_groups",
            GroupTable::Folder => "folder_groups",
            GroupTable::Person => "person_groups",
            GroupTable::Pet => "pet_groups",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            GroupTable::Image => "image_id",
            GroupTable::Folder => "folder_id",
            GroupTable::Person => "person_id",
            GroupTable::Pet => "pet_id",
        }
    }
}

impl Catalog<'_> {
    /// Merge adds to the existing assignments; Overwrite replaces them.
    pub fn apply_groups(
        &self,
        table: GroupTable,
        id: i64,
        groups: &GroupSet,
        mode: GroupMode,
    ) -> Result<()> {
        if mode == GroupMode::Overwrite {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE {} = ?1", table.table(), table.column()),
                params![id],
            )?;
        }

        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {} ({}, access, group_name) VALUES (?1, ?2, ?3)",
            table.table(),
            table.column()
        ))?;
        for (access, group) in groups.entries() {
            stmt.execute(params![id, access.as_str(), group])?;
        }
        Ok(())
    }

    pub fn groups_of(&self, table: GroupTable, id: i64) -> Result<GroupSet> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT access, group_name FROM {} WHERE {} = ?1",
            table.table(),
            table.column()
        ))?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut groups = GroupSet::default();
        for (access, name) in rows.filter_map(|r| r.ok()) {
            if access == Access::Edit.as_str() {
                groups.edit.insert(name);
            } else {
                groups.view.insert(name);
            }
        }
        Ok(groups)
    }
}
