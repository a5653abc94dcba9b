use anyhow::{anyhow, Result};
use std::path::{Component, Path};

use crate::db::{Catalog, Folder, GroupTable};
use crate::model::{GroupMode, GroupSet};

/// Directory names between `root` and the file's parent directory.
///
/// A file sitting directly in the root files under a folder named after
/// the root directory itself.
pub fn folder_segments(root: &Path, file: &Path) -> Result<Vec<String>> {
    let parent = file
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", file.display()))?;
    let relative = parent
        .strip_prefix(root)
        .map_err(|_| anyhow!("{} is not under root {}", file.display(), root.display()))?;

    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if !segments.is_empty() {
        return Ok(segments);
    }

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.to_string_lossy().into_owned());
    Ok(vec![name])
}

/// Get or create the folder chain for `file` and return the leaf.
///
/// New folders receive `groups`; existing ones get them merged in, or
/// replaced when `mode` is `Overwrite`.
pub fn build_folder_chain(
    catalog: &Catalog,
    root: &Path,
    file: &Path,
    groups: &GroupSet,
    mode: GroupMode,
) -> Result<Folder> {
    let mut parent: Option<Folder> = None;

    for segment in folder_segments(root, file)? {
        let (folder, created) = catalog.get_or_create_folder(&segment, parent.as_ref().map(|f| f.id))?;
        let mode = if created { GroupMode::Merge } else { mode };
        catalog.apply_groups(GroupTable::Folder, folder.id, groups, mode)?;
        parent = Some(folder);
    }

    parent.ok_or_else(|| anyhow!("no folder segments for {}", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_segments() {
        let root = Path::new("/photos");
        assert_eq!(
            folder_segments(root, Path::new("/photos/2020/Summer/a.jpg")).unwrap(),
            vec!["2020", "Summer"]
        );
        assert_eq!(
            folder_segments(root, Path::new("/photos/a.jpg")).unwrap(),
            vec!["photos"]
        );
        assert!(folder_segments(root, Path::new("/elsewhere/a.jpg")).is_err());
    }

    #[test]
    fn test_chain_is_created_once_and_reused() {
        let db = test_db();
        let catalog = db.catalog();
        let root = Path::new("/photos");
        let groups = GroupSet::new(["family"], ["admins"]);

        let leaf = build_folder_chain(&catalog, root, Path::new("/photos/a/b/c/1.jpg"), &groups, GroupMode::Merge).unwrap();
        let again = build_folder_chain(&catalog, root, Path::new("/photos/a/b/c/2.jpg"), &GroupSet::default(), GroupMode::Merge).unwrap();
        assert_eq!(leaf.id, again.id);

        let names: Vec<String> = catalog.folder_ancestors(leaf.id).unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let count: i64 = db.connection().query_row("SELECT COUNT(*) FROM folders", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
        assert_eq!(catalog.groups_of(GroupTable::Folder, leaf.id).unwrap(), groups);
    }

    #[test]
    fn test_sibling_reuses_parent_and_adds_one_child() {
        let db = test_db();
        let catalog = db.catalog();
        let root = Path::new("/root");
        let groups = GroupSet::default();

        let summer = build_folder_chain(&catalog, root, Path::new("/root/2020/Summer/a.jpg"), &groups, GroupMode::Merge).unwrap();
        let winter = build_folder_chain(&catalog, root, Path::new("/root/2020/Winter/b.jpg"), &groups, GroupMode::Merge).unwrap();

        assert_ne!(summer.id, winter.id);
        assert_eq!(summer.parent_id, winter.parent_id);
        let year = summer.parent_id.unwrap();
        assert_eq!(catalog.get_folder(year).unwrap().unwrap().name, "2020");

        let children: Vec<String> = catalog.folder_children(Some(year)).unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(children, vec!["Summer", "Winter"]);

        let count: i64 = db.connection().query_row("SELECT COUNT(*) FROM folders", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_groups_merge_or_overwrite_on_reuse() {
        let db = test_db();
        let catalog = db.catalog();
        let root = Path::new("/photos");
        let file = Path::new("/photos/trip/1.jpg");

        let leaf = build_folder_chain(&catalog, root, file, &GroupSet::new(["a"], Vec::<String>::new()), GroupMode::Merge).unwrap();
        build_folder_chain(&catalog, root, file, &GroupSet::new(["b"], Vec::<String>::new()), GroupMode::Merge).unwrap();
        let merged = catalog.groups_of(GroupTable::Folder, leaf.id).unwrap();
        assert_eq!(merged.view.len(), 2);

        build_folder_chain(&catalog, root, file, &GroupSet::new(["c"], Vec::<String>::new()), GroupMode::Overwrite).unwrap();
        let replaced = catalog.groups_of(GroupTable::Folder, leaf.id).unwrap();
        assert_eq!(replaced, GroupSet::new(["c"], Vec::<String>::new()));
    }
}
