//! Classification of discovered files against the catalog.
//!
//! Every `(path, content hash)` pair lands in exactly one of new, moved,
//! content-changed or unchanged. Each pair is judged on its own against
//! a snapshot of the catalog, so the result does not depend on input
//! order.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::db::{Catalog, CatalogRef};

/// Lookup of cataloged images by content hash and by path.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    by_hash: HashMap<String, CatalogRef>,
    by_path: HashMap<PathBuf, CatalogRef>,
}

impl CatalogIndex {
    pub fn new(refs: impl IntoIterator<Item = CatalogRef>) -> Self {
        let mut index = CatalogIndex::default();
        for entry in refs {
            index.by_hash.insert(entry.content_hash.clone(), entry.clone());
            index.by_path.insert(entry.path.clone(), entry);
        }
        index
    }

    pub fn load(catalog: &Catalog) -> Result<Self> {
        Ok(Self::new(catalog.catalog_refs()?))
    }

    pub fn by_hash(&self, content_hash: &str) -> Option<&CatalogRef> {
        self.by_hash.get(content_hash)
    }

    pub fn by_path(&self, path: &Path) -> Option<&CatalogRef> {
        self.by_path.get(path)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Discovered {
    pub path: PathBuf,
    pub content_hash: String,
}

/// A discovered file paired with the cataloged image it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub path: PathBuf,
    pub content_hash: String,
    pub entity: CatalogRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub new: Vec<Discovered>,
    /// Known content at a path the catalog does not know.
    pub moved: Vec<Matched>,
    /// Known path whose content no longer matches the catalog.
    pub changed: Vec<Matched>,
    pub unchanged: Vec<Matched>,
}

impl Classification {
    pub fn total(&self) -> usize {
        self.new.len() + self.moved.len() + self.changed.len() + self.unchanged.len()
    }
}

/// Sort each pair into exactly one class. All output lists are ordered
/// by path.
///
/// When the hash belongs to one image and the path to another, the path
/// wins: the pair is content-changed for the image at that path.
pub fn classify(discovered: &[(PathBuf, String)], index: &CatalogIndex) -> Classification {
    let mut result = Classification::default();

    for (path, content_hash) in discovered {
        let matched = |entity: &CatalogRef| Matched {
            path: path.clone(),
            content_hash: content_hash.clone(),
            entity: entity.clone(),
        };

        match (index.by_hash(content_hash), index.by_path(path)) {
            (Some(by_hash), Some(by_path)) if by_hash.id == by_path.id => {
                result.unchanged.push(matched(by_path));
            }
            (Some(by_hash), Some(by_path)) => {
                warn!(
                    path = %path.display(),
                    image_id = by_path.id,
                    duplicate_of = by_hash.id,
                    duplicate_path = %by_hash.path.display(),
                    "file content now matches a different cataloged image"
                );
                result.changed.push(matched(by_path));
            }
            (None, Some(by_path)) => result.changed.push(matched(by_path)),
            (Some(by_hash), None) => result.moved.push(matched(by_hash)),
            (None, None) => result.new.push(Discovered {
                path: path.clone(),
                content_hash: content_hash.clone(),
            }),
        }
    }

    result.new.sort();
    for list in [&mut result.moved, &mut result.changed, &mut result.unchanged] {
        list.sort_by(|a, b| a.path.cmp(&b.path));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn entity(id: i64, path: &str, hash: &str) -> CatalogRef {
        CatalogRef {
            id,
            path: PathBuf::from(path),
            content_hash: hash.to_string(),
        }
    }

    fn pair(path: &str, hash: &str) -> (PathBuf, String) {
        (PathBuf::from(path), hash.to_string())
    }

    fn index() -> CatalogIndex {
        CatalogIndex::new(vec![
            entity(1, "/p/a.jpg", "h1"),
            entity(2, "/p/b.jpg", "h2"),
            entity(3, "/p/c.jpg", "h3"),
        ])
    }

    #[test]
    fn test_scenarios() {
        let result = classify(
            &[
                pair("/p/a.jpg", "h1"),
                pair("/p/b.jpg", "h9"),
                pair("/q/c-renamed.jpg", "h3"),
                pair("/p/new.jpg", "h7"),
            ],
            &index(),
        );

        assert_eq!(result.unchanged.len(), 1);
        assert_eq!(result.unchanged[0].entity.id, 1);

        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].entity.id, 2);
        assert_eq!(result.changed[0].content_hash, "h9");

        assert_eq!(result.moved.len(), 1);
        assert_eq!(result.moved[0].entity.id, 3);
        assert_eq!(result.moved[0].path, PathBuf::from("/q/c-renamed.jpg"));

        assert_eq!(result.new.len(), 1);
        assert_eq!(result.new[0].content_hash, "h7");
    }

    #[test]
    fn test_conflicting_hash_and_path_favor_the_path() {
        // a.jpg now holds b.jpg's content
        let result = classify(&[pair("/p/a.jpg", "h2")], &index());
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].entity.id, 1);
        assert!(result.moved.is_empty() && result.new.is_empty() && result.unchanged.is_empty());
    }

    fn random_input(rng: &mut StdRng) -> Vec<(PathBuf, String)> {
        let paths = ["/p/a.jpg", "/p/b.jpg", "/p/c.jpg", "/p/d.jpg", "/p/e.jpg", "/q/a.jpg"];
        let hashes = ["h1", "h2", "h3", "h4", "h5"];
        let mut chosen: Vec<&str> = paths.to_vec();
        chosen.shuffle(rng);
        chosen
            .into_iter()
            .take(rng.gen_range(0..=paths.len()))
            .map(|p| pair(p, hashes[rng.gen_range(0..hashes.len())]))
            .collect()
    }

    fn as_sets(result: &Classification) -> [BTreeSet<(PathBuf, String)>; 4] {
        let key = |m: &Matched| (m.path.clone(), m.content_hash.clone());
        [
            result.new.iter().map(|d| (d.path.clone(), d.content_hash.clone())).collect(),
            result.moved.iter().map(key).collect(),
            result.changed.iter().map(key).collect(),
            result.unchanged.iter().map(key).collect(),
        ]
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let mut rng = StdRng::seed_from_u64(7);
        let index = index();

        for _ in 0..200 {
            let input = random_input(&mut rng);
            let result = classify(&input, &index);
            assert_eq!(result.total(), input.len());

            let sets = as_sets(&result);
            let union: BTreeSet<_> = sets.iter().flatten().cloned().collect();
            let expected: BTreeSet<_> = input.iter().cloned().collect();
            assert_eq!(union, expected);
            assert_eq!(sets.iter().map(|s| s.len()).sum::<usize>(), input.len());
        }
    }

    #[test]
    fn test_permutation_does_not_change_result() {
        let mut rng = StdRng::seed_from_u64(11);
        let index = index();

        for _ in 0..100 {
            let mut input = random_input(&mut rng);
            let first = classify(&input, &index);
            input.shuffle(&mut rng);
            assert_eq!(classify(&input, &index), first);
        }
    }
}
