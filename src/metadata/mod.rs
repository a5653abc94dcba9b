//! Embedded image metadata as the catalog sees it.
//!
//! A [`MetadataBackend`] turns a file into a [`MetadataRecord`] and back.
//! Regions follow the MWG region model (normalized center point plus
//! size) and keywords the MWG hierarchical keyword model.

pub mod exiftool;

use anyhow::Result;
use std::path::Path;

pub use exiftool::ExifTool;

/// Named roots whose subtrees encode specialized facts instead of tags.
pub const DATES_ROOT: &str = "Dates";
pub const LOCATIONS_ROOT: &str = "Locations";
pub const PEOPLE_ROOT: &str = "People";
pub const PETS_ROOT: &str = "Pets";

pub const RESERVED_ROOTS: [&str; 4] = [DATES_ROOT, PEOPLE_ROOT, LOCATIONS_ROOT, PETS_ROOT];

pub fn is_reserved_root(name: &str) -> bool {
    RESERVED_ROOTS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionKind {
    Face,
    Pet,
    Other(String),
}

impl RegionKind {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("face") {
            RegionKind::Face
        } else if value.eq_ignore_ascii_case("pet") {
            RegionKind::Pet
        } else {
            RegionKind::Other(value.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RegionKind::Face => "Face",
            RegionKind::Pet => "Pet",
            RegionKind::Other(other) => other,
        }
    }
}

/// Normalized area: `x`/`y` are the center, `w`/`h` the size.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Area {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    pub name: String,
    pub area: Area,
    pub description: Option<String>,
}

/// One node of a hierarchical keyword tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyword {
    pub name: String,
    /// Explicit assertion on the node. `None` when the file says nothing.
    pub applied: Option<bool>,
    pub children: Vec<Keyword>,
}

impl Keyword {
    pub fn leaf(name: impl Into<String>) -> Self {
        Keyword {
            name: name.into(),
            applied: None,
            children: Vec::new(),
        }
    }

    pub fn branch(name: impl Into<String>, children: Vec<Keyword>) -> Self {
        Keyword {
            name: name.into(),
            applied: None,
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Case-insensitive lookup of a root keyword.
pub fn find_root<'a>(keywords: &'a [Keyword], name: &str) -> Option<&'a Keyword> {
    keywords.iter().find(|k| k.name.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    pub title: Option<String>,
    pub description: Option<String>,
    pub orientation: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub regions: Vec<Region>,
    pub keywords: Vec<Keyword>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub location: Option<String>,
}

impl MetadataRecord {
    /// True when the record carries any direct location field.
    pub fn has_location_fields(&self) -> bool {
        self.country.is_some() || self.state.is_some() || self.city.is_some() || self.location.is_some()
    }
}

/// Reads and writes embedded metadata. Reads never modify the file.
pub trait MetadataBackend: Send + Sync {
    fn read(&self, path: &Path) -> Result<MetadataRecord>;

    /// Write the populated fields of `record`; absent fields are left
    /// untouched in the file.
    fn write(&self, path: &Path, record: &MetadataRecord) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_roots_match_case_insensitively() {
        assert!(is_reserved_root("dates"));
        assert!(is_reserved_root("LOCATIONS"));
        assert!(!is_reserved_root("Travel"));

        let tree = vec![Keyword::leaf("Travel"), Keyword::branch("dates", vec![Keyword::leaf("2020")])];
        assert_eq!(find_root(&tree, DATES_ROOT).unwrap().children.len(), 1);
    }

    #[test]
    fn test_region_kind_parse() {
        assert_eq!(RegionKind::parse("face"), RegionKind::Face);
        assert_eq!(RegionKind::parse("Pet"), RegionKind::Pet);
        assert_eq!(RegionKind::parse("Focus"), RegionKind::Other("Focus".into()));
    }
}
