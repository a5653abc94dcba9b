//! Turn extracted metadata into catalog entities.

pub mod folders;
pub mod keywords;
pub mod regions;

pub use folders::{build_folder_chain, folder_segments};
pub use keywords::{apply_keywords, project_date, project_location, project_tags, resolve_location, KeywordOutcome};
pub use regions::{apply_regions, RegionOutcome};
