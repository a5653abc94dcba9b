use anyhow::Result;
use tracing::warn;

use crate::db::{Catalog, GroupTable};
use crate::metadata::{Region, RegionKind};
use crate::model::{BoundingBox, GroupMode, GroupSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionOutcome {
    pub people: usize,
    pub pets: usize,
    pub skipped: usize,
}

/// Create person/pet associations for every usable region of an image.
///
/// Each region yields a fresh association; callers clear the old ones
/// first when re-deriving an image.
pub fn apply_regions(
    catalog: &Catalog,
    image_id: i64,
    regions: &[Region],
    groups: &GroupSet,
    mode: GroupMode,
) -> Result<RegionOutcome> {
    let mut outcome = RegionOutcome::default();

    for region in regions {
        if region.name.trim().is_empty() {
            warn!(image_id, kind = region.kind.as_str(), "region without a name, skipping");
            outcome.skipped += 1;
            continue;
        }

        let bbox = BoundingBox {
            center_x: region.area.x,
            center_y: region.area.y,
            width: region.area.w,
            height: region.area.h,
        };
        if !bbox.is_normalized() {
            warn!(image_id, name = %region.name, ?bbox, "region area outside the image, skipping");
            outcome.skipped += 1;
            continue;
        }

        match &region.kind {
            RegionKind::Face => {
                let (person, _) = catalog.get_or_create_person(&region.name)?;
                if let Some(description) = &region.description {
                    catalog.set_person_description(person.id, description)?;
                }
                catalog.apply_groups(GroupTable::Person, person.id, groups, mode)?;
                catalog.add_person_region(image_id, person.id, &bbox, None, false)?;
                outcome.people += 1;
            }
            RegionKind::Pet => {
                let (pet, _) = catalog.get_or_create_pet(&region.name)?;
                if let Some(description) = &region.description {
                    catalog.set_pet_description(pet.id, description)?;
                }
                catalog.apply_groups(GroupTable::Pet, pet.id, groups, mode)?;
                catalog.add_pet_region(image_id, pet.id, &bbox, None)?;
                outcome.pets += 1;
            }
            RegionKind::Other(kind) => {
                warn!(image_id, name = %region.name, kind = %kind, "unsupported region type, skipping");
                outcome.skipped += 1;
            }
        }
    }

    Ok(outcome)
}
