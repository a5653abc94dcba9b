//! Projections of a keyword tree onto tags, a rough date and a location.

use anyhow::Result;
use tracing::{debug, warn};

use crate::db::Catalog;
use crate::geo::GeoTable;
use crate::metadata::{
    find_root, is_reserved_root, Keyword, MetadataRecord, DATES_ROOT, LOCATIONS_ROOT,
};
use crate::model::{RoughDate, RoughLocation, MONTH_MAX_DAYS};

/// Attach every non-reserved keyword node to the image as a tag.
///
/// Returns the number of nodes visited.
pub fn project_tags(catalog: &Catalog, image_id: i64, keywords: &[Keyword]) -> Result<usize> {
    let mut count = 0;
    for root in keywords.iter().filter(|k| !is_reserved_root(&k.name)) {
        count += project_node(catalog, image_id, root, None)?;
    }
    Ok(count)
}

fn project_node(catalog: &Catalog, image_id: i64, node: &Keyword, parent: Option<i64>) -> Result<usize> {
    let tag = catalog.get_or_create_tag(&node.name, parent)?;
    let applied = node.applied.unwrap_or(false) || node.is_leaf();
    catalog.tag_image(image_id, tag.id, applied)?;

    let mut count = 1;
    for child in &node.children {
        count += project_node(catalog, image_id, child, Some(tag.id))?;
    }
    Ok(count)
}

/// Read `Dates → year → "MM - Name" → day`. Each level that fails to
/// parse or is out of range is dropped together with everything below it.
pub fn project_date(keywords: &[Keyword]) -> Option<RoughDate> {
    let year_node = find_root(keywords, DATES_ROOT)?.children.first()?;
    let year: i32 = match year_node.name.trim().parse() {
        Ok(year) => year,
        Err(_) => {
            warn!(keyword = %year_node.name, "date keyword year is not a number, ignoring date");
            return None;
        }
    };
    let year_only = RoughDate::year_only(year);

    let Some(month_node) = year_node.children.first() else {
        return year_only;
    };
    let month_text = month_node.name.split('-').next().unwrap_or_default().trim();
    let month = match month_text.parse::<u32>() {
        Ok(month) if (1..=12).contains(&month) => month,
        Ok(month) => {
            warn!(year, month, "date keyword month out of range, keeping year only");
            return year_only;
        }
        Err(_) => {
            warn!(year, keyword = %month_node.name, "date keyword month is not a number, keeping year only");
            return year_only;
        }
    };
    let year_month = RoughDate::year_month(year, month);

    let Some(day_node) = month_node.children.first() else {
        return year_month;
    };
    let day = match day_node.name.trim().parse::<u32>() {
        Ok(day) if day >= 1 && day <= MONTH_MAX_DAYS[month as usize - 1] => day,
        Ok(day) => {
            warn!(year, month, day, "date keyword day out of range, keeping year and month");
            return year_month;
        }
        Err(_) => {
            warn!(year, month, keyword = %day_node.name, "date keyword day is not a number, keeping year and month");
            return year_month;
        }
    };

    match RoughDate::full(year, month, day) {
        Some(date) => Some(date),
        None => {
            warn!(year, month, day, "date keyword is not a calendar date, keeping year and month");
            year_month
        }
    }
}

/// Read `Locations → country → (subdivision | city) → ...`.
///
/// With a resolvable subdivision the next levels are city then
/// sub-location; otherwise the second level is the city and the third the
/// sub-location.
pub fn project_location(keywords: &[Keyword], geo: &GeoTable) -> Option<RoughLocation> {
    let country_node = find_root(keywords, LOCATIONS_ROOT)?.children.first()?;
    let Some(country) = geo.resolve_country(&country_node.name) else {
        warn!(country = %country_node.name, "location keyword country not recognized, no location set");
        return None;
    };

    let Some(second) = country_node.children.first() else {
        return Some(RoughLocation::country_only(country));
    };
    let third = second.children.first();

    match geo.resolve_subdivision(country, &second.name) {
        Some(subdivision) => {
            let sub_location = third.and_then(|t| t.children.first());
            Some(RoughLocation::new(
                country,
                Some(subdivision),
                third.map(|t| t.name.as_str()),
                sub_location.map(|s| s.name.as_str()),
            ))
        }
        None => Some(RoughLocation::new(
            country,
            None,
            Some(&second.name),
            third.map(|t| t.name.as_str()),
        )),
    }
}

/// Location from the flat country/state/city/location fields. `None`
/// when there is no country or it cannot be resolved.
pub fn direct_location(record: &MetadataRecord, geo: &GeoTable) -> Option<RoughLocation> {
    let name = record.country.as_deref()?;
    let Some(country) = geo.resolve_country(name) else {
        warn!(country = name, "metadata country not recognized");
        return None;
    };

    let subdivision = record.state.as_deref().and_then(|state| {
        let parsed = geo.parse_subdivision_field(country, state);
        if parsed.is_none() {
            warn!(country, state, "metadata state not recognized, dropping it");
        }
        parsed
    });

    Some(RoughLocation::new(
        country,
        subdivision.as_deref(),
        record.city.as_deref(),
        record.location.as_deref(),
    ))
}

/// Direct fields first, keyword tree as fallback.
pub fn resolve_location(record: &MetadataRecord, geo: &GeoTable) -> Option<RoughLocation> {
    if let Some(location) = direct_location(record, geo) {
        return Some(location);
    }
    if record.has_location_fields() {
        debug!("falling back to location keywords");
    }
    project_location(&record.keywords, geo)
}

/// What the keyword and location projections attached to an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordOutcome {
    pub tags: usize,
    pub date: Option<RoughDate>,
    pub location: Option<RoughLocation>,
}

/// Run all three projections for an image and store the results.
pub fn apply_keywords(
    catalog: &Catalog,
    image_id: i64,
    record: &MetadataRecord,
    geo: &GeoTable,
) -> Result<KeywordOutcome> {
    let tags = project_tags(catalog, image_id, &record.keywords)?;

    let date = project_date(&record.keywords);
    let date_id = date.as_ref().map(|d| catalog.get_or_create_date(d)).transpose()?;
    catalog.set_image_date(image_id, date_id)?;

    let location = resolve_location(record, geo);
    let location_id = location
        .as_ref()
        .map(|l| catalog.get_or_create_location(l))
        .transpose()?;
    catalog.set_image_location(image_id, location_id)?;

    Ok(KeywordOutcome {
        tags,
        date,
        location,
    })
}
