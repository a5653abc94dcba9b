//! Catalog value types shared by the interpreters, the database layer and
//! metadata sync.

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;
use std::fmt;

/// Largest valid day per month. February allows 29 regardless of year.
pub const MONTH_MAX_DAYS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A date that may only be known to the year or to the month.
///
/// Parts that are not valid are stored as 1 so that equal knowledge always
/// maps to the same `(date, month_valid, day_valid)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoughDate {
    date: NaiveDate,
    month_valid: bool,
    day_valid: bool,
}

impl RoughDate {
    /// Build from a full date and validity flags. A valid day without a
    /// valid month is rejected.
    pub fn new(date: NaiveDate, month_valid: bool, day_valid: bool) -> Result<Self> {
        if day_valid && !month_valid {
            bail!("a rough date cannot have a valid day without a valid month");
        }
        let month = if month_valid { date.month() } else { 1 };
        let day = if day_valid { date.day() } else { 1 };
        let date = match NaiveDate::from_ymd_opt(date.year(), month, day) {
            Some(date) => date,
            None => bail!("invalid date {}-{}-{}", date.year(), month, day),
        };
        Ok(Self {
            date,
            month_valid,
            day_valid,
        })
    }

    pub fn year_only(year: i32) -> Option<Self> {
        Some(Self {
            date: NaiveDate::from_ymd_opt(year, 1, 1)?,
            month_valid: false,
            day_valid: false,
        })
    }

    pub fn year_month(year: i32, month: u32) -> Option<Self> {
        Some(Self {
            date: NaiveDate::from_ymd_opt(year, month, 1)?,
            month_valid: true,
            day_valid: false,
        })
    }

    pub fn full(year: i32, month: u32, day: u32) -> Option<Self> {
        Some(Self {
            date: NaiveDate::from_ymd_opt(year, month, day)?,
            month_valid: true,
            day_valid: true,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> Option<u32> {
        self.month_valid.then(|| self.date.month())
    }

    pub fn day(&self) -> Option<u32> {
        self.day_valid.then(|| self.date.day())
    }

    pub fn month_valid(&self) -> bool {
        self.month_valid
    }

    pub fn day_valid(&self) -> bool {
        self.day_valid
    }
}

impl fmt::Display for RoughDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.month(), self.day()) {
            (Some(m), Some(d)) => write!(f, "{:04}-{:02}-{:02}", self.year(), m, d),
            (Some(m), None) => write!(f, "{:04}-{:02}", self.year(), m),
            _ => write!(f, "{:04}", self.year()),
        }
    }
}

/// Country, subdivision, city, sub-location. Only the country is required.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoughLocation {
    pub country: String,
    pub subdivision: Option<String>,
    pub city: Option<String>,
    pub sub_location: Option<String>,
}

impl RoughLocation {
    /// Empty or whitespace-only optional parts count as absent.
    pub fn new(
        country: &str,
        subdivision: Option<&str>,
        city: Option<&str>,
        sub_location: Option<&str>,
    ) -> Self {
        fn clean(value: Option<&str>) -> Option<String> {
            value
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        }

        Self {
            country: country.trim().to_uppercase(),
            subdivision: clean(subdivision).map(|s| s.to_uppercase()),
            city: clean(city),
            sub_location: clean(sub_location),
        }
    }

    pub fn country_only(country: &str) -> Self {
        Self::new(country, None, None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Access {
    View,
    Edit,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::View => "view",
            Access::Edit => "edit",
        }
    }
}

/// Opaque permission group names attached to catalog rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSet {
    pub view: BTreeSet<String>,
    pub edit: BTreeSet<String>,
}

impl GroupSet {
    pub fn new<I, J, S, T>(view: I, edit: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            view: view.into_iter().map(Into::into).collect(),
            edit: edit.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty() && self.edit.is_empty()
    }

    /// `(access, group)` pairs in a stable order.
    pub fn entries(&self) -> impl Iterator<Item = (Access, &str)> {
        self.view
            .iter()
            .map(|g| (Access::View, g.as_str()))
            .chain(self.edit.iter().map(|g| (Access::Edit, g.as_str())))
    }
}

/// How supplied groups combine with the ones already on a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    Merge,
    Overwrite,
}

/// Normalized bounding box, center coordinates plus size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn is_normalized(&self) -> bool {
        [self.center_x, self.center_y, self.width, self.height]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_without_month_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2020, 6, 15).unwrap();
        assert!(RoughDate::new(date, false, true).is_err());
        assert!(RoughDate::new(date, true, true).is_ok());
    }

    #[test]
    fn test_invalid_parts_are_normalized() {
        let a = RoughDate::new(NaiveDate::from_ymd_opt(2020, 6, 15).unwrap(), false, false).unwrap();
        let b = RoughDate::new(NaiveDate::from_ymd_opt(2020, 11, 3).unwrap(), false, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, RoughDate::year_only(2020).unwrap());
        assert_eq!(a.to_string(), "2020");

        let c = RoughDate::new(NaiveDate::from_ymd_opt(2020, 6, 15).unwrap(), true, false).unwrap();
        assert_eq!(c.date(), NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
        assert_eq!(c.to_string(), "2020-06");
        assert_eq!(c.day(), None);
    }

    #[test]
    fn test_location_normalizes_empty_parts() {
        let loc = RoughLocation::new("us", Some(" "), Some("Seattle"), Some(""));
        assert_eq!(loc.country, "US");
        assert_eq!(loc.subdivision, None);
        assert_eq!(loc.city.as_deref(), Some("Seattle"));
        assert_eq!(loc.sub_location, None);
    }

    #[test]
    fn test_bounding_box_range() {
        let inside = BoundingBox { center_x: 0.5, center_y: 0.5, width: 0.2, height: 1.0 };
        let outside = BoundingBox { center_x: 1.2, ..inside };
        assert!(inside.is_normalized());
        assert!(!outside.is_normalized());
    }
}
