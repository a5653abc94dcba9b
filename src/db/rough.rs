use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::retry::get_or_create;
use super::Catalog;
use crate::model::{RoughDate, RoughLocation};

impl Catalog<'_> {
    /// Id of the row for this date triple, inserting it if needed.
    pub fn get_or_create_date(&self, date: &RoughDate) -> Result<i64> {
        let day = date.date().format("%Y-%m-%d").to_string();
        let (month_valid, day_valid) = (date.month_valid(), date.day_valid());

        get_or_create(
            &self.retry,
            "rough date",
            || {
                self.conn
                    .query_row(
                        "SELECT id FROM rough_dates WHERE date = ?1 AND month_valid = ?2 AND day_valid = ?3",
                        params![day, month_valid, day_valid],
                        |row| row.get(0),
                    )
                    .optional()
            },
            || {
                self.conn.execute(
                    "INSERT INTO rough_dates (date, month_valid, day_valid) VALUES (?1, ?2, ?3)",
                    params![day, month_valid, day_valid],
                )?;
                Ok(self.conn.last_insert_rowid())
            },
        )
    }

    pub fn get_date(&self, id: i64) -> Result<Option<RoughDate>> {
        let row = self
            .conn
            .query_row(
                "SELECT date, month_valid, day_valid FROM rough_dates WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((date, month_valid, day_valid)) => {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("Bad stored rough date {}", date))?;
                Ok(Some(RoughDate::new(date, month_valid, day_valid)?))
            }
            None => Ok(None),
        }
    }

    /// Id of the row for this location, inserting it if needed. Absent
    /// parts only match absent parts.
    pub fn get_or_create_location(&self, location: &RoughLocation) -> Result<i64> {
        let RoughLocation {
            country,
            subdivision,
            city,
            sub_location,
        } = location;

        get_or_create(
            &self.retry,
            "rough location",
            || {
                self.conn
                    .query_row(
                        "SELECT id FROM rough_locations
                         WHERE country = ?1 AND subdivision IS ?2 AND city IS ?3 AND sub_location IS ?4",
                        params![country, subdivision, city, sub_location],
                        |row| row.get(0),
                    )
                    .optional()
            },
            || {
                self.conn.execute(
                    "INSERT INTO rough_locations (country, subdivision, city, sub_location)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![country, subdivision, city, sub_location],
                )?;
                Ok(self.conn.last_insert_rowid())
            },
        )
    }

    pub fn get_location(&self, id: i64) -> Result<Option<RoughLocation>> {
        let location = self
            .conn
            .query_row(
                "SELECT country, subdivision, city, sub_location FROM rough_locations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RoughLocation {
                        country: row.get(0)?,
                        subdivision: row.get(1)?,
                        city: row.get(2)?,
                        sub_location: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_db;
    use crate::model::{RoughDate, RoughLocation};

    #[test]
    fn test_date_upsert_is_idempotent() {
        let db = test_db();
        let catalog = db.catalog();

        let date = RoughDate::year_month(2021, 7).unwrap();
        let first = catalog.get_or_create_date(&date).unwrap();
        let second = catalog.get_or_create_date(&date).unwrap();
        assert_eq!(first, second);

        let year = catalog.get_or_create_date(&RoughDate::year_only(2021).unwrap()).unwrap();
        assert_ne!(first, year);

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM rough_dates", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(catalog.get_date(first).unwrap(), Some(date));
    }

    #[test]
    fn test_store_rejects_day_without_month() {
        let db = test_db();
        let result = db.connection().execute(
            "INSERT INTO rough_dates (date, month_valid, day_valid) VALUES ('2020-01-05', 0, 1)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_location_scoping_treats_absent_as_distinct() {
        let db = test_db();
        let catalog = db.catalog();

        let city_only = RoughLocation::new("US", None, Some("Springfield"), None);
        let with_state = RoughLocation::new("US", Some("US-IL"), Some("Springfield"), None);

        let a = catalog.get_or_create_location(&city_only).unwrap();
        let b = catalog.get_or_create_location(&with_state).unwrap();
        assert_ne!(a, b);

        assert_eq!(catalog.get_or_create_location(&city_only).unwrap(), a);
        assert_eq!(catalog.get_or_create_location(&with_state).unwrap(), b);

        let empty_parts = RoughLocation::new("us", Some(""), Some("Springfield"), Some("  "));
        assert_eq!(catalog.get_or_create_location(&empty_parts).unwrap(), a);
        assert_eq!(catalog.get_location(b).unwrap(), Some(with_state));
    }

    #[test]
    fn test_country_only_location_is_one_row() {
        let db = test_db();
        let catalog = db.catalog();

        let country = catalog.get_or_create_location(&RoughLocation::country_only("US")).unwrap();
        assert_eq!(catalog.get_or_create_location(&RoughLocation::country_only("US")).unwrap(), country);

        let city = catalog
            .get_or_create_location(&RoughLocation::new("US", None, Some("Seattle"), None))
            .unwrap();
        assert_ne!(city, country);

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM rough_locations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(catalog.get_location(country).unwrap(), Some(RoughLocation::country_only("US")));
    }

    #[test]
    fn test_duplicate_absent_parts_hit_the_unique_index() {
        let db = test_db();
        let insert = "INSERT INTO rough_locations (country, city) VALUES ('FR', 'Paris')";
        db.connection().execute(insert, []).unwrap();
        assert!(db.connection().execute(insert, []).is_err());
    }
}
