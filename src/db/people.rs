use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::retry::get_or_create;
use super::Catalog;
use crate::model::BoundingBox;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pet {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonRegion {
    pub person: Person,
    pub bbox: BoundingBox,
    pub description: Option<String>,
    pub exclude_from_training: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PetRegion {
    pub pet: Pet,
    pub bbox: BoundingBox,
    pub description: Option<String>,
}

/// Table names for the two kinds of named subject.
struct Subject {
    table: &'static str,
    link: &'static str,
}

const PERSON: Subject = Subject {
    table: "people",
    link: "person_in_image",
};

const PET: Subject = Subject {
    table: "pets",
    link: "pet_in_image",
};

type Named = (i64, String, Option<String>);

impl Catalog<'_> {
    fn get_or_create_subject(&self, subject: &Subject, name: &str) -> Result<(Named, bool)> {
        let find_sql = format!("SELECT id, name, description FROM {} WHERE name = ?1", subject.table);
        let insert_sql = format!("INSERT INTO {} (name) VALUES (?1)", subject.table);

        get_or_create(
            &self.retry,
            subject.table,
            || {
                self.conn
                    .query_row(&find_sql, params![name], |row| {
                        Ok(((row.get(0)?, row.get(1)?, row.get(2)?), false))
                    })
                    .optional()
            },
            || {
                self.conn.execute(&insert_sql, params![name])?;
                Ok(((self.conn.last_insert_rowid(), name.to_string(), None), true))
            },
        )
    }

    fn set_subject_description(&self, subject: &Subject, id: i64, description: &str) -> Result<()> {
        self.conn.execute(
            &format!("UPDATE {} SET description = ?1 WHERE id = ?2", subject.table),
            params![description, id],
        )?;
        Ok(())
    }

    /// Existing person by exact name, or a new one. The flag is true when
    /// the person was created by this call.
    pub fn get_or_create_person(&self, name: &str) -> Result<(Person, bool)> {
        let ((id, name, description), created) = self.get_or_create_subject(&PERSON, name)?;
        Ok((Person { id, name, description }, created))
    }

    pub fn get_or_create_pet(&self, name: &str) -> Result<(Pet, bool)> {
        let ((id, name, description), created) = self.get_or_create_subject(&PET, name)?;
        Ok((Pet { id, name, description }, created))
    }

    pub fn set_person_description(&self, person_id: i64, description: &str) -> Result<()> {
        self.set_subject_description(&PERSON, person_id, description)
    }

    pub fn set_pet_description(&self, pet_id: i64, description: &str) -> Result<()> {
        self.set_subject_description(&PET, pet_id, description)
    }

    pub fn add_person_region(
        &self,
        image_id: i64,
        person_id: i64,
        bbox: &BoundingBox,
        description: Option<&str>,
        exclude_from_training: bool,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO person_in_image
             (image_id, person_id, center_x, center_y, width, height, description, exclude_from_training)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                image_id,
                person_id,
                bbox.center_x,
                bbox.center_y,
                bbox.width,
                bbox.height,
                description,
                exclude_from_training
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_pet_region(
        &self,
        image_id: i64,
        pet_id: i64,
        bbox: &BoundingBox,
        description: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO pet_in_image
             (image_id, pet_id, center_x, center_y, width, height, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                image_id,
                pet_id,
                bbox.center_x,
                bbox.center_y,
                bbox.width,
                bbox.height,
                description
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Drop every person and pet association of an image.
    pub fn clear_image_regions(&self, image_id: i64) -> Result<()> {
        for subject in [&PERSON, &PET] {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE image_id = ?1", subject.link),
                params![image_id],
            )?;
        }
        Ok(())
    }

    pub fn image_people(&self, image_id: i64) -> Result<Vec<PersonRegion>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT p.id, p.name, p.description,
                    r.center_x, r.center_y, r.width, r.height, r.description, r.exclude_from_training
             FROM person_in_image r JOIN people p ON p.id = r.person_id
             WHERE r.image_id = ?1
             ORDER BY r.id",
        )?;
        let regions = stmt
            .query_map(params![image_id], |row| {
                Ok(PersonRegion {
                    person: Person {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    },
                    bbox: BoundingBox {
                        center_x: row.get(3)?,
                        center_y: row.get(4)?,
                        width: row.get(5)?,
                        height: row.get(6)?,
                    },
                    description: row.get(7)?,
                    exclude_from_training: row.get(8)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(regions)
    }

    pub fn image_pets(&self, image_id: i64) -> Result<Vec<PetRegion>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT p.id, p.name, p.description,
                    r.center_x, r.center_y, r.width, r.height, r.description
             FROM pet_in_image r JOIN pets p ON p.id = r.pet_id
             WHERE r.image_id = ?1
             ORDER BY r.id",
        )?;
        let regions = stmt
            .query_map(params![image_id], |row| {
                Ok(PetRegion {
                    pet: Pet {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    },
                    bbox: BoundingBox {
                        center_x: row.get(3)?,
                        center_y: row.get(4)?,
                        width: row.get(5)?,
                        height: row.get(6)?,
                    },
                    description: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(regions)
    }

    pub fn find_person(&self, name: &str) -> Result<Option<Person>> {
        let person = self
            .conn
            .query_row(
                "SELECT id, name, description FROM people WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Person {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(person)
    }
}
