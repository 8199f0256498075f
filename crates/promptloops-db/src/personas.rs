//! Persona reference store.
//!
//! Personas are owned by the surrounding product; the engine only reads
//! them, so this store is a plain CRUD surface.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;

/// A stored persona profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaRecord {
    pub id: String,
    pub name: String,
    /// JSON array of trait names
    pub traits: String,
    pub system_fragment: Option<String>,
}

/// Personas store with a borrowed connection.
pub struct Personas<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Personas<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Save a persona (insert or update).
    pub fn save(&self, record: &PersonaRecord) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            INSERT INTO personas (id, name, traits, system_fragment)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                traits = excluded.traits,
                system_fragment = excluded.system_fragment
            "#,
            params![record.id, record.name, record.traits, record.system_fragment],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PersonaRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT id, name, traits, system_fragment FROM personas WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()
    }

    pub fn list(&self) -> Result<Vec<PersonaRecord>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, traits, system_fragment FROM personas ORDER BY name")?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn delete(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM personas WHERE id = ?1", params![id])?;
        Ok(rows_affected > 0)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<PersonaRecord, rusqlite::Error> {
        Ok(PersonaRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            traits: row.get(2)?,
            system_fragment: row.get(3)?,
        })
    }
}
