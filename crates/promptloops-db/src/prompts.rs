//! Prompt history store with rolling-average metrics.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;

/// A stored prompt with its historical performance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    pub id: String,
    pub content: String,
    pub avg_accuracy: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub run_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Prompts store with a borrowed connection.
pub struct Prompts<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Prompts<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Save a prompt (insert or update content).
    pub fn save(&self, id: &str, content: &str) -> Result<(), rusqlite::Error> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO prompts (id, content, run_count, created_at, updated_at)
            VALUES (?1, ?2, 0, ?3, ?3)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
            params![id, content, now],
        )?;
        Ok(())
    }

    /// Get a prompt by id.
    pub fn get(&self, id: &str) -> Result<Option<PromptRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                r#"
                SELECT id, content, avg_accuracy, avg_latency_ms, run_count, created_at, updated_at
                FROM prompts WHERE id = ?1
                "#,
                params![id],
                Self::row_to_record,
            )
            .optional()
    }

    /// Fold one run's averages into the prompt's rolling record.
    ///
    /// Incremental weighted mean: `new = (old * count + run_avg) / (count + 1)`.
    /// A run with no valid sample for a metric leaves that rolling average
    /// and its weight untouched.
    pub fn record_run(
        &self,
        id: &str,
        run_avg_accuracy: Option<f64>,
        run_avg_latency_ms: Option<f64>,
    ) -> Result<(), rusqlite::Error> {
        let existing = self.get(id)?;
        let Some(record) = existing else {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        };

        let count = record.run_count as f64;
        let avg_accuracy = fold_mean(record.avg_accuracy, count, run_avg_accuracy);
        let avg_latency_ms = fold_mean(record.avg_latency_ms, count, run_avg_latency_ms);

        self.conn.execute(
            r#"
            UPDATE prompts SET
                avg_accuracy = ?1,
                avg_latency_ms = ?2,
                run_count = run_count + 1,
                updated_at = ?3
            WHERE id = ?4
            "#,
            params![avg_accuracy, avg_latency_ms, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Delete a prompt by id.
    pub fn delete(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM prompts WHERE id = ?1", params![id])?;
        Ok(rows_affected > 0)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<PromptRecord, rusqlite::Error> {
        let created_at_str: String = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        Ok(PromptRecord {
            id: row.get(0)?,
            content: row.get(1)?,
            avg_accuracy: row.get(2)?,
            avg_latency_ms: row.get(3)?,
            run_count: row.get::<_, i64>(4)? as usize,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

fn fold_mean(old: Option<f64>, old_count: f64, sample: Option<f64>) -> Option<f64> {
    match (old, sample) {
        (Some(old), Some(sample)) => Some((old * old_count + sample) / (old_count + 1.0)),
        (None, Some(sample)) => Some(sample),
        (old, None) => old,
    }
}
