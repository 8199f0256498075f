//! Evaluation and epoch store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;
use uuid::Uuid;

/// Lifecycle of an evaluation campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl EvaluationStatus {
    /// Only pending and paused evaluations may be started.
    pub fn can_start(&self) -> bool {
        matches!(self, EvaluationStatus::Pending | EvaluationStatus::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationStatus::Pending => write!(f, "pending"),
            EvaluationStatus::Running => write!(f, "running"),
            EvaluationStatus::Paused => write!(f, "paused"),
            EvaluationStatus::Completed => write!(f, "completed"),
            EvaluationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EvaluationStatus::Pending),
            "running" => Ok(EvaluationStatus::Running),
            "paused" => Ok(EvaluationStatus::Paused),
            "completed" => Ok(EvaluationStatus::Completed),
            "failed" => Ok(EvaluationStatus::Failed),
            _ => Err(format!("Unknown evaluation status: {}", s)),
        }
    }
}

/// A persisted evaluation campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub id: String,
    pub source_prompt: String,
    /// Serialized `EvaluationConfig`
    pub config: String,
    pub status: EvaluationStatus,
    pub current_epoch: u32,
    pub best_prompt: String,
    /// Serialized best-so-far metric values
    pub best_metrics: Option<String>,
    pub cumulative_improvement: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One iteration of the optimization loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    pub id: String,
    pub evaluation_id: String,
    pub number: u32,
    pub prompt: String,
    pub run_id: Option<String>,
    /// Serialized per-persona metric breakdown
    pub persona_metrics: Option<String>,
    /// Serialized healing suggestions
    pub suggestions: Option<String>,
    /// Opaque point-in-time transcript sample for replay tooling
    pub snapshot: Option<String>,
    pub measured_value: Option<f64>,
    pub is_accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Summary row for list views
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub id: String,
    pub prompt_preview: String,
    pub status: EvaluationStatus,
    pub current_epoch: u32,
    pub cumulative_improvement: f64,
    pub updated_at: DateTime<Utc>,
}

/// Filter parameters for listing evaluations.
#[derive(Debug, Default, Clone)]
pub struct EvaluationFilter {
    pub status: Option<EvaluationStatus>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

/// Aggregate statistics over the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_evaluations: usize,
    pub completed_evaluations: usize,
    pub total_epochs: usize,
    pub accepted_epochs: usize,
    pub avg_improvement: f64,
}

/// Evaluations store with a borrowed connection.
pub struct Evaluations<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Evaluations<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Create a new pending evaluation, returning the generated id.
    pub fn create(&self, source_prompt: &str, config: &str) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            r#"
            INSERT INTO evaluations
                (id, source_prompt, config, status, current_epoch, best_prompt,
                 cumulative_improvement, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', 0, ?2, 0, ?4, ?4)
            "#,
            params![id, source_prompt, config, now],
        )?;
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<EvaluationRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                r#"
                SELECT id, source_prompt, config, status, current_epoch, best_prompt,
                       best_metrics, cumulative_improvement, error, created_at, updated_at
                FROM evaluations WHERE id = ?1
                "#,
                params![id],
                Self::row_to_record,
            )
            .optional()
    }

    /// List evaluations matching the given filter, most recent first.
    pub fn list(&self, filter: &EvaluationFilter) -> Result<Vec<EvaluationSummary>, rusqlite::Error> {
        let mut sql = String::from(
            r#"
            SELECT id, source_prompt, status, current_epoch, cumulative_improvement, updated_at
            FROM evaluations WHERE 1=1
            "#,
        );
        let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            param_values.push(Box::new(status.to_string()));
        }

        if let Some(ref search) = filter.search {
            sql.push_str(" AND source_prompt LIKE ?");
            param_values.push(Box::new(format!("%{}%", search)));
        }

        sql.push_str(" ORDER BY updated_at DESC");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            let prompt: String = row.get(1)?;
            let status_str: String = row.get(2)?;
            let updated_at_str: String = row.get(5)?;
            let prompt_preview = if prompt.chars().count() > 100 {
                format!("{}...", prompt.chars().take(100).collect::<String>())
            } else {
                prompt
            };
            Ok(EvaluationSummary {
                id: row.get(0)?,
                prompt_preview,
                status: status_str.parse().unwrap_or(EvaluationStatus::Failed),
                current_epoch: row.get::<_, i64>(3)? as u32,
                cumulative_improvement: row.get(4)?,
                updated_at: parse_ts(&updated_at_str),
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Update an evaluation's status, recording an error message on failure.
    pub fn update_status(
        &self,
        id: &str,
        status: EvaluationStatus,
        error: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE evaluations SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.to_string(), error, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Advance the current epoch counter.
    pub fn set_current_epoch(&self, id: &str, epoch: u32) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE evaluations SET current_epoch = ?1, updated_at = ?2 WHERE id = ?3",
            params![epoch as i64, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Record a newly accepted best prompt and its metric values.
    pub fn update_best(
        &self,
        id: &str,
        best_prompt: &str,
        best_metrics: &str,
        cumulative_improvement: f64,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            UPDATE evaluations SET
                best_prompt = ?1, best_metrics = ?2,
                cumulative_improvement = ?3, updated_at = ?4
            WHERE id = ?5
            "#,
            params![
                best_prompt,
                best_metrics,
                cumulative_improvement,
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        Ok(())
    }

    /// Append an epoch row, returning its generated id.
    ///
    /// The UNIQUE(evaluation_id, number) constraint enforces contiguous
    /// numbering at the caller's responsibility; repeats are rejected here.
    pub fn insert_epoch(&self, epoch: &EpochRecord) -> Result<String, rusqlite::Error> {
        let id = if epoch.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            epoch.id.clone()
        };

        self.conn.execute(
            r#"
            INSERT INTO epochs
                (id, evaluation_id, number, prompt, run_id, persona_metrics,
                 suggestions, snapshot, measured_value, is_accepted, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                id,
                epoch.evaluation_id,
                epoch.number as i64,
                epoch.prompt,
                epoch.run_id,
                epoch.persona_metrics,
                epoch.suggestions,
                epoch.snapshot,
                epoch.measured_value,
                epoch.is_accepted,
                epoch.created_at.to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Flip an epoch's accept flag after the decision is made.
    pub fn set_epoch_accepted(&self, epoch_id: &str, accepted: bool) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE epochs SET is_accepted = ?1 WHERE id = ?2",
            params![accepted, epoch_id],
        )?;
        Ok(())
    }

    /// List an evaluation's epochs in order.
    pub fn list_epochs(&self, evaluation_id: &str) -> Result<Vec<EpochRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, evaluation_id, number, prompt, run_id, persona_metrics,
                   suggestions, snapshot, measured_value, is_accepted, created_at
            FROM epochs WHERE evaluation_id = ?1
            ORDER BY number
            "#,
        )?;
        let rows = stmt.query_map(params![evaluation_id], |row| {
            let created_at_str: String = row.get(10)?;
            Ok(EpochRecord {
                id: row.get(0)?,
                evaluation_id: row.get(1)?,
                number: row.get::<_, i64>(2)? as u32,
                prompt: row.get(3)?,
                run_id: row.get(4)?,
                persona_metrics: row.get(5)?,
                suggestions: row.get(6)?,
                snapshot: row.get(7)?,
                measured_value: row.get(8)?,
                is_accepted: row.get(9)?,
                created_at: parse_ts(&created_at_str),
            })
        })?;

        let mut epochs = Vec::new();
        for row in rows {
            epochs.push(row?);
        }
        Ok(epochs)
    }

    /// Aggregate statistics over all evaluations.
    pub fn stats(&self) -> Result<StoreStats, rusqlite::Error> {
        let (total_evaluations, completed_evaluations, avg_improvement): (i64, i64, Option<f64>) =
            self.conn.query_row(
                r#"
                SELECT COUNT(*),
                       COUNT(CASE WHEN status = 'completed' THEN 1 END),
                       AVG(cumulative_improvement)
                FROM evaluations
                "#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let (total_epochs, accepted_epochs): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(CASE WHEN is_accepted THEN 1 END) FROM epochs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            total_evaluations: total_evaluations as usize,
            completed_evaluations: completed_evaluations as usize,
            total_epochs: total_epochs as usize,
            accepted_epochs: accepted_epochs as usize,
            avg_improvement: avg_improvement.unwrap_or(0.0),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<EvaluationRecord, rusqlite::Error> {
        let status_str: String = row.get(3)?;
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;

        Ok(EvaluationRecord {
            id: row.get(0)?,
            source_prompt: row.get(1)?,
            config: row.get(2)?,
            status: status_str.parse().unwrap_or(EvaluationStatus::Failed),
            current_epoch: row.get::<_, i64>(4)? as u32,
            best_prompt: row.get(5)?,
            best_metrics: row.get(6)?,
            cumulative_improvement: row.get(7)?,
            error: row.get(8)?,
            created_at: parse_ts(&created_at_str),
            updated_at: parse_ts(&updated_at_str),
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
