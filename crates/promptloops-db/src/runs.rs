//! Test-run and session store.
//!
//! The orchestrator pre-materializes sessions here before any work is
//! scheduled, each executor persists only its own session row, and run-level
//! aggregates are written once after the fan-in barrier.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;
use uuid::Uuid;

/// Status of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Status of a single session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// A persisted test run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunRecord {
    pub id: String,
    pub evaluation_id: Option<String>,
    pub prompt_id: Option<String>,
    pub prompt: String,
    pub status: RunStatus,
    pub concurrency: usize,
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub failed_sessions: usize,
    pub avg_accuracy: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A persisted session (transcript loaded separately)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub run_id: String,
    pub persona_id: String,
    pub instance: usize,
    pub status: SessionStatus,
    pub progress: u8,
    pub accuracy: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub error_count: usize,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One persisted transcript turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub idx: usize,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: Option<u64>,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
}

/// Run/session store with a borrowed connection.
pub struct Runs<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Runs<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Insert a new test run row.
    pub fn create_run(&self, run: &TestRunRecord) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            INSERT INTO test_runs (
                id, evaluation_id, prompt_id, prompt, status, concurrency,
                total_sessions, completed_sessions, failed_sessions,
                tokens_in, tokens_out, started_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                run.id,
                run.evaluation_id,
                run.prompt_id,
                run.prompt,
                run.status.to_string(),
                run.concurrency as i64,
                run.total_sessions as i64,
                run.completed_sessions as i64,
                run.failed_sessions as i64,
                run.tokens_in as i64,
                run.tokens_out as i64,
                run.started_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Bulk-insert one pending session per (persona, instance) pair.
    ///
    /// Runs in a single transaction so progress is observable all-or-nothing
    /// before execution starts. Returns the generated session ids in input
    /// order.
    pub fn insert_pending_sessions(
        &self,
        run_id: &str,
        pairs: &[(String, usize)],
    ) -> Result<Vec<String>, rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(pairs.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO sessions (id, run_id, persona_id, instance, status, progress)
                VALUES (?1, ?2, ?3, ?4, 'pending', 0)
                "#,
            )?;
            for (persona_id, instance) in pairs {
                let id = Uuid::new_v4().to_string();
                stmt.execute(params![id, run_id, persona_id, *instance as i64])?;
                ids.push(id);
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Transition a session from pending to running.
    pub fn mark_session_running(&self, session_id: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE sessions SET status = 'running', started_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    /// Persist transcript turns and the current progress percentage.
    ///
    /// Callers re-send the full transcript from index 0 on every flush, so
    /// each call fully determines the stored rows: existing indices are
    /// overwritten and surplus rows from an abandoned earlier attempt are
    /// deleted. Re-recording stays idempotent and a retried session never
    /// leaves stale turns behind.
    pub fn record_turns(
        &self,
        session_id: &str,
        turns: &[TurnRecord],
        progress: u8,
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO turns
                    (session_id, idx, role, content, timestamp, latency_ms, tokens_in, tokens_out)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for turn in turns {
                stmt.execute(params![
                    session_id,
                    turn.idx as i64,
                    turn.role,
                    turn.content,
                    turn.timestamp.to_rfc3339(),
                    turn.latency_ms.map(|v| v as i64),
                    turn.tokens_in.map(|v| v as i64),
                    turn.tokens_out.map(|v| v as i64),
                ])?;
            }
            tx.execute(
                "DELETE FROM turns WHERE session_id = ?1 AND idx >= ?2",
                params![session_id, turns.len() as i64],
            )?;
            tx.execute(
                "UPDATE sessions SET progress = ?1 WHERE id = ?2",
                params![progress as i64, session_id],
            )?;
        }
        tx.commit()
    }

    /// Record a session's terminal state.
    pub fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        accuracy: Option<f64>,
        avg_latency_ms: Option<f64>,
        error: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            UPDATE sessions SET
                status = ?1,
                progress = CASE WHEN ?1 = 'completed' THEN 100 ELSE progress END,
                accuracy = ?2,
                avg_latency_ms = ?3,
                error = ?4,
                error_count = error_count + CASE WHEN ?4 IS NULL THEN 0 ELSE 1 END,
                ended_at = ?5
            WHERE id = ?6
            "#,
            params![
                status.to_string(),
                accuracy,
                avg_latency_ms,
                error,
                Utc::now().to_rfc3339(),
                session_id,
            ],
        )?;
        Ok(())
    }

    /// Mark every not-yet-terminal session of a run as cancelled.
    ///
    /// Returns the number of sessions transitioned.
    pub fn cancel_remaining(&self, run_id: &str) -> Result<usize, rusqlite::Error> {
        let affected = self.conn.execute(
            r#"
            UPDATE sessions SET status = 'cancelled', ended_at = ?1
            WHERE run_id = ?2 AND status IN ('pending', 'running')
            "#,
            params![Utc::now().to_rfc3339(), run_id],
        )?;
        Ok(affected)
    }

    /// Update a run's status only.
    pub fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE test_runs SET status = ?1 WHERE id = ?2",
            params![status.to_string(), run_id],
        )?;
        Ok(())
    }

    /// Write the run's terminal status and aggregates in one update.
    #[allow(clippy::too_many_arguments)]
    pub fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        completed: usize,
        failed: usize,
        avg_accuracy: Option<f64>,
        avg_latency_ms: Option<f64>,
        tokens_in: u64,
        tokens_out: u64,
        error: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            UPDATE test_runs SET
                status = ?1,
                completed_sessions = ?2,
                failed_sessions = ?3,
                avg_accuracy = ?4,
                avg_latency_ms = ?5,
                tokens_in = ?6,
                tokens_out = ?7,
                error = ?8,
                ended_at = ?9
            WHERE id = ?10
            "#,
            params![
                status.to_string(),
                completed as i64,
                failed as i64,
                avg_accuracy,
                avg_latency_ms,
                tokens_in as i64,
                tokens_out as i64,
                error,
                Utc::now().to_rfc3339(),
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Delete a run by id (cascades to sessions and turns).
    pub fn delete_run(&self, run_id: &str) -> Result<bool, rusqlite::Error> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM test_runs WHERE id = ?1", params![run_id])?;
        Ok(rows_affected > 0)
    }

    /// Get a run by id.
    pub fn get_run(&self, run_id: &str) -> Result<Option<TestRunRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                r#"
                SELECT id, evaluation_id, prompt_id, prompt, status, concurrency,
                       total_sessions, completed_sessions, failed_sessions,
                       avg_accuracy, avg_latency_ms, tokens_in, tokens_out,
                       error, started_at, ended_at
                FROM test_runs WHERE id = ?1
                "#,
                params![run_id],
                Self::row_to_run,
            )
            .optional()
    }

    /// Get a session by id.
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                r#"
                SELECT id, run_id, persona_id, instance, status, progress,
                       accuracy, avg_latency_ms, error_count, error, started_at, ended_at
                FROM sessions WHERE id = ?1
                "#,
                params![session_id],
                Self::row_to_session,
            )
            .optional()
    }

    /// List all sessions of a run, ordered by persona then instance.
    pub fn list_sessions(&self, run_id: &str) -> Result<Vec<SessionRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, run_id, persona_id, instance, status, progress,
                   accuracy, avg_latency_ms, error_count, error, started_at, ended_at
            FROM sessions WHERE run_id = ?1
            ORDER BY persona_id, instance
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], Self::row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Load the ordered transcript of a session.
    pub fn get_turns(&self, session_id: &str) -> Result<Vec<TurnRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT idx, role, content, timestamp, latency_ms, tokens_in, tokens_out
            FROM turns WHERE session_id = ?1
            ORDER BY idx
            "#,
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let timestamp_str: String = row.get(3)?;
            Ok(TurnRecord {
                idx: row.get::<_, i64>(0)? as usize,
                role: row.get(1)?,
                content: row.get(2)?,
                timestamp: parse_ts(&timestamp_str),
                latency_ms: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
                tokens_in: row.get::<_, Option<i64>>(5)?.map(|v| v as u32),
                tokens_out: row.get::<_, Option<i64>>(6)?.map(|v| v as u32),
            })
        })?;

        let mut turns = Vec::new();
        for row in rows {
            turns.push(row?);
        }
        Ok(turns)
    }

    fn row_to_run(row: &rusqlite::Row) -> Result<TestRunRecord, rusqlite::Error> {
        let status_str: String = row.get(4)?;
        let started_at_str: String = row.get(14)?;
        let ended_at_str: Option<String> = row.get(15)?;

        Ok(TestRunRecord {
            id: row.get(0)?,
            evaluation_id: row.get(1)?,
            prompt_id: row.get(2)?,
            prompt: row.get(3)?,
            status: status_str.parse().unwrap_or(RunStatus::Failed),
            concurrency: row.get::<_, i64>(5)? as usize,
            total_sessions: row.get::<_, i64>(6)? as usize,
            completed_sessions: row.get::<_, i64>(7)? as usize,
            failed_sessions: row.get::<_, i64>(8)? as usize,
            avg_accuracy: row.get(9)?,
            avg_latency_ms: row.get(10)?,
            tokens_in: row.get::<_, i64>(11)? as u64,
            tokens_out: row.get::<_, i64>(12)? as u64,
            error: row.get(13)?,
            started_at: parse_ts(&started_at_str),
            ended_at: ended_at_str.map(|s| parse_ts(&s)),
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> Result<SessionRecord, rusqlite::Error> {
        let status_str: String = row.get(4)?;
        let started_at_str: Option<String> = row.get(10)?;
        let ended_at_str: Option<String> = row.get(11)?;

        Ok(SessionRecord {
            id: row.get(0)?,
            run_id: row.get(1)?,
            persona_id: row.get(2)?,
            instance: row.get::<_, i64>(3)? as usize,
            status: status_str.parse().unwrap_or(SessionStatus::Failed),
            progress: row.get::<_, i64>(5)? as u8,
            accuracy: row.get(6)?,
            avg_latency_ms: row.get(7)?,
            error_count: row.get::<_, i64>(8)? as usize,
            error: row.get(9)?,
            started_at: started_at_str.map(|s| parse_ts(&s)),
            ended_at: ended_at_str.map(|s| parse_ts(&s)),
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
