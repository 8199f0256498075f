//! Database layer for promptloops.
//!
//! Provides a unified `Database` struct that owns the SQLite connection
//! and provides access to domain-specific stores.

mod evaluations;
mod personas;
mod prompts;
mod runs;

pub use evaluations::{
    EpochRecord, EvaluationFilter, EvaluationRecord, EvaluationStatus, EvaluationSummary,
    Evaluations, StoreStats,
};
pub use personas::{PersonaRecord, Personas};
pub use prompts::{PromptRecord, Prompts};
pub use runs::{RunStatus, Runs, SessionRecord, SessionStatus, TestRunRecord, TurnRecord};

use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Mutex;

/// The main database struct that owns the SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the default location.
    ///
    /// The default location is `~/.local/share/promptloops/promptloops.db`.
    pub fn open() -> Result<Self, rusqlite::Error> {
        let db_path = Self::default_path();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        Self::open_at(&db_path)
    }

    /// Open or create a database at a specific path.
    pub fn open_at(path: &std::path::Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the default database path.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("promptloops")
            .join("promptloops.db")
    }

    /// Access the evaluations/epochs store.
    pub fn evaluations(&self) -> Evaluations<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Evaluations::new(conn)
    }

    /// Access the test-run/session store.
    pub fn runs(&self) -> Runs<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Runs::new(conn)
    }

    /// Access the prompt history store.
    pub fn prompts(&self) -> Prompts<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Prompts::new(conn)
    }

    /// Access the persona store.
    pub fn personas(&self) -> Personas<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Personas::new(conn)
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS personas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                traits TEXT NOT NULL,
                system_fragment TEXT
            );

            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                avg_accuracy REAL,
                avg_latency_ms REAL,
                run_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS evaluations (
                id TEXT PRIMARY KEY,
                source_prompt TEXT NOT NULL,
                config TEXT NOT NULL,
                status TEXT NOT NULL,
                current_epoch INTEGER NOT NULL DEFAULT 0,
                best_prompt TEXT NOT NULL,
                best_metrics TEXT,
                cumulative_improvement REAL NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS epochs (
                id TEXT PRIMARY KEY,
                evaluation_id TEXT NOT NULL REFERENCES evaluations(id) ON DELETE CASCADE,
                number INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                run_id TEXT,
                persona_metrics TEXT,
                suggestions TEXT,
                snapshot TEXT,
                measured_value REAL,
                is_accepted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (evaluation_id, number)
            );

            CREATE TABLE IF NOT EXISTS test_runs (
                id TEXT PRIMARY KEY,
                evaluation_id TEXT,
                prompt_id TEXT,
                prompt TEXT NOT NULL,
                status TEXT NOT NULL,
                concurrency INTEGER NOT NULL,
                total_sessions INTEGER NOT NULL DEFAULT 0,
                completed_sessions INTEGER NOT NULL DEFAULT 0,
                failed_sessions INTEGER NOT NULL DEFAULT 0,
                avg_accuracy REAL,
                avg_latency_ms REAL,
                tokens_in INTEGER NOT NULL DEFAULT 0,
                tokens_out INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES test_runs(id) ON DELETE CASCADE,
                persona_id TEXT NOT NULL,
                instance INTEGER NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                accuracy REAL,
                avg_latency_ms REAL,
                error_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                started_at TEXT,
                ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                latency_ms INTEGER,
                tokens_in INTEGER,
                tokens_out INTEGER,
                UNIQUE (session_id, idx)
            );

            CREATE INDEX IF NOT EXISTS idx_epochs_evaluation ON epochs(evaluation_id, number);
            CREATE INDEX IF NOT EXISTS idx_sessions_run ON sessions(run_id);
            CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, idx);
            CREATE INDEX IF NOT EXISTS idx_evaluations_updated ON evaluations(updated_at DESC);
            "#,
        )
    }
}
