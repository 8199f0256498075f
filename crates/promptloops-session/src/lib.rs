pub mod executor;
pub mod scenario;
pub mod starters;

pub use executor::{SessionExecutor, SessionReport, SessionSink, SessionTermination};
pub use scenario::{Assertion, Scenario, ScenarioReport, ScenarioRunner, ScenarioStep, Sentiment, StepResult};
pub use starters::PhraseBook;

use thiserror::Error;

use promptloops_llm::LlmError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Language service error: {0}")]
    Llm(#[from] LlmError),

    #[error("Persistence error: {0}")]
    Sink(String),

    #[error("Session has no persona starter pool for {0}")]
    NoStarters(String),
}

impl SessionError {
    /// Whether the scheduling substrate may retry the whole session.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Llm(e) if e.is_transient())
    }
}
