use thiserror::Error;

use promptloops_db::EvaluationStatus;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Session error: {0}")]
    Session(#[from] promptloops_session::SessionError),

    #[error("Language service error: {0}")]
    Llm(#[from] promptloops_llm::LlmError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Evaluation not found: {0}")]
    NotFound(String),

    #[error("Evaluation cannot start from status {0}")]
    InvalidState(EvaluationStatus),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Test run failed: {0}")]
    RunFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
