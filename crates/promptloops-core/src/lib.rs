mod config;
mod controller;
mod error;
mod orchestrator;
mod outcome;
mod scheduler;

pub use config::{builtin_persona, EvaluationConfig, RetryPolicy};
pub use controller::EpochController;
pub use error::EvalError;
pub use orchestrator::{RunResult, RunSpec, TestRunOrchestrator};
pub use outcome::EvaluationOutcome;
pub use scheduler::{with_retry, Retryable, Scheduler};
