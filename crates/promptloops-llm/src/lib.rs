//! # promptloops-llm
//!
//! The language-generation collaborator interface consumed by the evaluation
//! engine, plus the conversation types that flow through it.
//!
//! ## Key Types
//!
//! - [`LanguageService`] - The four collaborator operations
//! - [`Turn`] / [`TurnRole`] - Transcript entries
//! - [`Persona`] / [`PersonaTrait`] - Synthetic-user profiles
//! - [`LlmError`] - Failure taxonomy with transient classification

mod persona;
mod service;
mod transcript;

pub use persona::{Persona, PersonaTrait};
pub use service::{
    AgentReply, IssueSeverity, LanguageService, LlmError, OptimizeReply, OptimizeRequest,
    TranscriptAnalysis, TranscriptIssue,
};
pub use transcript::{agent_text, context_window, Turn, TurnRole};
