use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Persona, Turn};

/// Errors from the language-generation service.
///
/// `Unavailable` and `Timeout` are transient: the scheduling layer may retry
/// them with backoff. `Malformed` means the service answered but the output
/// could not be used; callers take their documented fallback path instead of
/// retrying.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Language service unavailable: {0}")]
    Unavailable(String),

    #[error("Language service call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed service output: {0}")]
    Malformed(String),

    #[error("Language service error: {0}")]
    Other(String),
}

impl LlmError {
    /// Whether the scheduling substrate should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Unavailable(_) | LlmError::Timeout(_))
    }
}

/// An agent-side reply with token accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Severity of a transcript issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueSeverity::Low => write!(f, "low"),
            IssueSeverity::Medium => write!(f, "medium"),
            IssueSeverity::High => write!(f, "high"),
            IssueSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A categorized problem found while analyzing a transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptIssue {
    pub category: String,
    pub severity: IssueSeverity,
    pub description: String,
    /// Optional replacement prompt text addressing this issue
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

/// Result of analyzing one finished transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptAnalysis {
    /// Accuracy score, 0-100
    pub accuracy: f64,
    pub issues: Vec<TranscriptIssue>,
}

/// Everything the optimizer operation needs to propose a rewrite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub current_prompt: String,
    /// Per-persona metric breakdown, serialized by the caller
    pub persona_metrics: serde_json::Value,
    /// Ranked healing suggestions, serialized by the caller
    pub suggestions: serde_json::Value,
    /// A small sample of raw transcripts for grounding
    pub transcript_samples: Vec<Vec<Turn>>,
    pub target_metric: String,
    pub conversion_goals: Vec<String>,
}

/// The optimizer's proposed rewrite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReply {
    pub candidate_prompt: String,
    #[serde(default)]
    pub changes: Vec<String>,
    /// Predicted improvement of the target metric, in metric points
    #[serde(default)]
    pub predicted_impact: f64,
}

/// The core abstraction over the language-generation collaborator.
///
/// All four operations may fail; every caller has a documented deterministic
/// fallback. Implementations must be safe to call concurrently.
#[async_trait]
pub trait LanguageService: Send + Sync {
    /// Human-readable backend name (e.g. "canned", "openai")
    fn name(&self) -> &str;

    /// Generate the next synthetic user message from recent context
    async fn generate_user_turn(
        &self,
        persona: &Persona,
        context: &[Turn],
    ) -> Result<String, LlmError>;

    /// Generate the agent reply for the candidate prompt and full transcript
    async fn generate_agent_turn(
        &self,
        prompt: &str,
        transcript: &[Turn],
    ) -> Result<AgentReply, LlmError>;

    /// Score a finished transcript and categorize its issues
    async fn analyze_transcript(
        &self,
        transcript: &[Turn],
        persona: &Persona,
    ) -> Result<TranscriptAnalysis, LlmError>;

    /// Propose a rewritten prompt expected to improve the target metric
    async fn optimize_prompt(&self, request: OptimizeRequest) -> Result<OptimizeReply, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Unavailable("503".into()).is_transient());
        assert!(LlmError::Timeout(std::time::Duration::from_secs(5)).is_transient());
        assert!(!LlmError::Malformed("bad json".into()).is_transient());
        assert!(!LlmError::Other("boom".into()).is_transient());
    }

    #[test]
    fn test_issue_severity_ordering() {
        assert!(IssueSeverity::Critical > IssueSeverity::High);
        assert!(IssueSeverity::High > IssueSeverity::Medium);
        assert!(IssueSeverity::Medium > IssueSeverity::Low);
    }
}
