use tracing::{info, warn};

use promptloops_llm::{LanguageService, LlmError, OptimizeRequest, Turn};

use crate::HealingSuggestion;

/// Inputs gathered by the epoch controller for one rewrite proposal.
#[derive(Debug, Clone)]
pub struct RewriteInput {
    pub current_prompt: String,
    pub persona_metrics: serde_json::Value,
    pub suggestions: Vec<HealingSuggestion>,
    pub transcript_samples: Vec<Vec<Turn>>,
    pub target_metric: String,
    pub conversion_goals: Vec<String>,
}

/// Where a candidate prompt came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    /// The optimization collaborator proposed it
    Optimizer,
    /// Fallback: the named suggestion's prompt applied verbatim
    Suggestion(String),
    /// Fallback of last resort: the prompt is unchanged
    NoOp,
}

/// A candidate prompt for the next accept/reject decision
#[derive(Debug, Clone)]
pub struct Candidate {
    pub prompt: String,
    pub changes: Vec<String>,
    pub predicted_impact: f64,
    pub source: CandidateSource,
}

/// Drives the optimization collaborator with the documented fallback chain.
pub struct PromptRewriter<'a> {
    service: &'a dyn LanguageService,
}

impl<'a> PromptRewriter<'a> {
    pub fn new(service: &'a dyn LanguageService) -> Self {
        Self { service }
    }

    /// Propose a candidate prompt for the next epoch.
    ///
    /// Never fails: if the collaborator errors, the highest-confidence
    /// healing suggestion with a concrete prompt is applied verbatim; if
    /// none exists the current prompt is kept as an explicit no-op.
    pub async fn propose(&self, input: RewriteInput) -> Candidate {
        let request = OptimizeRequest {
            current_prompt: input.current_prompt.clone(),
            persona_metrics: input.persona_metrics.clone(),
            suggestions: serde_json::to_value(&input.suggestions)
                .unwrap_or(serde_json::Value::Null),
            transcript_samples: input.transcript_samples.clone(),
            target_metric: input.target_metric.clone(),
            conversion_goals: input.conversion_goals.clone(),
        };

        match self.service.optimize_prompt(request).await {
            Ok(reply) if !reply.candidate_prompt.trim().is_empty() => {
                info!(
                    predicted_impact = reply.predicted_impact,
                    changes = reply.changes.len(),
                    "Optimizer proposed a candidate"
                );
                Candidate {
                    prompt: reply.candidate_prompt,
                    changes: reply.changes,
                    predicted_impact: reply.predicted_impact,
                    source: CandidateSource::Optimizer,
                }
            }
            Ok(_) => {
                warn!("Optimizer returned an empty candidate, falling back");
                self.fallback(&input, "empty candidate")
            }
            Err(e) => {
                warn!(error = %e, "Optimizer failed, falling back");
                self.fallback(&input, &e.to_string())
            }
        }
    }

    fn fallback(&self, input: &RewriteInput, _reason: &str) -> Candidate {
        // Suggestions arrive ranked; take the best one that is applicable
        let best = input
            .suggestions
            .iter()
            .find(|s| s.suggested_prompt.is_some());

        match best {
            Some(suggestion) => {
                let prompt = suggestion
                    .suggested_prompt
                    .clone()
                    .unwrap_or_else(|| input.current_prompt.clone());
                Candidate {
                    prompt,
                    changes: vec![format!("applied suggestion for {}", suggestion.issue)],
                    predicted_impact: 0.0,
                    source: CandidateSource::Suggestion(suggestion.issue.clone()),
                }
            }
            None => Candidate {
                prompt: input.current_prompt.clone(),
                changes: vec![],
                predicted_impact: 0.0,
                source: CandidateSource::NoOp,
            },
        }
    }
}

/// Classify whether an optimizer failure should have been retried upstream.
pub fn is_retryable(error: &LlmError) -> bool {
    error.is_transient()
}
