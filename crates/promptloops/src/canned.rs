//! Offline deterministic language-service backend.
//!
//! Produces fixed, prompt-sensitive replies so the full evaluation loop can
//! run without network access. Useful for smoke runs and demos; reproducible
//! by construction.

use async_trait::async_trait;

use promptloops_llm::{
    agent_text, AgentReply, IssueSeverity, LanguageService, LlmError, OptimizeReply,
    OptimizeRequest, Persona, TranscriptAnalysis, TranscriptIssue, Turn, TurnRole,
};
use promptloops_optimizer::{CandidateRewrite, HealingSuggestion, OptimizerPrompts};

const PRICING_DIRECTIVE: &str =
    "Always state the monthly price and end with a clear call to action.";

pub struct CannedService;

impl CannedService {
    fn wants_pricing(transcript: &[Turn]) -> bool {
        transcript
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::User)
            .map(|t| {
                let lowered = t.content.to_lowercase();
                lowered.contains("cost") || lowered.contains("price") || lowered.contains("much")
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl LanguageService for CannedService {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate_user_turn(
        &self,
        _persona: &Persona,
        context: &[Turn],
    ) -> Result<String, LlmError> {
        // Cycle through a fixed script keyed on conversation length
        const SCRIPT: &[&str] = &[
            "How much does it cost?",
            "What do your existing customers say?",
            "Okay, what's the next step?",
            "Thanks, that's all I needed.",
        ];
        let exchanges = context.iter().filter(|t| t.role == TurnRole::User).count();
        Ok(SCRIPT[exchanges.saturating_sub(1) % SCRIPT.len()].to_string())
    }

    async fn generate_agent_turn(
        &self,
        prompt: &str,
        transcript: &[Turn],
    ) -> Result<AgentReply, LlmError> {
        let improved = prompt.contains(PRICING_DIRECTIVE);
        let exchanges = transcript
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .count();

        let text = if exchanges >= 4 {
            "You're welcome! Is there anything else I can help with? Have a great day.".to_string()
        } else if Self::wants_pricing(transcript) && improved {
            "Our plan is $29 per month. Would you like to start your free trial?".to_string()
        } else if Self::wants_pricing(transcript) {
            "Pricing depends on your needs. Would you like to learn more?".to_string()
        } else {
            "It streamlines your customer outreach end to end. Would you like to see how?"
                .to_string()
        };

        let tokens_out = text.split_whitespace().count() as u32;
        let tokens_in = (prompt.split_whitespace().count()
            + transcript
                .iter()
                .map(|t| t.content.split_whitespace().count())
                .sum::<usize>()) as u32;
        Ok(AgentReply {
            text,
            tokens_in,
            tokens_out,
        })
    }

    async fn analyze_transcript(
        &self,
        transcript: &[Turn],
        _persona: &Persona,
    ) -> Result<TranscriptAnalysis, LlmError> {
        let agent = agent_text(transcript);
        let mut issues = Vec::new();
        let mut accuracy: f64 = 70.0;

        if agent.contains("$") {
            accuracy += 12.0;
        } else {
            issues.push(TranscriptIssue {
                category: "pricing_omission".to_string(),
                severity: IssueSeverity::Medium,
                description: "The agent never quoted a concrete price".to_string(),
                suggested_fix: Some(PRICING_DIRECTIVE.to_string()),
            });
        }
        if agent.contains("would you like") {
            accuracy += 5.0;
        }

        Ok(TranscriptAnalysis {
            accuracy: accuracy.min(95.0),
            issues,
        })
    }

    async fn optimize_prompt(&self, request: OptimizeRequest) -> Result<OptimizeReply, LlmError> {
        // Flow like a text-completion backend: render the full optimization
        // prompt, complete it with raw text, then parse the candidate block
        // out of that text like any model reply.
        let suggestions: Vec<HealingSuggestion> =
            serde_json::from_value(request.suggestions.clone()).unwrap_or_default();
        let rendered = OptimizerPrompts::build_optimization_prompt(
            &request.current_prompt,
            &request.persona_metrics.to_string(),
            &suggestions,
            &request.transcript_samples,
            &request.target_metric,
            &request.conversion_goals,
        );

        let proposal = if rendered.contains(PRICING_DIRECTIVE) {
            // Nothing left to add; propose the prompt unchanged
            CandidateRewrite {
                candidate_prompt: request.current_prompt.clone(),
                changes: vec![],
                predicted_impact: 0.0,
            }
        } else {
            CandidateRewrite {
                candidate_prompt: format!("{}\n\n{}", request.current_prompt, PRICING_DIRECTIVE),
                changes: vec!["added pricing and call-to-action directive".to_string()],
                predicted_impact: 10.0,
            }
        };
        let raw = format!(
            "The prompt omits a concrete pricing instruction.\n\n<candidate>\n{}\n</candidate>\n",
            serde_json::to_string(&proposal).map_err(|e| LlmError::Other(e.to_string()))?
        );

        let parsed =
            CandidateRewrite::parse(&raw).map_err(|e| LlmError::Malformed(e.to_string()))?;
        Ok(OptimizeReply {
            candidate_prompt: parsed.candidate_prompt,
            changes: parsed.changes,
            predicted_impact: parsed.predicted_impact,
        })
    }
}
