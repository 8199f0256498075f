use promptloops_llm::Turn;

use crate::HealingSuggestion;

/// Prompt templates for the optimization collaborator
pub struct OptimizerPrompts;

impl OptimizerPrompts {
    /// Build the full optimization prompt from epoch evidence.
    pub fn build_optimization_prompt(
        current_prompt: &str,
        persona_metrics_json: &str,
        suggestions: &[HealingSuggestion],
        transcript_samples: &[Vec<Turn>],
        target_metric: &str,
        conversion_goals: &[String],
    ) -> String {
        let suggestions_text = if suggestions.is_empty() {
            "(none)".to_string()
        } else {
            suggestions
                .iter()
                .map(|s| {
                    format!(
                        "- [{}] {} (confidence {:.0}%, seen {} times)",
                        s.severity,
                        s.issue,
                        s.confidence * 100.0,
                        s.occurrences
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let samples_text = transcript_samples
            .iter()
            .enumerate()
            .map(|(i, transcript)| {
                let turns = transcript
                    .iter()
                    .map(|t| format!("{}: {}", t.role, t.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("### Sample {}\n{}", i + 1, turns)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let goals_text = if conversion_goals.is_empty() {
            "(none)".to_string()
        } else {
            conversion_goals
                .iter()
                .map(|g| format!("- {}", g))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"You are a prompt engineer improving an AI agent's system prompt.

## Current Prompt
{prompt}

## Target Metric
Optimize for: {metric}

## Conversion Goals
{goals}

## Per-Persona Metrics
```json
{metrics}
```

## Known Issues (ranked)
{suggestions}

## Conversation Samples
{samples}

---

Rewrite the prompt to improve the target metric while preserving intent.
Respond with exactly one candidate block:

<candidate>
{{"candidatePrompt": "<full rewritten prompt>", "changes": ["<what changed>"], "predictedImpact": <expected metric-point gain>}}
</candidate>
"#,
            prompt = current_prompt,
            metric = target_metric,
            goals = goals_text,
            metrics = persona_metrics_json,
            suggestions = suggestions_text,
            samples = samples_text,
        )
    }
}
