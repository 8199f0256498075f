use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use promptloops_llm::{LanguageService, Turn};

use crate::SessionError;

/// A scripted conversation: fixed user messages with per-step assertions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStep {
    pub user_message: String,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// Sentiment classes for the keyword-based sentiment assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
}

const POSITIVE_CUES: &[&str] = &[
    "happy", "glad", "great", "absolutely", "of course", "certainly", "thank",
];
const NEGATIVE_CUES: &[&str] = &[
    "unfortunately", "cannot", "can't", "unable", "sorry", "won't",
];

/// A single check against the agent's reply, evaluated case-insensitively
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assertion {
    Contains { text: String },
    NotContains { text: String },
    Regex { pattern: String },
    Sentiment { expected: Sentiment },
    Custom { name: String, keywords: Vec<String> },
}

impl Assertion {
    /// Whether the agent reply satisfies this assertion.
    pub fn check(&self, reply: &str) -> bool {
        let lowered = reply.to_lowercase();
        match self {
            Assertion::Contains { text } => lowered.contains(&text.to_lowercase()),
            Assertion::NotContains { text } => !lowered.contains(&text.to_lowercase()),
            Assertion::Regex { pattern } => {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => re.is_match(reply),
                    Err(e) => {
                        warn!(pattern, error = %e, "Invalid assertion regex");
                        false
                    }
                }
            }
            Assertion::Sentiment { expected } => {
                let cues = match expected {
                    Sentiment::Positive => POSITIVE_CUES,
                    Sentiment::Negative => NEGATIVE_CUES,
                };
                cues.iter().any(|cue| lowered.contains(cue))
            }
            Assertion::Custom { keywords, .. } => keywords
                .iter()
                .all(|kw| lowered.contains(&kw.to_lowercase())),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Assertion::Contains { text } => format!("contains \"{}\"", text),
            Assertion::NotContains { text } => format!("does not contain \"{}\"", text),
            Assertion::Regex { pattern } => format!("matches /{}/", pattern),
            Assertion::Sentiment { expected } => format!("sentiment is {:?}", expected),
            Assertion::Custom { name, .. } => format!("custom check \"{}\"", name),
        }
    }
}

/// Outcome of one scripted step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_index: usize,
    pub passed: bool,
    /// Descriptions of the assertions that failed
    pub failures: Vec<String>,
}

/// Outcome of a whole scenario run
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario_name: String,
    pub passed: bool,
    pub step_results: Vec<StepResult>,
    pub transcript: Vec<Turn>,
}

/// Executes every step of a scenario against a candidate prompt.
///
/// A failed step never short-circuits the run: later steps still execute so
/// the report covers the full script.
pub struct ScenarioRunner<'a> {
    service: &'a dyn LanguageService,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(service: &'a dyn LanguageService) -> Self {
        Self { service }
    }

    pub async fn run(
        &self,
        scenario: &Scenario,
        prompt: &str,
    ) -> Result<ScenarioReport, SessionError> {
        let mut transcript: Vec<Turn> = Vec::new();
        let mut step_results = Vec::with_capacity(scenario.steps.len());

        for (step_index, step) in scenario.steps.iter().enumerate() {
            transcript.push(Turn::user(&step.user_message));

            let reply = self.service.generate_agent_turn(prompt, &transcript).await?;
            transcript
                .push(Turn::agent(&reply.text).with_tokens(reply.tokens_in, reply.tokens_out));

            let failures: Vec<String> = step
                .assertions
                .iter()
                .filter(|a| !a.check(&reply.text))
                .map(|a| a.describe())
                .collect();

            step_results.push(StepResult {
                step_index,
                passed: failures.is_empty(),
                failures,
            });
        }

        let passed = step_results.iter().all(|r| r.passed);
        Ok(ScenarioReport {
            scenario_name: scenario.name.clone(),
            passed,
            step_results,
            transcript,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use promptloops_llm::{
        AgentReply, LlmError, OptimizeReply, OptimizeRequest, Persona, TranscriptAnalysis,
    };

    #[test]
    fn test_contains_passes_on_matching_reply() {
        let assertion = Assertion::Contains {
            text: "refund".into(),
        };
        assert!(assertion.check("I can process your refund today"));
    }

    #[test]
    fn test_not_contains_fails_on_matching_reply() {
        let assertion = Assertion::NotContains {
            text: "refund".into(),
        };
        assert!(!assertion.check("I can process your refund today"));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let assertion = Assertion::Contains {
            text: "REFUND".into(),
        };
        assert!(assertion.check("Your refund is on its way."));
    }

    #[test]
    fn test_regex_assertion() {
        let assertion = Assertion::Regex {
            pattern: r"\$\d+ per month".into(),
        };
        assert!(assertion.check("Our plan is $29 per month."));
        assert!(!assertion.check("Pricing is flexible."));
    }

    #[test]
    fn test_invalid_regex_fails_closed() {
        let assertion = Assertion::Regex {
            pattern: "(unclosed".into(),
        };
        assert!(!assertion.check("anything"));
    }

    #[test]
    fn test_sentiment_assertion() {
        let positive = Assertion::Sentiment {
            expected: Sentiment::Positive,
        };
        let negative = Assertion::Sentiment {
            expected: Sentiment::Negative,
        };
        assert!(positive.check("Absolutely, happy to help!"));
        assert!(negative.check("Unfortunately we cannot do that."));
        assert!(!negative.check("Great, let's get started."));
    }

    #[test]
    fn test_custom_requires_all_keywords() {
        let assertion = Assertion::Custom {
            name: "mentions plan details".into(),
            keywords: vec!["price".into(), "trial".into()],
        };
        assert!(assertion.check("The price includes a free trial."));
        assert!(!assertion.check("The price is $29."));
    }

    struct ReplyPerStep {
        replies: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageService for ReplyPerStep {
        fn name(&self) -> &str {
            "reply-per-step"
        }

        async fn generate_user_turn(
            &self,
            _persona: &Persona,
            _context: &[Turn],
        ) -> Result<String, LlmError> {
            unimplemented!("not used in scenario tests")
        }

        async fn generate_agent_turn(
            &self,
            _prompt: &str,
            _transcript: &[Turn],
        ) -> Result<AgentReply, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AgentReply {
                text: self.replies[call].clone(),
                tokens_in: 5,
                tokens_out: 5,
            })
        }

        async fn analyze_transcript(
            &self,
            _transcript: &[Turn],
            _persona: &Persona,
        ) -> Result<TranscriptAnalysis, LlmError> {
            unimplemented!("not used in scenario tests")
        }

        async fn optimize_prompt(
            &self,
            _request: OptimizeRequest,
        ) -> Result<OptimizeReply, LlmError> {
            unimplemented!("not used in scenario tests")
        }
    }

    #[tokio::test]
    async fn test_failed_step_does_not_short_circuit() {
        let service = ReplyPerStep {
            replies: vec![
                "We don't discuss pricing.".into(),
                "Yes, we offer a 14-day trial.".into(),
            ],
            calls: AtomicUsize::new(0),
        };
        let scenario = Scenario {
            name: "pricing flow".into(),
            steps: vec![
                ScenarioStep {
                    user_message: "How much does it cost?".into(),
                    assertions: vec![Assertion::Contains {
                        text: "$".into(),
                    }],
                },
                ScenarioStep {
                    user_message: "Is there a trial?".into(),
                    assertions: vec![Assertion::Contains {
                        text: "trial".into(),
                    }],
                },
            ],
        };

        let runner = ScenarioRunner::new(&service);
        let report = runner.run(&scenario, "Be helpful.").await.unwrap();

        assert!(!report.passed);
        assert_eq!(report.step_results.len(), 2);
        assert!(!report.step_results[0].passed);
        assert!(report.step_results[1].passed);
        assert_eq!(report.transcript.len(), 4);
    }

    #[tokio::test]
    async fn test_step_passes_only_when_all_assertions_pass() {
        let service = ReplyPerStep {
            replies: vec!["Our plan is $29 with a free trial.".into()],
            calls: AtomicUsize::new(0),
        };
        let scenario = Scenario {
            name: "combined".into(),
            steps: vec![ScenarioStep {
                user_message: "Pricing?".into(),
                assertions: vec![
                    Assertion::Contains { text: "$29".into() },
                    Assertion::NotContains {
                        text: "enterprise only".into(),
                    },
                    Assertion::Regex {
                        pattern: r"free trial".into(),
                    },
                ],
            }],
        };

        let runner = ScenarioRunner::new(&service);
        let report = runner.run(&scenario, "Be helpful.").await.unwrap();
        assert!(report.passed);
    }
}
