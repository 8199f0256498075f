use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use promptloops_llm::{Persona, PersonaTrait};
use promptloops_metrics::TargetMetric;

use crate::error::EvalError;

/// Per-evaluation settings, persisted as JSON on the evaluation row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct EvaluationConfig {
    /// Maximum number of optimization epochs
    pub max_epochs: u32,
    /// Sessions to run each epoch, spread across the persona set
    pub tests_per_epoch: usize,
    /// Persona ids drawn from the store or the built-in set
    pub personas: Vec<String>,
    /// Concurrent session cap per test run
    pub concurrency: usize,
    /// Minimum metric-point gain required to accept an epoch
    pub improvement_threshold: f64,
    pub target_metric: TargetMetric,
    /// Free-text goal descriptions fed to the optimizer
    pub conversion_goals: Vec<String>,
    /// Consecutive rejected epochs before the loop converges
    pub max_consecutive_rejections: u32,
    /// Exchange cap per session
    pub max_turns: usize,
    pub retry: RetryPolicy,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_epochs: 5,
            tests_per_epoch: 6,
            personas: vec![
                "curious".to_string(),
                "skeptical".to_string(),
                "budget_conscious".to_string(),
            ],
            concurrency: 4,
            improvement_threshold: 5.0,
            target_metric: TargetMetric::Accuracy,
            conversion_goals: Vec::new(),
            max_consecutive_rejections: 3,
            max_turns: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.max_epochs == 0 {
            return Err(EvalError::Config("max_epochs must be at least 1".into()));
        }
        if self.tests_per_epoch == 0 {
            return Err(EvalError::Config(
                "tests_per_epoch must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(EvalError::Config("concurrency must be at least 1".into()));
        }
        if self.personas.is_empty() {
            return Err(EvalError::Config(
                "at least one persona is required".into(),
            ));
        }
        if self.improvement_threshold < 0.0 {
            return Err(EvalError::Config(
                "improvement_threshold must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Spread `tests_per_epoch` sessions round-robin across the persona set.
    ///
    /// Returns (persona_id, instance) pairs; instance numbers count repeats
    /// of the same persona within the epoch.
    pub fn session_spread(&self) -> Vec<(String, usize)> {
        let n = self.personas.len();
        (0..self.tests_per_epoch)
            .map(|i| (self.personas[i % n].clone(), i / n))
            .collect()
    }
}

/// Bounded exponential backoff for transient collaborator failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry, 1-based, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// The personas shipped with the engine, used when an id is not in the store.
pub fn builtin_persona(id: &str) -> Option<Persona> {
    let persona_trait = PersonaTrait::from_str(id).ok()?;
    let name = match persona_trait {
        PersonaTrait::Curious => "Curious Newcomer",
        PersonaTrait::Skeptical => "Skeptical Buyer",
        PersonaTrait::Frustrated => "Frustrated Switcher",
        PersonaTrait::BudgetConscious => "Budget-Conscious Shopper",
        PersonaTrait::TechSavvy => "Technical Evaluator",
        PersonaTrait::Impatient => "Impatient Decision-Maker",
    };
    Some(Persona::new(id, name, vec![persona_trait]))
}
