//! Pure aggregation of session outcomes into run- and epoch-level metrics.
//!
//! Nothing in this crate performs I/O; every function is a deterministic
//! fold over its inputs so aggregates can be recomputed at any time.

mod conversion;

pub use conversion::{estimate_conversion, estimate_csat};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use promptloops_llm::{IssueSeverity, TranscriptIssue, Turn};

/// Metric optimized by an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    Accuracy,
    Conversion,
    Csat,
    Latency,
}

impl TargetMetric {
    /// Latency improves downward; everything else improves upward.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, TargetMetric::Latency)
    }

    /// Signed improvement of `measured` over `previous`, in metric points,
    /// oriented so positive is always better.
    pub fn improvement(&self, measured: f64, previous: f64) -> f64 {
        if self.lower_is_better() {
            previous - measured
        } else {
            measured - previous
        }
    }
}

impl std::fmt::Display for TargetMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetMetric::Accuracy => write!(f, "accuracy"),
            TargetMetric::Conversion => write!(f, "conversion"),
            TargetMetric::Csat => write!(f, "csat"),
            TargetMetric::Latency => write!(f, "latency"),
        }
    }
}

impl std::str::FromStr for TargetMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accuracy" => Ok(TargetMetric::Accuracy),
            "conversion" => Ok(TargetMetric::Conversion),
            "csat" => Ok(TargetMetric::Csat),
            "latency" => Ok(TargetMetric::Latency),
            _ => Err(format!("Unknown target metric: {}", s)),
        }
    }
}

/// Terminal state of one session, as seen by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Everything the aggregator needs from one terminal session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub session_id: String,
    pub persona_id: String,
    pub status: OutcomeStatus,
    /// Accuracy 0-100, None if the session produced no analysis
    pub accuracy: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub issues: Vec<TranscriptIssue>,
    pub transcript: Vec<Turn>,
}

/// Run-wide scalar aggregates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAggregates {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub avg_accuracy: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub avg_conversion: Option<f64>,
    pub avg_csat: Option<f64>,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl RunAggregates {
    /// Measured value of the given target metric, if any session produced
    /// a sample for it.
    pub fn value_for(&self, metric: TargetMetric) -> Option<f64> {
        match metric {
            TargetMetric::Accuracy => self.avg_accuracy,
            TargetMetric::Conversion => self.avg_conversion,
            TargetMetric::Csat => self.avg_csat,
            TargetMetric::Latency => self.avg_latency_ms,
        }
    }
}

/// Per-persona metric breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaBreakdown {
    pub persona_id: String,
    pub sessions: usize,
    pub completed: usize,
    pub avg_accuracy: Option<f64>,
    pub avg_conversion: Option<f64>,
    pub avg_csat: Option<f64>,
    pub issue_counts: BTreeMap<IssueSeverity, usize>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Fold terminal session outcomes into run-wide aggregates.
///
/// Cancelled sessions count toward `total` and `cancelled` only; they never
/// contribute samples. Sessions with no valid sample for a metric are
/// excluded from that mean, not treated as zero.
pub fn aggregate_run(outcomes: &[SessionOutcome]) -> RunAggregates {
    let completed = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Completed)
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .count();
    let cancelled = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Cancelled)
        .count();

    let scored: Vec<&SessionOutcome> = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Completed)
        .collect();

    let accuracies: Vec<f64> = scored.iter().filter_map(|o| o.accuracy).collect();
    let latencies: Vec<f64> = scored.iter().filter_map(|o| o.avg_latency_ms).collect();
    let conversions: Vec<f64> = scored
        .iter()
        .map(|o| estimate_conversion(&o.transcript))
        .collect();
    let csats: Vec<f64> = scored
        .iter()
        .filter_map(|o| o.accuracy.map(|a| estimate_csat(a, &o.issues)))
        .collect();

    let tokens_in = outcomes
        .iter()
        .filter(|o| o.status != OutcomeStatus::Cancelled)
        .map(|o| o.tokens_in)
        .sum();
    let tokens_out = outcomes
        .iter()
        .filter(|o| o.status != OutcomeStatus::Cancelled)
        .map(|o| o.tokens_out)
        .sum();

    RunAggregates {
        total: outcomes.len(),
        completed,
        failed,
        cancelled,
        avg_accuracy: mean(&accuracies),
        avg_latency_ms: mean(&latencies),
        avg_conversion: mean(&conversions),
        avg_csat: mean(&csats),
        tokens_in,
        tokens_out,
    }
}

/// Break outcomes down by persona.
pub fn persona_breakdown(outcomes: &[SessionOutcome]) -> Vec<PersonaBreakdown> {
    let mut by_persona: BTreeMap<&str, Vec<&SessionOutcome>> = BTreeMap::new();
    for outcome in outcomes {
        by_persona
            .entry(outcome.persona_id.as_str())
            .or_default()
            .push(outcome);
    }

    by_persona
        .into_iter()
        .map(|(persona_id, sessions)| {
            let scored: Vec<&&SessionOutcome> = sessions
                .iter()
                .filter(|o| o.status == OutcomeStatus::Completed)
                .collect();

            let accuracies: Vec<f64> = scored.iter().filter_map(|o| o.accuracy).collect();
            let conversions: Vec<f64> = scored
                .iter()
                .map(|o| estimate_conversion(&o.transcript))
                .collect();
            let csats: Vec<f64> = scored
                .iter()
                .filter_map(|o| o.accuracy.map(|a| estimate_csat(a, &o.issues)))
                .collect();

            let mut issue_counts: BTreeMap<IssueSeverity, usize> = BTreeMap::new();
            for outcome in &sessions {
                for issue in &outcome.issues {
                    *issue_counts.entry(issue.severity).or_insert(0) += 1;
                }
            }

            PersonaBreakdown {
                persona_id: persona_id.to_string(),
                sessions: sessions.len(),
                completed: scored.len(),
                avg_accuracy: mean(&accuracies),
                avg_conversion: mean(&conversions),
                avg_csat: mean(&csats),
                issue_counts,
            }
        })
        .collect()
}
