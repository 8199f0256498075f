use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The final outcome of an evaluation's optimization loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// Every configured epoch ran to its decision
    MaxEpochsReached {
        epochs: u32,
        accepted_epochs: u32,
        best_prompt: String,
        cumulative_improvement: f64,
        total_duration_secs: f64,
    },
    /// Stopped early after consecutive rejected epochs
    Converged {
        epochs: u32,
        accepted_epochs: u32,
        consecutive_rejections: u32,
        best_prompt: String,
        cumulative_improvement: f64,
        total_duration_secs: f64,
    },
    /// A pause request was honored at an epoch boundary
    Paused {
        epochs: u32,
        best_prompt: String,
        cumulative_improvement: f64,
        total_duration_secs: f64,
    },
    /// Unrecoverable error
    Failed {
        epochs: u32,
        error: String,
        total_duration_secs: f64,
    },
}

impl EvaluationOutcome {
    pub fn max_epochs_reached(
        epochs: u32,
        accepted_epochs: u32,
        best_prompt: String,
        cumulative_improvement: f64,
        duration: Duration,
    ) -> Self {
        Self::MaxEpochsReached {
            epochs,
            accepted_epochs,
            best_prompt,
            cumulative_improvement,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn converged(
        epochs: u32,
        accepted_epochs: u32,
        consecutive_rejections: u32,
        best_prompt: String,
        cumulative_improvement: f64,
        duration: Duration,
    ) -> Self {
        Self::Converged {
            epochs,
            accepted_epochs,
            consecutive_rejections,
            best_prompt,
            cumulative_improvement,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn paused(
        epochs: u32,
        best_prompt: String,
        cumulative_improvement: f64,
        duration: Duration,
    ) -> Self {
        Self::Paused {
            epochs,
            best_prompt,
            cumulative_improvement,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn failed(epochs: u32, error: String, duration: Duration) -> Self {
        Self::Failed {
            epochs,
            error,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn epochs(&self) -> u32 {
        match self {
            Self::MaxEpochsReached { epochs, .. } => *epochs,
            Self::Converged { epochs, .. } => *epochs,
            Self::Paused { epochs, .. } => *epochs,
            Self::Failed { epochs, .. } => *epochs,
        }
    }

    pub fn best_prompt(&self) -> Option<&str> {
        match self {
            Self::MaxEpochsReached { best_prompt, .. } => Some(best_prompt),
            Self::Converged { best_prompt, .. } => Some(best_prompt),
            Self::Paused { best_prompt, .. } => Some(best_prompt),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::MaxEpochsReached { .. } | Self::Converged { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MaxEpochsReached { .. } | Self::Converged { .. } => 0,
            Self::Paused { .. } => 130,
            Self::Failed { .. } => 2,
        }
    }
}
