use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured log events for the evaluation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    EvaluationStarted {
        evaluation_id: String,
        prompt_preview: String,
        max_epochs: u32,
    },
    EpochStarted {
        epoch: u32,
        prompt_preview: String,
    },
    RunStarted {
        run_id: String,
        total_sessions: usize,
        concurrency: usize,
    },
    SessionCompleted {
        session_id: String,
        persona_id: String,
        turns: usize,
        accuracy: Option<f64>,
    },
    SessionFailed {
        session_id: String,
        persona_id: String,
        error: String,
    },
    RunCompleted {
        run_id: String,
        completed: usize,
        failed: usize,
        cancelled: usize,
        avg_accuracy: Option<f64>,
    },
    SuggestionsDerived {
        epoch: u32,
        count: usize,
    },
    /// A collaborator failed and a deterministic fallback was applied
    FallbackUsed {
        epoch: u32,
        stage: String,
        reason: String,
    },
    EpochDecided {
        epoch: u32,
        accepted: bool,
        measured: f64,
        previous_best: f64,
    },
    EvaluationPaused {
        epoch: u32,
    },
    EvaluationCompleted {
        epochs: u32,
        accepted_epochs: u32,
        cumulative_improvement: f64,
        duration_secs: f64,
    },
    EvaluationFailed {
        epoch: u32,
        error: String,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for evaluation events - handles both console output and file logging
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // Log to file if configured (always JSON format for file)
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::EvaluationStarted {
                evaluation_id,
                prompt_preview,
                max_epochs,
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} {} ({}, up to {} epochs)",
                    "promptloops".bold().bright_white(),
                    evaluation_id.dimmed(),
                    Self::truncate(prompt_preview, 60).dimmed(),
                    max_epochs
                );
                let _ = writeln!(stderr);
            }
            LogEvent::EpochStarted { epoch, .. } => {
                let _ = writeln!(
                    stderr,
                    "{} {}",
                    "──".bright_blue(),
                    format!("Epoch {}", epoch).bright_blue().bold()
                );
            }
            LogEvent::RunStarted {
                total_sessions,
                concurrency,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} sessions, concurrency {}",
                    "▶".bright_cyan(),
                    total_sessions,
                    concurrency
                );
            }
            LogEvent::SessionCompleted {
                persona_id,
                turns,
                accuracy,
                ..
            } => {
                let acc = match accuracy {
                    Some(a) => format!("{:.0}%", a),
                    None => "n/a".to_string(),
                };
                let _ = writeln!(
                    stderr,
                    "    {} {} ({} turns, accuracy {})",
                    "✓".bright_green(),
                    persona_id,
                    turns,
                    acc
                );
            }
            LogEvent::SessionFailed {
                persona_id, error, ..
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} {}",
                    "✗".bright_red(),
                    persona_id,
                    error.bright_red()
                );
            }
            LogEvent::RunCompleted {
                completed,
                failed,
                cancelled,
                avg_accuracy,
                ..
            } => {
                let acc = match avg_accuracy {
                    Some(a) => format!("{:.1}%", a),
                    None => "n/a".to_string(),
                };
                let _ = writeln!(
                    stderr,
                    "  {} run done: {} completed, {} failed, {} cancelled, avg accuracy {}",
                    "■".bright_cyan(),
                    completed,
                    failed,
                    cancelled,
                    acc
                );
            }
            LogEvent::SuggestionsDerived { count, .. } => {
                let _ = writeln!(stderr, "  {} {} healing suggestions", "◆".dimmed(), count);
            }
            LogEvent::FallbackUsed { stage, reason, .. } => {
                let _ = writeln!(
                    stderr,
                    "  {} fallback at {}: {}",
                    "⚠".bright_yellow(),
                    stage,
                    reason.dimmed()
                );
            }
            LogEvent::EpochDecided {
                accepted,
                measured,
                previous_best,
                ..
            } => {
                let verdict = if *accepted {
                    format!("ACCEPTED ({:.1} → {:.1})", previous_best, measured)
                        .bright_green()
                        .to_string()
                } else {
                    format!("REJECTED ({:.1} vs best {:.1})", measured, previous_best)
                        .bright_yellow()
                        .to_string()
                };
                let _ = writeln!(stderr, "  {}", verdict);
                let _ = writeln!(stderr);
            }
            LogEvent::EvaluationPaused { epoch } => {
                let _ = writeln!(
                    stderr,
                    "{} Paused after epoch {}",
                    "⏸".bright_yellow(),
                    epoch
                );
            }
            LogEvent::EvaluationCompleted {
                epochs,
                accepted_epochs,
                cumulative_improvement,
                duration_secs,
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} {} epochs ({} accepted), +{:.1} points in {:.1}s",
                    "✓".bright_green(),
                    epochs,
                    accepted_epochs,
                    cumulative_improvement,
                    duration_secs
                );
            }
            LogEvent::EvaluationFailed { epoch, error } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} Failed in epoch {}: {}",
                    "✗".bright_red(),
                    epoch,
                    error.bright_red()
                );
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::EvaluationStarted { evaluation_id, .. } => {
                format!("[{}] eval:start {}", timestamp, evaluation_id)
            }
            LogEvent::EpochStarted { epoch, .. } => {
                format!("[{}] epoch:start:{}", timestamp, epoch)
            }
            LogEvent::RunStarted {
                run_id,
                total_sessions,
                ..
            } => format!("[{}] run:start {} n={}", timestamp, run_id, total_sessions),
            LogEvent::SessionCompleted {
                session_id, turns, ..
            } => format!("[{}] session:done {} turns={}", timestamp, session_id, turns),
            LogEvent::SessionFailed {
                session_id, error, ..
            } => format!("[{}] session:fail {} {}", timestamp, session_id, error),
            LogEvent::RunCompleted {
                run_id,
                completed,
                failed,
                cancelled,
                ..
            } => format!(
                "[{}] run:done {} ok={} fail={} cancel={}",
                timestamp, run_id, completed, failed, cancelled
            ),
            LogEvent::SuggestionsDerived { epoch, count } => {
                format!("[{}] suggestions:{} n={}", timestamp, epoch, count)
            }
            LogEvent::FallbackUsed { epoch, stage, .. } => {
                format!("[{}] fallback:{}:{}", timestamp, epoch, stage)
            }
            LogEvent::EpochDecided {
                epoch,
                accepted,
                measured,
                ..
            } => format!(
                "[{}] epoch:decided:{} {} {:.1}",
                timestamp,
                epoch,
                if *accepted { "accept" } else { "reject" },
                measured
            ),
            LogEvent::EvaluationPaused { epoch } => {
                format!("[{}] eval:paused:{}", timestamp, epoch)
            }
            LogEvent::EvaluationCompleted {
                epochs,
                duration_secs,
                ..
            } => format!("[{}] eval:done:{} {:.1}s", timestamp, epochs, duration_secs),
            LogEvent::EvaluationFailed { epoch, error } => {
                format!("[{}] eval:fail:{} {}", timestamp, epoch, error)
            }
        };
        let _ = writeln!(stderr, "{}", msg);
    }

    fn truncate(s: &str, max_len: usize) -> String {
        if s.len() > max_len {
            format!("{}...", &s[..max_len - 3])
        } else {
            s.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("compact").unwrap(), LogFormat::Compact);
        assert!(LogFormat::from_str("verbose").is_err());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = LogEvent::EpochStarted {
            epoch: 3,
            prompt_preview: "hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "epoch_started");
        assert_eq!(json["epoch"], 3);
    }
}
