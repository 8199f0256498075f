mod canned;
mod config;
mod output;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use promptloops_core::{EpochController, EvaluationConfig};
use promptloops_db::{Database, EvaluationFilter, EvaluationStatus};
use promptloops_llm::LanguageService;
use promptloops_logging::{init_tracing, LogFormat, Logger, ProgressChannel, ProgressEvent};
use promptloops_metrics::TargetMetric;
use promptloops_session::PhraseBook;

use crate::canned::CannedService;
use crate::config::ProjectConfig;

#[derive(Parser, Debug)]
#[command(
    name = "promptloops",
    about = "Prompt-optimization loop over simulated customer conversations",
    version,
    author
)]
struct Cli {
    /// Store location (default: the per-user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatChoice,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an evaluation over a source prompt
    Run {
        /// Source prompt text (or reads from the prompt file if not provided)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Path to prompt file (default: ./prompt.md)
        #[arg(long, default_value = "prompt.md")]
        prompt_file: PathBuf,

        /// Language service backend (default: the project config, then canned)
        #[arg(short, long, value_enum)]
        backend: Option<BackendChoice>,

        /// Maximum optimization epochs
        #[arg(short = 'n', long)]
        max_epochs: Option<u32>,

        /// Metric to optimize (accuracy, conversion, csat, latency)
        #[arg(short = 'm', long)]
        target_metric: Option<String>,

        /// Output final result as JSON
        #[arg(long)]
        json_output: bool,
    },
    /// List stored evaluations
    List {
        /// Filter by status (pending, running, paused, completed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Substring filter on the source prompt
        #[arg(long)]
        search: Option<String>,

        /// Maximum rows to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one evaluation and its epoch trail
    Show {
        /// Evaluation id
        id: String,

        /// Output as JSON
        #[arg(long)]
        json_output: bool,
    },
    /// Aggregate store statistics
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum BackendChoice {
    /// Offline deterministic backend
    Canned,
}

/// The CLI flag wins over the project config; without either, canned.
fn resolve_backend(
    flag: Option<BackendChoice>,
    configured: Option<&str>,
) -> Result<BackendChoice> {
    if let Some(choice) = flag {
        return Ok(choice);
    }
    match configured {
        Some(name) => BackendChoice::from_str(name, true)
            .map_err(|_| anyhow::anyhow!("Unknown backend '{}' in promptloops.toml", name)),
        None => Ok(BackendChoice::Canned),
    }
}

fn create_service(choice: BackendChoice) -> Arc<dyn LanguageService> {
    match choice {
        BackendChoice::Canned => Arc::new(CannedService),
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_format: LogFormat = cli.log_format.into();
    init_tracing("info", log_format);

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    let project = ProjectConfig::load(&working_dir)?.unwrap_or_default();

    let db = Arc::new(open_database(cli.db.as_deref(), project.db_path.as_deref())?);

    match cli.command {
        Command::Run {
            prompt,
            prompt_file,
            backend,
            max_epochs,
            target_metric,
            json_output,
        } => {
            let prompt = get_prompt(prompt, &prompt_file, &working_dir)?;
            let backend = resolve_backend(backend, project.backend.as_deref())?;

            let mut eval_config: EvaluationConfig = project.evaluation;
            if let Some(n) = max_epochs {
                eval_config.max_epochs = n;
            }
            if let Some(metric) = target_metric {
                eval_config.target_metric =
                    TargetMetric::from_str(&metric).map_err(anyhow::Error::msg)?;
            }

            let config_json = serde_json::to_string(&eval_config)?;
            let evaluation_id = db.evaluations().create(&prompt, &config_json)?;
            eprintln!("Evaluation {}", evaluation_id);

            let service = create_service(backend);
            let logger = Arc::new(Logger::new(log_format));
            let progress = ProgressChannel::default();
            let progress_task = spawn_progress_printer(progress.subscribe());
            let controller = EpochController::new(
                db.clone(),
                service,
                Arc::new(PhraseBook::default()),
                logger,
                progress,
            );

            // Ctrl+C requests a pause; the in-flight epoch still finishes
            let pause_handle = controller.pause_handle();
            ctrlc::set_handler(move || {
                eprintln!("\nPause requested. Finishing current epoch...");
                pause_handle.store(true, Ordering::SeqCst);
            })
            .context("Failed to set Ctrl+C handler")?;

            let outcome = controller.run(&evaluation_id).await?;
            progress_task.abort();

            if json_output {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                output::print_outcome(&outcome);
            }
            std::process::exit(outcome.exit_code());
        }
        Command::List {
            status,
            search,
            limit,
        } => {
            let status = status
                .map(|s| EvaluationStatus::from_str(&s).map_err(anyhow::Error::msg))
                .transpose()?;
            let summaries = db.evaluations().list(&EvaluationFilter {
                status,
                search,
                limit: Some(limit),
            })?;
            output::print_evaluation_list(&summaries);
        }
        Command::Show { id, json_output } => {
            let record = db
                .evaluations()
                .get(&id)?
                .with_context(|| format!("No evaluation with id {}", id))?;
            let epochs = db.evaluations().list_epochs(&id)?;
            if json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "evaluation": record,
                        "epochs": epochs,
                    }))?
                );
            } else {
                output::print_evaluation(&record, &epochs);
            }
        }
        Command::Stats => {
            let stats = db.evaluations().stats()?;
            output::print_stats(&stats);
        }
    }

    Ok(())
}

/// Prints epoch and run progress to stderr while an evaluation runs.
fn spawn_progress_printer(
    rx: tokio::sync::broadcast::Receiver<ProgressEvent>,
) -> tokio::task::JoinHandle<()> {
    let mut events = BroadcastStream::new(rx);
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            // Lagged subscribers skip ahead instead of stopping
            let Ok(event) = event else { continue };
            match event {
                ProgressEvent::EpochTransition {
                    epoch, accepted, ..
                } => match accepted {
                    None => eprintln!("{} epoch {} started", "->".bright_green(), epoch),
                    Some(true) => eprintln!("{} epoch {} accepted", "->".bright_green(), epoch),
                    Some(false) => eprintln!("{} epoch {} rejected", "->".dimmed(), epoch),
                },
                ProgressEvent::RunProgress {
                    completed,
                    failed,
                    total,
                    ..
                } => {
                    eprintln!(
                        "   sessions: {}/{} completed, {} failed",
                        completed, total, failed
                    );
                }
                ProgressEvent::SessionTurn { .. } | ProgressEvent::SessionTerminal { .. } => {}
            }
        }
    })
}

fn open_database(cli_path: Option<&Path>, config_path: Option<&Path>) -> Result<Database> {
    let db = match cli_path.or(config_path) {
        Some(path) => Database::open_at(path)?,
        None => Database::open()?,
    };
    Ok(db)
}

fn get_prompt(
    prompt: Option<String>,
    prompt_file: &Path,
    working_dir: &Path,
) -> Result<String> {
    if let Some(prompt) = prompt {
        return Ok(prompt);
    }

    let prompt_path = if prompt_file.is_absolute() {
        prompt_file.to_path_buf()
    } else {
        working_dir.join(prompt_file)
    };

    if prompt_path.exists() {
        let content =
            std::fs::read_to_string(&prompt_path).context("Failed to read prompt file")?;
        Ok(content.trim().to_string())
    } else {
        anyhow::bail!(
            "No prompt provided. Use --prompt or create a {} file",
            prompt_file.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_flag_overrides_config() {
        let choice = resolve_backend(Some(BackendChoice::Canned), Some("bogus")).unwrap();
        assert_eq!(choice, BackendChoice::Canned);
    }

    #[test]
    fn test_backend_falls_back_to_config_then_default() {
        let choice = resolve_backend(None, Some("canned")).unwrap();
        assert_eq!(choice, BackendChoice::Canned);

        let choice = resolve_backend(None, None).unwrap();
        assert_eq!(choice, BackendChoice::Canned);
    }

    #[test]
    fn test_backend_rejects_unknown_config_value() {
        let err = resolve_backend(None, Some("quantum")).unwrap_err();
        assert!(err.to_string().contains("quantum"));
    }
}
