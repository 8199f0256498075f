use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use promptloops_db::{Database, EpochRecord, EvaluationStatus, RunStatus};
use promptloops_llm::{LanguageService, Persona, PersonaTrait, TranscriptAnalysis, Turn};
use promptloops_logging::{LogEvent, Logger, ProgressChannel, ProgressEvent};
use promptloops_metrics::OutcomeStatus;
use promptloops_optimizer::{derive_suggestions, CandidateSource, PromptRewriter, RewriteInput};
use promptloops_session::PhraseBook;

use crate::config::{builtin_persona, EvaluationConfig};
use crate::error::EvalError;
use crate::orchestrator::{RunSpec, TestRunOrchestrator};
use crate::outcome::EvaluationOutcome;

/// Drives one evaluation through its optimization epochs.
///
/// Sequential across epochs by design: the accept/reject decision of epoch N
/// is durably recorded before epoch N+1 starts.
pub struct EpochController {
    db: Arc<Database>,
    service: Arc<dyn LanguageService>,
    orchestrator: TestRunOrchestrator,
    logger: Arc<Logger>,
    progress: ProgressChannel,
    pause: Arc<AtomicBool>,
}

impl EpochController {
    pub fn new(
        db: Arc<Database>,
        service: Arc<dyn LanguageService>,
        phrases: Arc<PhraseBook>,
        logger: Arc<Logger>,
        progress: ProgressChannel,
    ) -> Self {
        let orchestrator = TestRunOrchestrator::new(
            db.clone(),
            service.clone(),
            phrases,
            logger.clone(),
            progress.clone(),
        );
        Self {
            db,
            service,
            orchestrator,
            logger,
            progress,
            pause: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for requesting a cooperative pause.
    ///
    /// Honored only at epoch boundaries; an in-flight epoch always reaches
    /// its accept/reject decision first.
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        self.pause.clone()
    }

    /// Run the optimization loop for a stored evaluation.
    ///
    /// Domain validation failures (unknown id, illegal start state, bad
    /// config) propagate as errors without mutating state; failures after
    /// the evaluation starts mark it failed and surface as a Failed outcome.
    pub async fn run(&self, evaluation_id: &str) -> Result<EvaluationOutcome, EvalError> {
        let started = Instant::now();

        let record = self
            .db
            .evaluations()
            .get(evaluation_id)?
            .ok_or_else(|| EvalError::NotFound(evaluation_id.to_string()))?;
        if !record.status.can_start() {
            return Err(EvalError::InvalidState(record.status));
        }
        let config: EvaluationConfig = serde_json::from_str(&record.config)?;
        config.validate()?;
        let personas = self.load_personas(&config)?;

        self.db
            .evaluations()
            .update_status(evaluation_id, EvaluationStatus::Running, None)?;
        self.logger.log(&LogEvent::EvaluationStarted {
            evaluation_id: evaluation_id.to_string(),
            prompt_preview: record.source_prompt.chars().take(100).collect(),
            max_epochs: config.max_epochs,
        });

        match self
            .drive(evaluation_id, &record, &config, &personas, started)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = e.to_string();
                let epoch = self
                    .db
                    .evaluations()
                    .get(evaluation_id)
                    .ok()
                    .flatten()
                    .map(|r| r.current_epoch)
                    .unwrap_or(0);
                if let Err(db_err) = self.db.evaluations().update_status(
                    evaluation_id,
                    EvaluationStatus::Failed,
                    Some(&message),
                ) {
                    warn!(evaluation_id, error = %db_err, "Failed to record evaluation failure");
                }
                self.logger.log(&LogEvent::EvaluationFailed {
                    epoch,
                    error: message.clone(),
                });
                Ok(EvaluationOutcome::failed(epoch, message, started.elapsed()))
            }
        }
    }

    async fn drive(
        &self,
        evaluation_id: &str,
        record: &promptloops_db::EvaluationRecord,
        config: &EvaluationConfig,
        personas: &[Persona],
        started: Instant,
    ) -> Result<EvaluationOutcome, EvalError> {
        let mut best_prompt = record.best_prompt.clone();
        let mut best_value = parse_best_value(record.best_metrics.as_deref(), config);
        let mut cumulative = record.cumulative_improvement;
        let mut accepted_epochs = self
            .db
            .evaluations()
            .list_epochs(evaluation_id)?
            .iter()
            .filter(|e| e.is_accepted)
            .count() as u32;
        let mut consecutive_rejections = 0u32;
        let mut epoch = record.current_epoch;
        // Epoch 1 tests the source prompt; a resumed evaluation picks the
        // best-so-far back up.
        let mut candidate = if epoch == 0 {
            record.source_prompt.clone()
        } else {
            best_prompt.clone()
        };

        while epoch < config.max_epochs {
            if self.pause.load(Ordering::SeqCst) {
                self.db
                    .evaluations()
                    .update_status(evaluation_id, EvaluationStatus::Paused, None)?;
                self.logger.log(&LogEvent::EvaluationPaused { epoch });
                return Ok(EvaluationOutcome::paused(
                    epoch,
                    best_prompt,
                    cumulative,
                    started.elapsed(),
                ));
            }

            epoch += 1;
            self.logger.log(&LogEvent::EpochStarted {
                epoch,
                prompt_preview: candidate.chars().take(100).collect(),
            });
            self.progress.emit(ProgressEvent::EpochTransition {
                evaluation_id: evaluation_id.to_string(),
                epoch,
                accepted: None,
            });

            let run = self
                .orchestrator
                .execute(
                    RunSpec {
                        evaluation_id: Some(evaluation_id.to_string()),
                        prompt_id: Some(format!("{}-e{}", evaluation_id, epoch)),
                        prompt: candidate.clone(),
                        personas: personas.to_vec(),
                        pairs: config.session_spread(),
                        concurrency: config.concurrency,
                        max_turns: config.max_turns,
                        retry: config.retry.clone(),
                    },
                    Arc::new(AtomicBool::new(false)),
                )
                .await?;

            if run.status == RunStatus::Failed {
                return Err(EvalError::RunFailed(format!(
                    "epoch {} failed: all sessions failed",
                    epoch
                )));
            }
            let measured = run
                .aggregates
                .value_for(config.target_metric)
                .ok_or_else(|| {
                    EvalError::RunFailed(format!("epoch {} produced no measurable sessions", epoch))
                })?;

            let analyses: Vec<TranscriptAnalysis> = run
                .outcomes
                .iter()
                .filter(|o| o.status == OutcomeStatus::Completed)
                .filter_map(|o| {
                    o.accuracy.map(|accuracy| TranscriptAnalysis {
                        accuracy,
                        issues: o.issues.clone(),
                    })
                })
                .collect();
            let suggestions = derive_suggestions(&candidate, &analyses);
            self.logger.log(&LogEvent::SuggestionsDerived {
                epoch,
                count: suggestions.len(),
            });

            let samples: Vec<Vec<Turn>> = run
                .outcomes
                .iter()
                .filter(|o| o.status == OutcomeStatus::Completed)
                .take(2)
                .map(|o| o.transcript.clone())
                .collect();

            let epoch_id = self.db.evaluations().insert_epoch(&EpochRecord {
                id: String::new(),
                evaluation_id: evaluation_id.to_string(),
                number: epoch,
                prompt: candidate.clone(),
                run_id: Some(run.run_id.clone()),
                persona_metrics: Some(serde_json::to_string(&run.breakdown)?),
                suggestions: Some(serde_json::to_string(&suggestions)?),
                snapshot: Some(serde_json::to_string(&samples)?),
                measured_value: Some(measured),
                is_accepted: false,
                created_at: Utc::now(),
            })?;

            // First measured epoch is the baseline; afterwards a candidate
            // must clear the threshold against the best so far.
            let (accepted, previous) = match best_value {
                None => (true, measured),
                Some(best) => (
                    config.target_metric.improvement(measured, best)
                        >= config.improvement_threshold,
                    best,
                ),
            };

            if accepted {
                if let Some(best) = best_value {
                    cumulative += config.target_metric.improvement(measured, best);
                }
                best_prompt = candidate.clone();
                best_value = Some(measured);
                accepted_epochs += 1;
                consecutive_rejections = 0;

                let mut metrics = serde_json::Map::new();
                metrics.insert(
                    config.target_metric.to_string(),
                    serde_json::Value::from(measured),
                );
                let metrics_json = serde_json::Value::Object(metrics).to_string();
                self.db.evaluations().update_best(
                    evaluation_id,
                    &best_prompt,
                    &metrics_json,
                    cumulative,
                )?;
                self.db.evaluations().set_epoch_accepted(&epoch_id, true)?;
            } else {
                consecutive_rejections += 1;
            }
            self.db
                .evaluations()
                .set_current_epoch(evaluation_id, epoch)?;

            self.logger.log(&LogEvent::EpochDecided {
                epoch,
                accepted,
                measured,
                previous_best: previous,
            });
            self.progress.emit(ProgressEvent::EpochTransition {
                evaluation_id: evaluation_id.to_string(),
                epoch,
                accepted: Some(accepted),
            });

            if consecutive_rejections >= config.max_consecutive_rejections {
                info!(
                    evaluation_id,
                    epoch, consecutive_rejections, "Converged, stopping early"
                );
                self.db
                    .evaluations()
                    .update_status(evaluation_id, EvaluationStatus::Completed, None)?;
                self.log_completed(epoch, accepted_epochs, cumulative, started);
                return Ok(EvaluationOutcome::converged(
                    epoch,
                    accepted_epochs,
                    consecutive_rejections,
                    best_prompt,
                    cumulative,
                    started.elapsed(),
                ));
            }
            if epoch == config.max_epochs {
                break;
            }

            // Rejected candidates are kept for audit; the next rewrite always
            // starts from the best prompt.
            let rewriter = PromptRewriter::new(&*self.service);
            let next = rewriter
                .propose(RewriteInput {
                    current_prompt: best_prompt.clone(),
                    persona_metrics: serde_json::to_value(&run.breakdown)?,
                    suggestions: suggestions.clone(),
                    transcript_samples: samples,
                    target_metric: config.target_metric.to_string(),
                    conversion_goals: config.conversion_goals.clone(),
                })
                .await;
            match &next.source {
                CandidateSource::Optimizer => {}
                CandidateSource::Suggestion(issue) => {
                    self.logger.log(&LogEvent::FallbackUsed {
                        epoch,
                        stage: "optimize".to_string(),
                        reason: format!("applied suggestion for {}", issue),
                    });
                }
                CandidateSource::NoOp => {
                    self.logger.log(&LogEvent::FallbackUsed {
                        epoch,
                        stage: "optimize".to_string(),
                        reason: "kept prompt unchanged".to_string(),
                    });
                }
            }
            candidate = next.prompt;
        }

        self.db
            .evaluations()
            .update_status(evaluation_id, EvaluationStatus::Completed, None)?;
        self.log_completed(epoch, accepted_epochs, cumulative, started);
        Ok(EvaluationOutcome::max_epochs_reached(
            epoch,
            accepted_epochs,
            best_prompt,
            cumulative,
            started.elapsed(),
        ))
    }

    fn log_completed(&self, epochs: u32, accepted_epochs: u32, cumulative: f64, started: Instant) {
        self.logger.log(&LogEvent::EvaluationCompleted {
            epochs,
            accepted_epochs,
            cumulative_improvement: cumulative,
            duration_secs: started.elapsed().as_secs_f64(),
        });
    }

    fn load_personas(&self, config: &EvaluationConfig) -> Result<Vec<Persona>, EvalError> {
        let mut personas = Vec::with_capacity(config.personas.len());
        for id in &config.personas {
            if let Some(stored) = self.db.personas().get(id)? {
                let traits: Vec<PersonaTrait> = serde_json::from_str(&stored.traits)
                    .or_else(|_| {
                        // Also accept a plain comma-separated list
                        stored
                            .traits
                            .split(',')
                            .map(|s| PersonaTrait::from_str(s.trim()))
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(EvalError::Config)
                    })?;
                let mut persona = Persona::new(&stored.id, &stored.name, traits);
                if let Some(fragment) = stored.system_fragment {
                    persona = persona.with_system_fragment(fragment);
                }
                personas.push(persona);
            } else if let Some(persona) = builtin_persona(id) {
                personas.push(persona);
            } else {
                return Err(EvalError::UnknownPersona(id.clone()));
            }
        }
        Ok(personas)
    }
}

fn parse_best_value(best_metrics: Option<&str>, config: &EvaluationConfig) -> Option<f64> {
    let metrics: serde_json::Value = serde_json::from_str(best_metrics?).ok()?;
    metrics
        .get(config.target_metric.to_string())
        .and_then(|v| v.as_f64())
}
