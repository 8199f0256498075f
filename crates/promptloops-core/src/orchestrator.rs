use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use promptloops_db::{Database, RunStatus, SessionStatus, TestRunRecord, TurnRecord};
use promptloops_llm::{LanguageService, Persona, Turn};
use promptloops_logging::{LogEvent, Logger, ProgressChannel, ProgressEvent};
use promptloops_metrics::{
    aggregate_run, persona_breakdown, OutcomeStatus, PersonaBreakdown, RunAggregates,
    SessionOutcome,
};
use promptloops_session::{
    PhraseBook, SessionError, SessionExecutor, SessionReport, SessionSink, SessionTermination,
};

use crate::config::RetryPolicy;
use crate::error::EvalError;
use crate::scheduler::{with_retry, Scheduler};

/// Everything needed to execute one test run
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub evaluation_id: Option<String>,
    pub prompt_id: Option<String>,
    pub prompt: String,
    pub personas: Vec<Persona>,
    /// (persona_id, instance) pairs, one session each
    pub pairs: Vec<(String, usize)>,
    pub concurrency: usize,
    pub max_turns: usize,
    pub retry: RetryPolicy,
}

/// Terminal result of one test run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub aggregates: RunAggregates,
    pub breakdown: Vec<PersonaBreakdown>,
    pub outcomes: Vec<SessionOutcome>,
}

/// Persists partial transcripts through the store.
struct DbSink {
    db: Arc<Database>,
}

impl SessionSink for DbSink {
    fn record_turns(
        &self,
        session_id: &str,
        turns: &[Turn],
        progress_pct: u8,
    ) -> Result<(), SessionError> {
        let records: Vec<TurnRecord> = turns
            .iter()
            .enumerate()
            .map(|(idx, turn)| TurnRecord {
                idx,
                role: turn.role.to_string(),
                content: turn.content.clone(),
                timestamp: turn.timestamp,
                latency_ms: turn.latency_ms,
                tokens_in: turn.tokens_in,
                tokens_out: turn.tokens_out,
            })
            .collect();
        self.db
            .runs()
            .record_turns(session_id, &records, progress_pct)
            .map_err(|e| SessionError::Sink(e.to_string()))
    }
}

/// Fans one prompt out over many concurrent sessions and folds the results.
pub struct TestRunOrchestrator {
    db: Arc<Database>,
    service: Arc<dyn LanguageService>,
    phrases: Arc<PhraseBook>,
    logger: Arc<Logger>,
    progress: ProgressChannel,
}

impl TestRunOrchestrator {
    pub fn new(
        db: Arc<Database>,
        service: Arc<dyn LanguageService>,
        phrases: Arc<PhraseBook>,
        logger: Arc<Logger>,
        progress: ProgressChannel,
    ) -> Self {
        Self {
            db,
            service,
            phrases,
            logger,
            progress,
        }
    }

    /// Execute a full run: pre-materialize sessions, fan out bounded by the
    /// concurrency cap, wait for every session to reach a terminal state,
    /// then aggregate.
    ///
    /// Individual session failures are contained; only store errors during
    /// setup or finalization propagate.
    pub async fn execute(
        &self,
        spec: RunSpec,
        cancelled: Arc<AtomicBool>,
    ) -> Result<RunResult, EvalError> {
        let personas: HashMap<String, Persona> = spec
            .personas
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        for (persona_id, _) in &spec.pairs {
            if !personas.contains_key(persona_id) {
                return Err(EvalError::UnknownPersona(persona_id.clone()));
            }
        }

        let run_id = Uuid::new_v4().to_string();
        self.db.runs().create_run(&TestRunRecord {
            id: run_id.clone(),
            evaluation_id: spec.evaluation_id.clone(),
            prompt_id: spec.prompt_id.clone(),
            prompt: spec.prompt.clone(),
            status: RunStatus::Running,
            concurrency: spec.concurrency,
            total_sessions: spec.pairs.len(),
            completed_sessions: 0,
            failed_sessions: 0,
            avg_accuracy: None,
            avg_latency_ms: None,
            tokens_in: 0,
            tokens_out: 0,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        })?;

        // All-or-nothing so progress views never see a half-materialized run
        let session_ids = self
            .db
            .runs()
            .insert_pending_sessions(&run_id, &spec.pairs)?;

        self.logger.log(&LogEvent::RunStarted {
            run_id: run_id.clone(),
            total_sessions: spec.pairs.len(),
            concurrency: spec.concurrency,
        });

        let scheduler = Scheduler::new(spec.concurrency);
        let mut handles: Vec<(String, String, JoinHandle<SessionOutcome>)> = Vec::new();

        for (session_id, (persona_id, _instance)) in session_ids.iter().zip(&spec.pairs) {
            let persona = personas[persona_id].clone();
            let handle = tokio::spawn(run_one_session(SessionTask {
                db: self.db.clone(),
                service: self.service.clone(),
                phrases: self.phrases.clone(),
                logger: self.logger.clone(),
                progress: self.progress.clone(),
                scheduler: scheduler.clone(),
                cancelled: cancelled.clone(),
                retry: spec.retry.clone(),
                run_id: run_id.clone(),
                session_id: session_id.clone(),
                persona,
                prompt: spec.prompt.clone(),
                max_turns: spec.max_turns,
            }));
            handles.push((session_id.clone(), persona_id.clone(), handle));
        }

        // Fan-in barrier: aggregation only ever sees terminal sessions
        let mut outcomes: Vec<SessionOutcome> = Vec::with_capacity(handles.len());
        for (session_id, persona_id, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(session_id, error = %e, "Session task panicked");
                    if let Err(db_err) = self.db.runs().finish_session(
                        &session_id,
                        SessionStatus::Failed,
                        None,
                        None,
                        Some("session task panicked"),
                    ) {
                        warn!(session_id, error = %db_err, "Failed to record panicked session");
                    }
                    outcomes.push(failed_outcome(&session_id, &persona_id, "session task panicked"));
                }
            }
        }

        let cancelled_now = cancelled.load(Ordering::SeqCst);
        if cancelled_now {
            let transitioned = self.db.runs().cancel_remaining(&run_id)?;
            debug!(run_id, transitioned, "Cancelled remaining sessions");
        }

        let aggregates = aggregate_run(&outcomes);
        let breakdown = persona_breakdown(&outcomes);

        let status = if cancelled_now {
            RunStatus::Cancelled
        } else if aggregates.failed == aggregates.total {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let error = match status {
            RunStatus::Failed => Some("all sessions failed"),
            _ => None,
        };

        self.db.runs().finalize_run(
            &run_id,
            status,
            aggregates.completed,
            aggregates.failed,
            aggregates.avg_accuracy,
            aggregates.avg_latency_ms,
            aggregates.tokens_in,
            aggregates.tokens_out,
            error,
        )?;

        if let Some(prompt_id) = &spec.prompt_id {
            self.db.prompts().save(prompt_id, &spec.prompt)?;
            self.db.prompts().record_run(
                prompt_id,
                aggregates.avg_accuracy,
                aggregates.avg_latency_ms,
            )?;
        }

        self.logger.log(&LogEvent::RunCompleted {
            run_id: run_id.clone(),
            completed: aggregates.completed,
            failed: aggregates.failed,
            cancelled: aggregates.cancelled,
            avg_accuracy: aggregates.avg_accuracy,
        });
        self.progress.emit(ProgressEvent::RunProgress {
            run_id: run_id.clone(),
            completed: aggregates.completed,
            failed: aggregates.failed,
            total: aggregates.total,
        });

        Ok(RunResult {
            run_id,
            status,
            aggregates,
            breakdown,
            outcomes,
        })
    }
}

struct SessionTask {
    db: Arc<Database>,
    service: Arc<dyn LanguageService>,
    phrases: Arc<PhraseBook>,
    logger: Arc<Logger>,
    progress: ProgressChannel,
    scheduler: Scheduler,
    cancelled: Arc<AtomicBool>,
    retry: RetryPolicy,
    run_id: String,
    session_id: String,
    persona: Persona,
    prompt: String,
    max_turns: usize,
}

async fn run_one_session(task: SessionTask) -> SessionOutcome {
    let _permit = match task.scheduler.acquire().await {
        Some(permit) => permit,
        None => return cancelled_outcome(&task.session_id, &task.persona.id),
    };

    // A session cancelled before it starts stays pending in the store;
    // cancel_remaining sweeps it after the barrier.
    if task.cancelled.load(Ordering::SeqCst) {
        return cancelled_outcome(&task.session_id, &task.persona.id);
    }

    if let Err(e) = task.db.runs().mark_session_running(&task.session_id) {
        warn!(session_id = task.session_id, error = %e, "Failed to mark session running");
    }

    let sink = DbSink {
        db: task.db.clone(),
    };
    let executor = SessionExecutor::new(&*task.service, &task.phrases, &task.progress)
        .with_max_turns(task.max_turns);

    let result = with_retry(&task.retry, || {
        executor.run(
            &task.run_id,
            &task.session_id,
            &task.persona,
            &task.prompt,
            &task.cancelled,
            &sink,
        )
    })
    .await;

    match result {
        Ok(report) => finish_session(&task, report),
        Err(e) => {
            let message = e.to_string();
            if let Err(db_err) = task.db.runs().finish_session(
                &task.session_id,
                SessionStatus::Failed,
                None,
                None,
                Some(&message),
            ) {
                warn!(session_id = task.session_id, error = %db_err, "Failed to record session failure");
            }
            task.logger.log(&LogEvent::SessionFailed {
                session_id: task.session_id.clone(),
                persona_id: task.persona.id.clone(),
                error: message.clone(),
            });
            task.progress.emit(ProgressEvent::SessionTerminal {
                run_id: task.run_id.clone(),
                session_id: task.session_id.clone(),
                status: SessionStatus::Failed.to_string(),
            });
            failed_outcome(&task.session_id, &task.persona.id, &message)
        }
    }
}

fn finish_session(task: &SessionTask, report: SessionReport) -> SessionOutcome {
    let (db_status, outcome_status) = match report.termination {
        SessionTermination::Completed => (SessionStatus::Completed, OutcomeStatus::Completed),
        SessionTermination::Cancelled => (SessionStatus::Cancelled, OutcomeStatus::Cancelled),
    };

    if let Err(e) = task.db.runs().finish_session(
        &task.session_id,
        db_status,
        report.accuracy,
        report.avg_latency_ms,
        None,
    ) {
        warn!(session_id = task.session_id, error = %e, "Failed to record session completion");
    }

    if db_status == SessionStatus::Completed {
        task.logger.log(&LogEvent::SessionCompleted {
            session_id: task.session_id.clone(),
            persona_id: task.persona.id.clone(),
            turns: report.transcript.len(),
            accuracy: report.accuracy,
        });
    }
    task.progress.emit(ProgressEvent::SessionTerminal {
        run_id: task.run_id.clone(),
        session_id: task.session_id.clone(),
        status: db_status.to_string(),
    });

    SessionOutcome {
        session_id: task.session_id.clone(),
        persona_id: task.persona.id.clone(),
        status: outcome_status,
        accuracy: report.accuracy,
        avg_latency_ms: report.avg_latency_ms,
        tokens_in: report.tokens_in,
        tokens_out: report.tokens_out,
        issues: report.issues,
        transcript: report.transcript,
    }
}

fn cancelled_outcome(session_id: &str, persona_id: &str) -> SessionOutcome {
    SessionOutcome {
        session_id: session_id.to_string(),
        persona_id: persona_id.to_string(),
        status: OutcomeStatus::Cancelled,
        accuracy: None,
        avg_latency_ms: None,
        tokens_in: 0,
        tokens_out: 0,
        issues: Vec::new(),
        transcript: Vec::new(),
    }
}

fn failed_outcome(session_id: &str, persona_id: &str, _error: &str) -> SessionOutcome {
    SessionOutcome {
        session_id: session_id.to_string(),
        persona_id: persona_id.to_string(),
        status: OutcomeStatus::Failed,
        accuracy: None,
        avg_latency_ms: None,
        tokens_in: 0,
        tokens_out: 0,
        issues: Vec::new(),
        transcript: Vec::new(),
    }
}
