//! End-to-end tests of the epoch loop against an in-memory store and a
//! scripted language service.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use promptloops_core::{EpochController, EvalError, EvaluationConfig, EvaluationOutcome};
use promptloops_db::{Database, EvaluationStatus};
use promptloops_llm::{
    AgentReply, LanguageService, LlmError, OptimizeReply, OptimizeRequest, Persona,
    TranscriptAnalysis, Turn,
};
use promptloops_logging::{LogFormat, Logger, ProgressChannel};
use promptloops_metrics::TargetMetric;
use promptloops_session::PhraseBook;

/// Scripted service: pops one accuracy per transcript analysis and echoes a
/// closing reply so sessions finish after one exchange.
struct EpochScriptService {
    accuracies: Mutex<Vec<f64>>,
    optimize_calls: AtomicUsize,
    fail_optimizer: bool,
    fail_agent: bool,
}

impl EpochScriptService {
    fn new(accuracies: Vec<f64>) -> Self {
        Self {
            accuracies: Mutex::new(accuracies),
            optimize_calls: AtomicUsize::new(0),
            fail_optimizer: false,
            fail_agent: false,
        }
    }
}

#[async_trait]
impl LanguageService for EpochScriptService {
    fn name(&self) -> &str {
        "epoch-script"
    }

    async fn generate_user_turn(
        &self,
        _persona: &Persona,
        _context: &[Turn],
    ) -> Result<String, LlmError> {
        Ok("Tell me more.".into())
    }

    async fn generate_agent_turn(
        &self,
        _prompt: &str,
        _transcript: &[Turn],
    ) -> Result<AgentReply, LlmError> {
        if self.fail_agent {
            return Err(LlmError::Malformed("agent endpoint refused".into()));
        }
        Ok(AgentReply {
            text: "Happy to help! Is there anything else?".into(),
            tokens_in: 4,
            tokens_out: 8,
        })
    }

    async fn analyze_transcript(
        &self,
        _transcript: &[Turn],
        _persona: &Persona,
    ) -> Result<TranscriptAnalysis, LlmError> {
        let mut accuracies = self.accuracies.lock().unwrap();
        let accuracy = if accuracies.is_empty() {
            70.0
        } else {
            accuracies.remove(0)
        };
        Ok(TranscriptAnalysis {
            accuracy,
            issues: vec![],
        })
    }

    async fn optimize_prompt(&self, request: OptimizeRequest) -> Result<OptimizeReply, LlmError> {
        let call = self.optimize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_optimizer {
            return Err(LlmError::Unavailable("optimizer down".into()));
        }
        Ok(OptimizeReply {
            candidate_prompt: format!("{} (revision {})", request.current_prompt, call + 1),
            changes: vec!["revised".into()],
            predicted_impact: 5.0,
        })
    }
}

fn controller(db: Arc<Database>, service: Arc<dyn LanguageService>) -> EpochController {
    EpochController::new(
        db,
        service,
        Arc::new(PhraseBook::default()),
        Arc::new(Logger::new(LogFormat::Compact)),
        ProgressChannel::default(),
    )
}

fn config(max_epochs: u32) -> EvaluationConfig {
    EvaluationConfig {
        max_epochs,
        tests_per_epoch: 1,
        personas: vec!["curious".into()],
        concurrency: 1,
        improvement_threshold: 5.0,
        target_metric: TargetMetric::Accuracy,
        ..Default::default()
    }
}

fn create_evaluation(db: &Database, config: &EvaluationConfig) -> String {
    let config_json = serde_json::to_string(config).unwrap();
    db.evaluations()
        .create("You are a helpful sales assistant.", &config_json)
        .unwrap()
}

#[tokio::test]
async fn test_epoch_above_threshold_is_accepted() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    // Baseline 70, then 76: a 6-point gain clears the 5-point threshold
    let service = Arc::new(EpochScriptService::new(vec![70.0, 76.0]));
    let id = create_evaluation(&db, &config(2));

    let outcome = controller(db.clone(), service).run(&id).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.epochs(), 2);

    let epochs = db.evaluations().list_epochs(&id).unwrap();
    assert_eq!(epochs.len(), 2);
    assert!(epochs[0].is_accepted);
    assert!(epochs[1].is_accepted);

    let record = db.evaluations().get(&id).unwrap().unwrap();
    assert_eq!(record.status, EvaluationStatus::Completed);
    assert_eq!(record.cumulative_improvement, 6.0);
    // Best prompt is the tested prompt of the most recent accepted epoch
    assert_eq!(record.best_prompt, epochs[1].prompt);
}

#[tokio::test]
async fn test_epoch_below_threshold_is_rejected() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    // Baseline 70, then 74: a 4-point gain misses the 5-point threshold
    let service = Arc::new(EpochScriptService::new(vec![70.0, 74.0]));
    let id = create_evaluation(&db, &config(2));

    let outcome = controller(db.clone(), service).run(&id).await.unwrap();
    assert!(outcome.is_success());

    let epochs = db.evaluations().list_epochs(&id).unwrap();
    assert!(epochs[0].is_accepted);
    assert!(!epochs[1].is_accepted);

    // Rejected candidates are retained for audit; best stays at the baseline
    let record = db.evaluations().get(&id).unwrap().unwrap();
    assert_eq!(record.best_prompt, epochs[0].prompt);
    assert_eq!(record.cumulative_improvement, 0.0);
}

#[tokio::test]
async fn test_epoch_numbers_are_contiguous_from_one() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let service = Arc::new(EpochScriptService::new(vec![70.0, 80.0, 90.0, 95.0]));
    let id = create_evaluation(&db, &config(4));

    controller(db.clone(), service).run(&id).await.unwrap();

    let numbers: Vec<u32> = db
        .evaluations()
        .list_epochs(&id)
        .unwrap()
        .iter()
        .map(|e| e.number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_consecutive_rejections_converge_early() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    // Baseline 70, then three non-improving epochs
    let service = Arc::new(EpochScriptService::new(vec![70.0, 70.0, 70.0, 70.0, 70.0]));
    let mut cfg = config(10);
    cfg.max_consecutive_rejections = 2;
    let id = create_evaluation(&db, &cfg);

    let outcome = controller(db.clone(), service).run(&id).await.unwrap();

    match outcome {
        EvaluationOutcome::Converged {
            epochs,
            consecutive_rejections,
            ..
        } => {
            // Baseline epoch plus two rejections
            assert_eq!(epochs, 3);
            assert_eq!(consecutive_rejections, 2);
        }
        other => panic!("expected convergence, got {:?}", other),
    }
    let record = db.evaluations().get(&id).unwrap().unwrap();
    assert_eq!(record.status, EvaluationStatus::Completed);
}

#[tokio::test]
async fn test_pause_is_honored_at_epoch_boundary() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let service = Arc::new(EpochScriptService::new(vec![70.0]));
    let id = create_evaluation(&db, &config(5));

    let controller = controller(db.clone(), service);
    controller
        .pause_handle()
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let outcome = controller.run(&id).await.unwrap();
    assert!(matches!(outcome, EvaluationOutcome::Paused { epochs: 0, .. }));

    // A paused evaluation can be started again
    let record = db.evaluations().get(&id).unwrap().unwrap();
    assert_eq!(record.status, EvaluationStatus::Paused);
    assert!(record.status.can_start());
    assert_eq!(db.evaluations().list_epochs(&id).unwrap().len(), 0);
}

#[tokio::test]
async fn test_start_is_illegal_from_terminal_state() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let service = Arc::new(EpochScriptService::new(vec![]));
    let id = create_evaluation(&db, &config(1));
    db.evaluations()
        .update_status(&id, EvaluationStatus::Completed, None)
        .unwrap();

    let result = controller(db.clone(), service).run(&id).await;
    assert!(matches!(result, Err(EvalError::InvalidState(_))));
}

#[tokio::test]
async fn test_optimizer_failure_falls_back_to_noop_candidate() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let mut service = EpochScriptService::new(vec![70.0, 70.0]);
    service.fail_optimizer = true;
    let id = create_evaluation(&db, &config(2));

    let outcome = controller(db.clone(), Arc::new(service)).run(&id).await.unwrap();
    assert!(outcome.is_success());

    // With no suggestions available, the second epoch re-tests the prompt
    // unchanged
    let epochs = db.evaluations().list_epochs(&id).unwrap();
    assert_eq!(epochs[0].prompt, epochs[1].prompt);
}

#[tokio::test]
async fn test_all_sessions_failing_fails_the_evaluation() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let mut service = EpochScriptService::new(vec![]);
    service.fail_agent = true;
    let id = create_evaluation(&db, &config(2));

    let outcome = controller(db.clone(), Arc::new(service)).run(&id).await.unwrap();

    match outcome {
        EvaluationOutcome::Failed { error, .. } => {
            assert!(error.contains("Test run failed"), "error was: {}", error);
            assert!(error.contains("all sessions failed"), "error was: {}", error);
        }
        other => panic!("expected a failed outcome, got {:?}", other),
    }
    let record = db.evaluations().get(&id).unwrap().unwrap();
    assert_eq!(record.status, EvaluationStatus::Failed);
    assert!(record.error.unwrap().contains("all sessions failed"));
}

#[tokio::test]
async fn test_unknown_evaluation_id() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let service = Arc::new(EpochScriptService::new(vec![]));

    let result = controller(db, service).run("missing").await;
    assert!(matches!(result, Err(EvalError::NotFound(_))));
}
