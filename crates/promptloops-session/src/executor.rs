use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, warn};

use promptloops_llm::{context_window, LanguageService, Persona, Turn, TranscriptIssue};
use promptloops_logging::{ProgressChannel, ProgressEvent};

use crate::starters::PhraseBook;
use crate::SessionError;

/// Default number of user/agent exchanges before a session is cut off
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Transcript turns seen by user-turn generation
const CONTEXT_WINDOW: usize = 6;

/// How the session ended, given it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTermination {
    Completed,
    Cancelled,
}

/// Everything the orchestrator needs to finalize one session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub persona_id: String,
    pub termination: SessionTermination,
    pub transcript: Vec<Turn>,
    pub accuracy: Option<f64>,
    pub issues: Vec<TranscriptIssue>,
    pub avg_latency_ms: Option<f64>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub exchanges: usize,
    pub ended_early: bool,
}

/// Receives partial transcripts as the session progresses.
///
/// Must be idempotent on turn index: the executor re-sends the full
/// transcript on each flush.
pub trait SessionSink: Send + Sync {
    fn record_turns(
        &self,
        session_id: &str,
        turns: &[Turn],
        progress_pct: u8,
    ) -> Result<(), SessionError>;
}

/// Runs one simulated conversation against a candidate prompt
pub struct SessionExecutor<'a> {
    service: &'a dyn LanguageService,
    phrases: &'a PhraseBook,
    progress: &'a ProgressChannel,
    max_turns: usize,
}

impl<'a> SessionExecutor<'a> {
    pub fn new(
        service: &'a dyn LanguageService,
        phrases: &'a PhraseBook,
        progress: &'a ProgressChannel,
    ) -> Self {
        Self {
            service,
            phrases,
            progress,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Run the free-simulation loop to completion.
    ///
    /// Service failures on the agent side or during analysis fail the session
    /// after flushing the partial transcript; retries belong to the caller.
    /// Cancellation is checked only at exchange boundaries.
    pub async fn run(
        &self,
        run_id: &str,
        session_id: &str,
        persona: &Persona,
        prompt: &str,
        cancelled: &AtomicBool,
        sink: &dyn SessionSink,
    ) -> Result<SessionReport, SessionError> {
        let mut transcript: Vec<Turn> = Vec::new();
        let mut latency_samples: Vec<u64> = Vec::new();
        let mut tokens_in: u64 = 0;
        let mut tokens_out: u64 = 0;
        let mut exchanges = 0usize;
        let mut ended_early = false;

        while exchanges < self.max_turns {
            if cancelled.load(Ordering::SeqCst) {
                debug!(session_id, exchanges, "Session cancelled");
                self.flush(sink, session_id, &transcript, self.pct(exchanges))?;
                return Ok(self.report(
                    session_id,
                    persona,
                    SessionTermination::Cancelled,
                    transcript,
                    None,
                    Vec::new(),
                    &latency_samples,
                    tokens_in,
                    tokens_out,
                    exchanges,
                    ended_early,
                ));
            }

            let user_text = if exchanges == 0 {
                self.phrases
                    .starter_for(persona, &mut rand::thread_rng())
                    .ok_or_else(|| SessionError::NoStarters(persona.primary_trait().to_string()))?
            } else {
                match self
                    .service
                    .generate_user_turn(persona, context_window(&transcript, CONTEXT_WINDOW))
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(session_id, error = %e, "User-turn generation failed, using fallback");
                        self.phrases.fallback_follow_up(persona, exchanges)
                    }
                }
            };
            transcript.push(Turn::user(user_text));

            let started = Instant::now();
            let reply = match self.service.generate_agent_turn(prompt, &transcript).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.flush_best_effort(sink, session_id, &transcript, self.pct(exchanges));
                    return Err(e.into());
                }
            };
            let latency_ms = started.elapsed().as_millis() as u64;
            latency_samples.push(latency_ms);
            tokens_in += reply.tokens_in as u64;
            tokens_out += reply.tokens_out as u64;

            let agent_turn = Turn::agent(&reply.text)
                .with_latency(latency_ms)
                .with_tokens(reply.tokens_in, reply.tokens_out);
            let closing = self.phrases.is_closing(&agent_turn.content);
            transcript.push(agent_turn);

            exchanges += 1;
            let is_final = closing || exchanges == self.max_turns;

            // Flush every second exchange plus the final one
            if exchanges % 2 == 0 || is_final {
                self.flush(sink, session_id, &transcript, self.pct(exchanges))?;
            }

            self.progress.emit(ProgressEvent::SessionTurn {
                run_id: run_id.to_string(),
                session_id: session_id.to_string(),
                turn: exchanges,
                progress_pct: self.pct(exchanges),
            });

            if closing {
                debug!(session_id, exchanges, "Agent closed the conversation");
                ended_early = true;
                break;
            }
        }

        let analysis = match self.service.analyze_transcript(&transcript, persona).await {
            Ok(analysis) => analysis,
            Err(e) => {
                self.flush_best_effort(sink, session_id, &transcript, self.pct(exchanges));
                return Err(e.into());
            }
        };

        Ok(self.report(
            session_id,
            persona,
            SessionTermination::Completed,
            transcript,
            Some(analysis.accuracy),
            analysis.issues,
            &latency_samples,
            tokens_in,
            tokens_out,
            exchanges,
            ended_early,
        ))
    }

    fn pct(&self, exchanges: usize) -> u8 {
        ((exchanges * 100) / self.max_turns).min(100) as u8
    }

    fn flush(
        &self,
        sink: &dyn SessionSink,
        session_id: &str,
        transcript: &[Turn],
        progress_pct: u8,
    ) -> Result<(), SessionError> {
        sink.record_turns(session_id, transcript, progress_pct)
    }

    fn flush_best_effort(
        &self,
        sink: &dyn SessionSink,
        session_id: &str,
        transcript: &[Turn],
        progress_pct: u8,
    ) {
        if let Err(e) = sink.record_turns(session_id, transcript, progress_pct) {
            warn!(session_id, error = %e, "Failed to flush partial transcript");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        session_id: &str,
        persona: &Persona,
        termination: SessionTermination,
        transcript: Vec<Turn>,
        accuracy: Option<f64>,
        issues: Vec<TranscriptIssue>,
        latency_samples: &[u64],
        tokens_in: u64,
        tokens_out: u64,
        exchanges: usize,
        ended_early: bool,
    ) -> SessionReport {
        let avg_latency_ms = if latency_samples.is_empty() {
            None
        } else {
            Some(latency_samples.iter().sum::<u64>() as f64 / latency_samples.len() as f64)
        };
        SessionReport {
            session_id: session_id.to_string(),
            persona_id: persona.id.clone(),
            termination,
            transcript,
            accuracy,
            issues,
            avg_latency_ms,
            tokens_in,
            tokens_out,
            exchanges,
            ended_early,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use promptloops_llm::{
        AgentReply, LlmError, OptimizeReply, OptimizeRequest, PersonaTrait, TranscriptAnalysis,
    };

    struct ScriptedService {
        agent_replies: Vec<String>,
        agent_calls: AtomicUsize,
        fail_user_turns: bool,
        fail_agent_at: Option<usize>,
        accuracy: f64,
    }

    impl ScriptedService {
        fn new(agent_replies: Vec<&str>) -> Self {
            Self {
                agent_replies: agent_replies.into_iter().map(String::from).collect(),
                agent_calls: AtomicUsize::new(0),
                fail_user_turns: false,
                fail_agent_at: None,
                accuracy: 80.0,
            }
        }
    }

    #[async_trait]
    impl LanguageService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate_user_turn(
            &self,
            _persona: &Persona,
            _context: &[Turn],
        ) -> Result<String, LlmError> {
            if self.fail_user_turns {
                Err(LlmError::Unavailable("down".into()))
            } else {
                Ok("Tell me more.".into())
            }
        }

        async fn generate_agent_turn(
            &self,
            _prompt: &str,
            _transcript: &[Turn],
        ) -> Result<AgentReply, LlmError> {
            let call = self.agent_calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_agent_at {
                return Err(LlmError::Other("boom".into()));
            }
            let text = self
                .agent_replies
                .get(call.min(self.agent_replies.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_else(|| "Sure.".into());
            Ok(AgentReply {
                text,
                tokens_in: 10,
                tokens_out: 20,
            })
        }

        async fn analyze_transcript(
            &self,
            _transcript: &[Turn],
            _persona: &Persona,
        ) -> Result<TranscriptAnalysis, LlmError> {
            Ok(TranscriptAnalysis {
                accuracy: self.accuracy,
                issues: vec![],
            })
        }

        async fn optimize_prompt(
            &self,
            _request: OptimizeRequest,
        ) -> Result<OptimizeReply, LlmError> {
            unimplemented!("not used in executor tests")
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        flushes: Mutex<Vec<(usize, u8)>>,
    }

    impl SessionSink for RecordingSink {
        fn record_turns(
            &self,
            _session_id: &str,
            turns: &[Turn],
            progress_pct: u8,
        ) -> Result<(), SessionError> {
            self.flushes
                .lock()
                .unwrap()
                .push((turns.len(), progress_pct));
            Ok(())
        }
    }

    fn persona() -> Persona {
        Persona {
            id: "curious-carl".into(),
            name: "Carl".into(),
            traits: vec![PersonaTrait::Curious],
            system_fragment: None,
        }
    }

    fn channel() -> ProgressChannel {
        ProgressChannel::default()
    }

    #[tokio::test]
    async fn test_early_exit_on_closing_phrase() {
        let service = ScriptedService::new(vec![
            "It automates your sales outreach.",
            "Happy to help! Is there anything else I can do for you?",
        ]);
        let phrases = PhraseBook::default();
        let progress = channel();
        let sink = RecordingSink::default();
        let cancelled = AtomicBool::new(false);

        let executor = SessionExecutor::new(&service, &phrases, &progress);
        let report = executor
            .run("r1", "s1", &persona(), "Be helpful.", &cancelled, &sink)
            .await
            .unwrap();

        assert_eq!(report.exchanges, 2);
        assert!(report.ended_early);
        assert_eq!(report.termination, SessionTermination::Completed);
        assert_eq!(report.transcript.len(), 4);
        assert_eq!(report.accuracy, Some(80.0));
    }

    #[tokio::test]
    async fn test_runs_to_max_turns_without_closing() {
        let service = ScriptedService::new(vec!["Our pricing starts at $29."]);
        let phrases = PhraseBook::default();
        let progress = channel();
        let sink = RecordingSink::default();
        let cancelled = AtomicBool::new(false);

        let executor = SessionExecutor::new(&service, &phrases, &progress).with_max_turns(4);
        let report = executor
            .run("r1", "s1", &persona(), "Be helpful.", &cancelled, &sink)
            .await
            .unwrap();

        assert_eq!(report.exchanges, 4);
        assert!(!report.ended_early);
        assert_eq!(report.transcript.len(), 8);
        // Token accounting sums every agent reply
        assert_eq!(report.tokens_in, 40);
        assert_eq!(report.tokens_out, 80);
        assert!(report.avg_latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_user_turn_failure_falls_back_deterministically() {
        let mut service = ScriptedService::new(vec!["Sure thing."]);
        service.fail_user_turns = true;
        let phrases = PhraseBook::default();
        let progress = channel();
        let sink = RecordingSink::default();
        let cancelled = AtomicBool::new(false);

        let executor = SessionExecutor::new(&service, &phrases, &progress).with_max_turns(3);
        let report = executor
            .run("r1", "s1", &persona(), "Be helpful.", &cancelled, &sink)
            .await
            .unwrap();

        // Completed despite every generated user turn failing
        assert_eq!(report.exchanges, 3);
        let second_user = &report.transcript[2];
        assert_eq!(
            second_user.content,
            phrases.fallback_follow_up(&persona(), 1)
        );
    }

    #[tokio::test]
    async fn test_agent_failure_persists_partial_and_errors() {
        let mut service = ScriptedService::new(vec!["First reply."]);
        service.fail_agent_at = Some(1);
        let phrases = PhraseBook::default();
        let progress = channel();
        let sink = RecordingSink::default();
        let cancelled = AtomicBool::new(false);

        let executor = SessionExecutor::new(&service, &phrases, &progress).with_max_turns(5);
        let err = executor
            .run("r1", "s1", &persona(), "Be helpful.", &cancelled, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Llm(_)));
        let flushes = sink.flushes.lock().unwrap();
        // The partial transcript (2 turns + the failing exchange's user turn)
        // reached the sink before the error surfaced
        assert_eq!(flushes.last().unwrap().0, 3);
    }

    #[tokio::test]
    async fn test_cancellation_at_turn_boundary() {
        let service = ScriptedService::new(vec!["Reply."]);
        let phrases = PhraseBook::default();
        let progress = channel();
        let sink = RecordingSink::default();
        let cancelled = AtomicBool::new(true);

        let executor = SessionExecutor::new(&service, &phrases, &progress);
        let report = executor
            .run("r1", "s1", &persona(), "Be helpful.", &cancelled, &sink)
            .await
            .unwrap();

        assert_eq!(report.termination, SessionTermination::Cancelled);
        assert!(report.transcript.is_empty());
        assert!(report.accuracy.is_none());
    }

    #[tokio::test]
    async fn test_progress_events_emitted_every_exchange() {
        let service = ScriptedService::new(vec!["Reply."]);
        let phrases = PhraseBook::default();
        let progress = channel();
        let mut rx = progress.subscribe();
        let sink = RecordingSink::default();
        let cancelled = AtomicBool::new(false);

        let executor = SessionExecutor::new(&service, &phrases, &progress).with_max_turns(2);
        executor
            .run("r1", "s1", &persona(), "Be helpful.", &cancelled, &sink)
            .await
            .unwrap();

        let mut turns = vec![];
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::SessionTurn { turn, .. } = event {
                turns.push(turn);
            }
        }
        assert_eq!(turns, vec![1, 2]);
    }
}
