use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Live progress pushed to external observers (the UI) after every session
/// turn and every epoch transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    SessionTurn {
        run_id: String,
        session_id: String,
        turn: usize,
        progress_pct: u8,
    },
    SessionTerminal {
        run_id: String,
        session_id: String,
        status: String,
    },
    RunProgress {
        run_id: String,
        completed: usize,
        failed: usize,
        total: usize,
    },
    EpochTransition {
        evaluation_id: String,
        epoch: u32,
        accepted: Option<bool>,
    },
}

/// Broadcast channel for progress events.
///
/// Delivery is best-effort: sends to a channel with no subscribers, or with
/// lagging subscribers, are silently dropped. Emitting never blocks.
#[derive(Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring delivery failures
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_panic() {
        let channel = ProgressChannel::new(8);
        channel.emit(ProgressEvent::RunProgress {
            run_id: "r1".into(),
            completed: 1,
            failed: 0,
            total: 4,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let channel = ProgressChannel::new(8);
        let mut rx = channel.subscribe();

        channel.emit(ProgressEvent::SessionTurn {
            run_id: "r1".into(),
            session_id: "s1".into(),
            turn: 2,
            progress_pct: 20,
        });

        match rx.recv().await.unwrap() {
            ProgressEvent::SessionTurn { turn, .. } => assert_eq!(turn, 2),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
