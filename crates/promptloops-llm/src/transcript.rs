use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the conversation produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(TurnRole::User),
            "agent" => Ok(TurnRole::Agent),
            _ => Err(format!("Unknown turn role: {}", s)),
        }
    }
}

/// One entry in a session transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock latency of the generating call, agent turns only
    pub latency_ms: Option<u64>,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            latency_ms: None,
            tokens_in: None,
            tokens_out: None,
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            content: content.into(),
            timestamp: Utc::now(),
            latency_ms: None,
            tokens_in: None,
            tokens_out: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_tokens(mut self, tokens_in: u32, tokens_out: u32) -> Self {
        self.tokens_in = Some(tokens_in);
        self.tokens_out = Some(tokens_out);
        self
    }
}

/// The trailing slice of a transcript used as generation context.
///
/// User-turn generation only ever sees the last `n` turns, not the full
/// history.
pub fn context_window(transcript: &[Turn], n: usize) -> &[Turn] {
    let start = transcript.len().saturating_sub(n);
    &transcript[start..]
}

/// Concatenated lowercase text of all agent turns, used by the
/// deterministic fallback analyzers.
pub fn agent_text(transcript: &[Turn]) -> String {
    transcript
        .iter()
        .filter(|t| t.role == TurnRole::Agent)
        .map(|t| t.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_window_shorter_than_transcript() {
        let turns: Vec<Turn> = (0..10).map(|i| Turn::user(format!("msg {}", i))).collect();
        let window = context_window(&turns, 6);
        assert_eq!(window.len(), 6);
        assert_eq!(window[0].content, "msg 4");
        assert_eq!(window[5].content, "msg 9");
    }

    #[test]
    fn test_context_window_longer_than_transcript() {
        let turns = vec![Turn::user("hello")];
        let window = context_window(&turns, 6);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_agent_text_filters_and_lowercases() {
        let turns = vec![
            Turn::user("Hi There"),
            Turn::agent("Hello! How CAN I help?"),
            Turn::agent("Goodbye"),
        ];
        let text = agent_text(&turns);
        assert_eq!(text, "hello! how can i help?\ngoodbye");
    }
}
