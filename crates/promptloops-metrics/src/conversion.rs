//! Deterministic conversion and satisfaction heuristics.
//!
//! Used as the fallback scorer when no language-based goal checker is
//! available. Both functions are pure so a rerun over the same transcript
//! always yields the same score.

use promptloops_llm::{agent_text, IssueSeverity, TranscriptIssue, Turn};

/// Phrases indicating the synthetic user committed to an action
const POSITIVE_PHRASES: &[&str] = &[
    "schedule a demo",
    "book a demo",
    "sign me up",
    "sign up now",
    "let's proceed",
    "i'll take it",
    "ready to buy",
    "purchase",
    "upgrade my plan",
    "where do i start",
];

/// Phrases indicating deferral or refusal
const NEGATIVE_PHRASES: &[&str] = &[
    "not interested",
    "no thanks",
    "maybe later",
    "i'll think about it",
    "too expensive",
    "not right now",
    "i need to ask",
    "cancel my",
];

/// Agent-side call-to-action phrases
const CTA_PHRASES: &[&str] = &[
    "would you like to",
    "shall i set",
    "can i schedule",
    "book a time",
    "schedule a demo",
    "sign up",
    "start your trial",
    "get you started",
];

/// Penalty applied when the agent never asked for the next step
const NO_CTA_PENALTY: f64 = 20.0;

/// Estimate conversion likelihood from transcript text alone.
///
/// Positive action indicators with no deferrals score 75, deferrals with no
/// positive signals score 25, anything else 50. If the agent side never
/// produced a call-to-action the score drops by 20 points. The result is
/// clamped to [20, 100].
pub fn estimate_conversion(transcript: &[Turn]) -> f64 {
    let full_text = transcript
        .iter()
        .map(|t| t.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    let has_positive = POSITIVE_PHRASES.iter().any(|p| full_text.contains(p));
    let has_negative = NEGATIVE_PHRASES.iter().any(|p| full_text.contains(p));

    let mut score: f64 = match (has_positive, has_negative) {
        (true, false) => 75.0,
        (false, true) => 25.0,
        _ => 50.0,
    };

    let agent = agent_text(transcript);
    let has_cta = CTA_PHRASES.iter().any(|p| agent.contains(p));
    if !has_cta {
        score -= NO_CTA_PENALTY;
    }

    score.clamp(20.0, 100.0)
}

/// Satisfaction proxy when no dedicated CSAT model is available: the
/// analyzer's accuracy score penalized for severe issues, clamped to
/// [0, 100].
pub fn estimate_csat(accuracy: f64, issues: &[TranscriptIssue]) -> f64 {
    let high = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::High)
        .count() as f64;
    let critical = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Critical)
        .count() as f64;

    (accuracy - 5.0 * high - 10.0 * critical).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(user: &str, agent: &str) -> Vec<Turn> {
        vec![Turn::user(user), Turn::agent(agent)]
    }

    #[test]
    fn test_positive_with_cta_scores_75() {
        let transcript = turns(
            "I'd like to schedule a demo",
            "Great! Would you like to pick a time this week?",
        );
        assert_eq!(estimate_conversion(&transcript), 75.0);
    }

    #[test]
    fn test_positive_without_cta_scores_55() {
        let transcript = turns("I'd like to schedule a demo", "Our product does many things.");
        assert_eq!(estimate_conversion(&transcript), 55.0);
    }

    #[test]
    fn test_negative_without_cta_clamps_to_20() {
        // 25 - 20 = 5, clamped up to the floor
        let transcript = turns("Sounds too expensive for us.", "I understand.");
        assert_eq!(estimate_conversion(&transcript), 20.0);
    }

    #[test]
    fn test_neutral_transcript_scores_50_with_cta() {
        let transcript = turns(
            "Tell me about your pricing tiers.",
            "We have three tiers. Would you like to see a comparison?",
        );
        assert_eq!(estimate_conversion(&transcript), 50.0);
    }

    #[test]
    fn test_mixed_signals_score_as_neutral() {
        let transcript = turns(
            "I'd like to schedule a demo, but it's maybe later for us.",
            "Would you like to leave your email?",
        );
        assert_eq!(estimate_conversion(&transcript), 50.0);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let transcript = turns("sign me up", "start your trial today");
        let first = estimate_conversion(&transcript);
        let second = estimate_conversion(&transcript);
        assert_eq!(first, second);
    }

    #[test]
    fn test_csat_penalizes_severe_issues() {
        use promptloops_llm::TranscriptIssue;

        let issues = vec![
            TranscriptIssue {
                category: "hallucination".into(),
                severity: IssueSeverity::Critical,
                description: "invented a discount".into(),
                suggested_fix: None,
            },
            TranscriptIssue {
                category: "tone".into(),
                severity: IssueSeverity::High,
                description: "dismissive reply".into(),
                suggested_fix: None,
            },
            TranscriptIssue {
                category: "verbosity".into(),
                severity: IssueSeverity::Low,
                description: "long answer".into(),
                suggested_fix: None,
            },
        ];

        // 80 - 10 (critical) - 5 (high), low severity ignored
        assert_eq!(estimate_csat(80.0, &issues), 65.0);
        assert_eq!(estimate_csat(5.0, &issues), 0.0);
    }
}
