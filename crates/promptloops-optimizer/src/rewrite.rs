use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// A parsed rewrite proposal from raw optimizer output.
///
/// Backends that wrap a plain text-completion model emit this wire format;
/// structured backends can construct it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRewrite {
    pub candidate_prompt: String,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub predicted_impact: f64,
}

#[derive(Error, Debug)]
pub enum RewriteParseError {
    #[error("No candidate block found in optimizer output")]
    NoCandidateFound,

    #[error("Failed to parse candidate JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid candidate format: {0}")]
    InvalidFormat(String),
}

impl CandidateRewrite {
    /// Parse a rewrite proposal from the optimizer's output text.
    ///
    /// Expected format:
    /// ```text
    /// <candidate>
    /// {"candidatePrompt": "...", "changes": ["..."], "predictedImpact": 4.5}
    /// </candidate>
    /// ```
    /// Falls back to a `REWRITTEN PROMPT:` section when no block is present.
    pub fn parse(output: &str) -> Result<Self, RewriteParseError> {
        debug!(output_len = output.len(), "Parsing optimizer candidate");

        if let Some(candidate) = Self::parse_candidate_block(output)? {
            return Ok(candidate);
        }

        Self::parse_rewritten_section(output)
    }

    fn parse_candidate_block(output: &str) -> Result<Option<Self>, RewriteParseError> {
        let start = output.find("<candidate>");
        let end = output.find("</candidate>");

        match (start, end) {
            (Some(start), Some(end)) if start < end => {
                let json_str = output[start + 11..end].trim();
                debug!(json = json_str, "Found candidate block");
                let candidate: CandidateRewrite = serde_json::from_str(json_str)?;
                if candidate.candidate_prompt.trim().is_empty() {
                    return Err(RewriteParseError::InvalidFormat(
                        "Empty candidate prompt".to_string(),
                    ));
                }
                Ok(Some(candidate))
            }
            (Some(_), Some(_)) => Err(RewriteParseError::InvalidFormat(
                "Malformed candidate block".to_string(),
            )),
            _ => Ok(None),
        }
    }

    fn parse_rewritten_section(output: &str) -> Result<Self, RewriteParseError> {
        let upper = output.to_uppercase();
        let marker = "REWRITTEN PROMPT:";

        if let Some(pos) = upper.find(marker) {
            let prompt = output[pos + marker.len()..].trim();
            if prompt.is_empty() {
                return Err(RewriteParseError::InvalidFormat(
                    "Empty rewritten prompt section".to_string(),
                ));
            }
            debug!("Parsed candidate via section marker");
            return Ok(CandidateRewrite {
                candidate_prompt: prompt.to_string(),
                changes: vec![],
                predicted_impact: 0.0,
            });
        }

        Err(RewriteParseError::NoCandidateFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate_block() {
        let output = r#"
Analysis complete. The prompt lacks a pricing guardrail.

<candidate>
{"candidatePrompt": "You are a careful assistant.", "changes": ["added guardrail"], "predictedImpact": 4.5}
</candidate>
"#;

        let candidate = CandidateRewrite::parse(output).unwrap();
        assert_eq!(candidate.candidate_prompt, "You are a careful assistant.");
        assert_eq!(candidate.changes.len(), 1);
        assert!((candidate.predicted_impact - 4.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_section_marker_fallback() {
        let output = "Here is my suggestion.\n\nRewritten prompt:\nBe concise and cite prices.";
        let candidate = CandidateRewrite::parse(output).unwrap();
        assert_eq!(candidate.candidate_prompt, "Be concise and cite prices.");
        assert!(candidate.changes.is_empty());
    }

    #[test]
    fn test_parse_no_candidate() {
        let output = "I could not think of any improvement.";
        let result = CandidateRewrite::parse(output);
        assert!(matches!(result, Err(RewriteParseError::NoCandidateFound)));
    }

    #[test]
    fn test_parse_empty_candidate_prompt_rejected() {
        let output = r#"<candidate>{"candidatePrompt": "  "}</candidate>"#;
        let result = CandidateRewrite::parse(output);
        assert!(matches!(result, Err(RewriteParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_malformed_json_is_error() {
        let output = "<candidate>{not json}</candidate>";
        let result = CandidateRewrite::parse(output);
        assert!(matches!(result, Err(RewriteParseError::JsonParseError(_))));
    }
}
