use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use promptloops_llm::{IssueSeverity, TranscriptAnalysis};

/// A structured failure-diagnosis item derived from an epoch's analyses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingSuggestion {
    /// Issue category this suggestion addresses
    pub issue: String,
    /// Replacement prompt to apply verbatim, when one can be composed
    pub suggested_prompt: Option<String>,
    /// Confidence 0.0 - 1.0, driven by how often the issue recurred
    pub confidence: f64,
    pub severity: IssueSeverity,
    /// How many sessions exhibited the issue
    pub occurrences: usize,
}

fn severity_weight(severity: IssueSeverity) -> f64 {
    match severity {
        IssueSeverity::Low => 0.25,
        IssueSeverity::Medium => 0.5,
        IssueSeverity::High => 0.75,
        IssueSeverity::Critical => 1.0,
    }
}

/// Rank issue categories across an epoch's session analyses.
///
/// Confidence scales with how widespread an issue is, weighted by its worst
/// observed severity. When an issue carries a suggested fix, the fix is
/// appended to the current prompt as a directive block so the result can be
/// applied verbatim as a fallback candidate.
pub fn derive_suggestions(
    current_prompt: &str,
    analyses: &[TranscriptAnalysis],
) -> Vec<HealingSuggestion> {
    struct CategoryAcc {
        occurrences: usize,
        worst: IssueSeverity,
        fix: Option<String>,
    }

    let total = analyses.len().max(1);
    let mut categories: BTreeMap<&str, CategoryAcc> = BTreeMap::new();

    for analysis in analyses {
        for issue in &analysis.issues {
            let acc = categories
                .entry(issue.category.as_str())
                .or_insert(CategoryAcc {
                    occurrences: 0,
                    worst: issue.severity,
                    fix: None,
                });
            acc.occurrences += 1;
            if issue.severity > acc.worst {
                acc.worst = issue.severity;
            }
            if acc.fix.is_none() {
                acc.fix = issue.suggested_fix.clone();
            }
        }
    }

    let mut suggestions: Vec<HealingSuggestion> = categories
        .into_iter()
        .map(|(category, acc)| {
            let spread = acc.occurrences as f64 / total as f64;
            let confidence = (spread * severity_weight(acc.worst)).min(1.0);
            let suggested_prompt = acc.fix.as_ref().map(|fix| {
                format!("{}\n\n## Correction for {}\n{}", current_prompt, category, fix)
            });
            HealingSuggestion {
                issue: category.to_string(),
                suggested_prompt,
                confidence,
                severity: acc.worst,
                occurrences: acc.occurrences,
            }
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.severity.cmp(&a.severity))
    });
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptloops_llm::TranscriptIssue;

    fn analysis(issues: Vec<TranscriptIssue>) -> TranscriptAnalysis {
        TranscriptAnalysis {
            accuracy: 70.0,
            issues,
        }
    }

    fn issue(category: &str, severity: IssueSeverity, fix: Option<&str>) -> TranscriptIssue {
        TranscriptIssue {
            category: category.to_string(),
            severity,
            description: format!("{} observed", category),
            suggested_fix: fix.map(String::from),
        }
    }

    #[test]
    fn test_widespread_issues_rank_first() {
        let analyses = vec![
            analysis(vec![
                issue("hallucination", IssueSeverity::High, None),
                issue("tone", IssueSeverity::Low, None),
            ]),
            analysis(vec![issue("hallucination", IssueSeverity::High, None)]),
            analysis(vec![issue("hallucination", IssueSeverity::High, None)]),
        ];

        let suggestions = derive_suggestions("base prompt", &analyses);
        assert_eq!(suggestions[0].issue, "hallucination");
        assert_eq!(suggestions[0].occurrences, 3);
        assert!(suggestions[0].confidence > suggestions[1].confidence);
    }

    #[test]
    fn test_suggested_prompt_composed_from_fix() {
        let analyses = vec![analysis(vec![issue(
            "pricing",
            IssueSeverity::Critical,
            Some("Always quote prices from the published price list."),
        )])];

        let suggestions = derive_suggestions("You are a sales assistant.", &analyses);
        let prompt = suggestions[0].suggested_prompt.as_ref().unwrap();
        assert!(prompt.starts_with("You are a sales assistant."));
        assert!(prompt.contains("## Correction for pricing"));
        assert!(prompt.contains("published price list"));
    }

    #[test]
    fn test_no_fix_means_no_suggested_prompt() {
        let analyses = vec![analysis(vec![issue("tone", IssueSeverity::Medium, None)])];
        let suggestions = derive_suggestions("base", &analyses);
        assert!(suggestions[0].suggested_prompt.is_none());
    }

    #[test]
    fn test_empty_analyses_yield_no_suggestions() {
        let suggestions = derive_suggestions("base", &[]);
        assert!(suggestions.is_empty());
    }
}
