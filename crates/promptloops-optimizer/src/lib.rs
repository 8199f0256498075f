//! Failure analysis and prompt rewriting.
//!
//! Turns an epoch's transcript analyses into ranked healing suggestions,
//! and drives the optimization collaborator with deterministic fallbacks
//! when it fails.

mod prompts;
mod rewrite;
mod rewriter;
mod suggestions;

pub use prompts::OptimizerPrompts;
pub use rewrite::{CandidateRewrite, RewriteParseError};
pub use rewriter::{Candidate, CandidateSource, PromptRewriter, RewriteInput};
pub use suggestions::{derive_suggestions, HealingSuggestion};
