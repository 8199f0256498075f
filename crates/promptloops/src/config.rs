//! Project configuration file support.
//!
//! Loads configuration from `promptloops.toml` in the working directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use promptloops_core::EvaluationConfig;

/// The config file name
pub const CONFIG_FILE_NAME: &str = "promptloops.toml";

/// Project-level configuration loaded from `promptloops.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Language service backend name (default: canned)
    pub backend: Option<String>,
    /// Store location override
    pub db_path: Option<PathBuf>,
    /// Evaluation defaults, overridable per-run from the command line
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl ProjectConfig {
    /// Load configuration from the working directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(working_dir: &Path) -> Result<Option<Self>> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProjectConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_loads_evaluation_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
backend = "canned"

[evaluation]
max_epochs = 3
tests_per_epoch = 4
personas = ["curious", "impatient"]
target_metric = "conversion"
"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.backend.as_deref(), Some("canned"));
        assert_eq!(config.evaluation.max_epochs, 3);
        assert_eq!(config.evaluation.personas.len(), 2);
        // Fields absent from the file keep their defaults
        assert_eq!(config.evaluation.concurrency, 4);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "unknown_key = 1\n").unwrap();
        assert!(ProjectConfig::load(dir.path()).is_err());
    }
}
