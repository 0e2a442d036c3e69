//! Configuration loading.
//!
//! Lookup order for the file:
//! 1. `--config` path
//! 2. `DISCUSSION_FEEDBACK_CONFIG`
//! 3. `./discussion-feedback.toml`, when present
//!
//! Every field has a default, so no file at all is a valid configuration.
//! Secrets come from the environment when set.

use crate::classifier::ClassifierThresholds;
use crate::pipeline::{PipelineSettings, StageBudget};
use crate::types::{FeedbackError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "DISCUSSION_FEEDBACK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "discussion-feedback.toml";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const MOODLE_TOKEN_ENV: &str = "MOODLE_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Per HTTP request.
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            api_key: None,
            timeout_seconds: 60,
            max_retries: 3,
            retry_delay_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodleConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for MoodleConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub generation: GenerationConfig,
    pub moodle: MoodleConfig,
    pub pipeline: PipelineSettings,
    pub classifier: ClassifierThresholds,
}

impl AppConfig {
    /// Resolve, read, overlay the environment and validate.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(cli_path, std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No configuration file; using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_path(cli_path: Option<&Path>, env_path: Option<String>) -> Option<PathBuf> {
        if let Some(path) = cli_path {
            return Some(path.to_path_buf());
        }
        if let Some(path) = env_path.filter(|p| !p.trim().is_empty()) {
            return Some(PathBuf::from(path));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FeedbackError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FeedbackError::Config(e.to_string()))
    }

    /// Overlay secrets from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.generation.api_key = Some(key);
        }
        if let Some(token) = lookup(MOODLE_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.moodle.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (stage, budget) in [
            ("individual", &self.pipeline.individual),
            ("aggregate", &self.pipeline.aggregate),
            ("merge", &self.pipeline.merge),
        ] {
            validate_budget(stage, budget)?;
        }
        if !(self.pipeline.call_timeout_seconds > 0.0) {
            return Err(FeedbackError::Config(
                "pipeline.call_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.pipeline.merge_sample_cap == 0 {
            return Err(FeedbackError::Config("pipeline.merge_sample_cap must be positive".to_string()));
        }
        if self.generation.timeout_seconds == 0 {
            return Err(FeedbackError::Config("generation.timeout_seconds must be positive".to_string()));
        }
        Ok(())
    }

    /// Contents of the configured sample standard, if any.
    pub fn read_sample_standard(&self) -> Result<Option<String>> {
        match &self.pipeline.sample_standard_path {
            Some(path) => std::fs::read_to_string(path).map(Some).map_err(|e| {
                FeedbackError::Config(format!("cannot read sample standard {}: {}", path.display(), e))
            }),
            None => Ok(None),
        }
    }
}

fn validate_budget(stage: &str, budget: &StageBudget) -> Result<()> {
    if budget.max_tokens == 0 {
        return Err(FeedbackError::Config(format!("pipeline.{}.max_tokens must be positive", stage)));
    }
    if !(0.0..=2.0).contains(&budget.temperature) {
        return Err(FeedbackError::Config(format!(
            "pipeline.{}.temperature {} outside [0, 2]",
            stage, budget.temperature
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [generation]
            model = "some/model"

            [pipeline]
            max_concurrency = 4

            [pipeline.merge]
            max_tokens = 3000
            temperature = 0.6

            [classifier]
            instructor_prompt_chars = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.model, "some/model");
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert_eq!(config.pipeline.merge.max_tokens, 3000);
        assert_eq!(config.pipeline.individual.max_tokens, 1500);
        assert_eq!(config.classifier.instructor_prompt_chars, 250);
        assert_eq!(config.classifier.min_content_chars, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_file_matches_defaults() {
        let example = AppConfig::from_toml_str(include_str!("../../discussion-feedback.example.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(example.pipeline.individual, defaults.pipeline.individual);
        assert_eq!(example.classifier, defaults.classifier);
        assert_eq!(example.generation.model, defaults.generation.model);
        assert!(example.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides_secrets() {
        let mut config = AppConfig::default();
        config.apply_overrides(|name| match name {
            API_KEY_ENV => Some("sk-test".to_string()),
            MOODLE_TOKEN_ENV => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.moodle.token, None);
    }

    #[test]
    fn test_validation_rejects_bad_budgets() {
        let mut config = AppConfig::default();
        config.pipeline.aggregate.temperature = 3.0;
        assert!(matches!(config.validate(), Err(FeedbackError::Config(_))));

        let mut config = AppConfig::default();
        config.pipeline.individual.max_tokens = 0;
        assert!(config.validate().is_err());

        assert!(AppConfig::from_toml_str("[pipeline]\nmax_concurrency = \"many\"").is_err());
    }

    #[test]
    fn test_path_resolution_order() {
        let cli = PathBuf::from("cli.toml");
        assert_eq!(
            AppConfig::resolve_path(Some(&cli), Some("env.toml".to_string())),
            Some(cli.clone())
        );
        assert_eq!(
            AppConfig::resolve_path(None, Some("env.toml".to_string())),
            Some(PathBuf::from("env.toml"))
        );
    }
}
