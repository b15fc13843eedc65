use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NodeflowError, Result};
use crate::types::Pricing;

/// Top-level Nodeflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    /// Price overrides keyed by `"<provider>/<model_id>"`.
    #[serde(default)]
    pub pricing: HashMap<String, Pricing>,
    #[serde(default)]
    pub credits: CreditsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// How long a suspended workflow waits for an async run.
    #[serde(default = "default_async_timeout")]
    pub async_timeout_secs: u64,
    /// Timeout applied to tools that don't declare their own.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Finished runs kept for replay before the oldest are dropped.
    #[serde(default = "default_retain_finished")]
    pub retain_finished_runs: usize,
    /// JSONL run logging configuration.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            async_timeout_secs: default_async_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            event_capacity: default_event_capacity(),
            retain_finished_runs: default_retain_finished(),
            log: None,
        }
    }
}

fn default_max_steps() -> usize { 10 }
fn default_async_timeout() -> u64 { 1800 }
fn default_tool_timeout() -> u64 { 30 }
fn default_event_capacity() -> usize { 256 }
fn default_retain_finished() -> usize { 1024 }

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ./logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// 1 = run summary only, 2 = per-step, 3 = per-tool-call (default: 2).
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            level: 2,
        }
    }
}

impl LogConfig {
    /// Resolve the log directory (expand ~).
    pub fn dir(&self) -> PathBuf {
        let dir = self.log_dir.as_deref().unwrap_or("logs");
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(dir)
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }

    /// Key used by the pricing table.
    pub fn pricing_key(&self) -> String {
        format!("{}/{}", self.provider, self.model_id)
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for provider requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Conversion from dollar cost to credits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CreditsConfig {
    #[serde(default = "default_credits_per_dollar")]
    pub credits_per_dollar: f64,
    /// Floor charged for every run, so empty exchanges are still metered.
    #[serde(default = "default_minimum_credits")]
    pub minimum: u64,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            credits_per_dollar: default_credits_per_dollar(),
            minimum: default_minimum_credits(),
        }
    }
}

fn default_credits_per_dollar() -> f64 { 1000.0 }
fn default_minimum_credits() -> u64 { 1 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| NodeflowError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| NodeflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.max_steps == 0 {
            return Err(NodeflowError::Config("agent.max_steps must be at least 1".into()));
        }
        if self.agent.event_capacity == 0 {
            return Err(NodeflowError::Config(
                "agent.event_capacity must be at least 1".into(),
            ));
        }
        if self.credits.minimum == 0 {
            return Err(NodeflowError::Config("credits.minimum must be at least 1".into()));
        }
        if !(self.credits.credits_per_dollar.is_finite() && self.credits.credits_per_dollar > 0.0) {
            return Err(NodeflowError::Config(
                "credits.credits_per_dollar must be positive".into(),
            ));
        }
        for (key, price) in &self.pricing {
            if price.input_cost_per_million < 0.0 || price.output_cost_per_million < 0.0 {
                return Err(NodeflowError::Config(format!(
                    "pricing for '{}' must not be negative",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Configured price override for a model, if any.
    pub fn pricing_override(&self, model: &ModelConfig) -> Option<Pricing> {
        self.pricing.get(&model.pricing_key()).copied()
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
