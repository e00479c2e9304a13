use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides `llm.api_key`.
pub const API_KEY_ENV: &str = "AGENTIC_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Language-model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name ("ollama" or "opencode").
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default model for chats and newly scheduled tasks.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen3:30b-a3b".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

/// Limits applied to the local tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// When set, only commands starting with one of these are allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,
    /// Commands rejected whenever they appear in the command line.
    #[serde(default = "default_forbidden_commands")]
    pub forbidden_commands: Vec<String>,
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
}

fn default_forbidden_commands() -> Vec<String> {
    vec![
        "rm -rf /".to_string(),
        ":(){:|:&};:".to_string(),
        "mkfs".to_string(),
        "> /dev/sda".to_string(),
        "dd if=/dev/zero of=".to_string(),
    ]
}

fn default_shell_timeout() -> u64 {
    30
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            allowed_commands: None,
            forbidden_commands: default_forbidden_commands(),
            shell_timeout_secs: default_shell_timeout(),
        }
    }
}

/// Which facility runs one-shot tasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OneShotBackend {
    /// Use `at` when it is installed, otherwise the poll daemon.
    #[default]
    Auto,
    /// Always submit one-shot tasks to `at`.
    At,
    /// Always serve one-shot tasks from the poll daemon.
    Poll,
}

/// Task scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Task store file. Defaults to `~/.agentic/scheduled_tasks.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub backend: OneShotBackend,
    /// A `running` task older than this is considered crashed and may be
    /// started again.
    #[serde(default = "default_running_stale")]
    pub running_stale_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_running_stale() -> u64 {
    3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_file: None,
            poll_interval_secs: default_poll_interval(),
            backend: OneShotBackend::default(),
            running_stale_secs: default_running_stale(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve the task store path, falling back to the config directory.
    pub fn data_file_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_file {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("scheduled_tasks.json")),
        }
    }
}

/// Top-level agentic configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgenticConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Resolve the agentic config directory (~/.agentic/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".agentic"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.agentic/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<AgenticConfig, ConfigError> {
    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<AgenticConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        json5::from_str::<AgenticConfig>(&content)?
    } else {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        AgenticConfig::default()
    };

    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.is_empty() {
            config.llm.api_key = Some(key);
        }
    }
    Ok(config)
}
