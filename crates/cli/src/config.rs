use std::path::{Path, PathBuf};
use std::time::Duration;

use proto::{ConfigurationError, DEFAULT_MODEL_ID, MAX_HISTORY_MESSAGES, find_model};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 120;

/// Returns `~/.zenchat`, the directory for config, preferences and logs.
pub fn state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".zenchat")
}

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// OpenAI backend settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Session behaviour.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Telemetry switch.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// OpenAI backend config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; `OPENAI_API_KEY` overrides.
    #[serde(default)]
    pub api_key: String,
    /// Optional OpenAI-compatible base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Limit for opening a stream, in seconds. 0 disables.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Chat session config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Model used when no stored preference exists.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Max wait between two stream increments, in seconds. 0 disables.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    /// How many prior turns are sent with each request.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            stream_idle_timeout_secs: DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            max_history_messages: MAX_HISTORY_MESSAGES,
        }
    }
}

/// Telemetry config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// When false, events are discarded.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_stream_idle_timeout_secs() -> u64 {
    DEFAULT_STREAM_IDLE_TIMEOUT_SECS
}

fn default_max_history_messages() -> usize {
    MAX_HISTORY_MESSAGES
}

fn default_model() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("zenchat.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home_config = state_dir().join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| ConfigurationError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.openai.api_key = key;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.openai.base_url = Some(base_url);
        }
        if let Ok(model) = std::env::var("ZENCHAT_MODEL") {
            config.chat.default_model = model;
        }

        debug!(
            model = %config.chat.default_model,
            base_url = ?config.openai.base_url,
            has_api_key = !config.openai.api_key.is_empty(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Rejects values the session cannot run with.
    ///
    /// A missing API key is not checked here; it surfaces on submit.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if find_model(&self.chat.default_model).is_none() {
            return Err(ConfigurationError::InvalidValue {
                field: "chat.default_model".to_string(),
                reason: format!("unknown model '{}'", self.chat.default_model),
            });
        }
        if self.chat.max_history_messages == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "chat.max_history_messages".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        seconds(self.openai.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        seconds(self.chat.stream_idle_timeout_secs)
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
