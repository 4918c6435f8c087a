//! Configuration settings for Dirigent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub compute: ComputeSettings,
    pub llm: LlmSettings,
    pub usage: UsageSettings,
    pub retention: RetentionSettings,
}


/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary files.
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.dirigent".to_string(),
            temp_dir: "/tmp/dirigent".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Externally reachable base URL registered as the webhook callback
    /// address with compute providers.
    pub callback_base_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            callback_base_url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Job store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the SQLite database.
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.dirigent/jobs.db".to_string(),
        }
    }
}

/// One compute endpoint in the fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeEndpoint {
    /// Short name used in logs and diagnostics.
    pub name: String,
    /// Base URL of the endpoint.
    pub url: String,
}

/// GPU compute provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSettings {
    /// Endpoints in preference order. The first healthy endpoint wins; the
    /// last one is always attempted even when health looks bad, because a
    /// provider showing zero workers may still autoscale on submission.
    pub endpoints: Vec<ComputeEndpoint>,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    /// Object store URL base for media uploads.
    pub upload_base_url: String,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            endpoints: vec![
                ComputeEndpoint {
                    name: "warm".to_string(),
                    url: "https://api.runpod.ai/v2/warm-endpoint".to_string(),
                },
                ComputeEndpoint {
                    name: "cold".to_string(),
                    url: "https://api.runpod.ai/v2/cold-endpoint".to_string(),
                },
            ],
            api_key_env: "COMPUTE_API_KEY".to_string(),
            upload_base_url: "https://media.example.com/uploads".to_string(),
        }
    }
}

impl ComputeSettings {
    /// Read the provider API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Chat completion model.
    pub model: String,
    /// Maximum simultaneous in-flight LLM calls.
    pub max_concurrent_jobs: usize,
    /// Per-request timeout in seconds. A stuck call occupies a concurrency
    /// slot until this elapses.
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_concurrent_jobs: 24,
            request_timeout_secs: 300,
        }
    }
}

/// Usage accounting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    /// Usage units deducted per 1000 characters of generated content.
    pub units_per_1k_chars: i64,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            units_per_1k_chars: 1,
        }
    }
}

/// Retention and monitoring thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// How long correlation mappings are retained before cleanup.
    pub correlation_retention_days: i64,
    /// Age after which a non-terminal job is reported as stalled.
    pub stalled_after_minutes: i64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            correlation_retention_days: 30,
            stalled_after_minutes: 10,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::DirigentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dirigent")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }

    /// Webhook callback URL registered with compute providers.
    pub fn callback_url(&self) -> String {
        format!(
            "{}/webhooks/compute",
            self.server.callback_base_url.trim_end_matches('/')
        )
    }
}
