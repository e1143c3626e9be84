//! Application settings and configuration management

use crate::error::{AppError, Result};
use crate::model::Device;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for multipart upload bodies
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// When the model gets loaded relative to request handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Load in the background right after the listener is bound; requests
    /// arriving before readiness are rejected as not ready.
    Startup,
    /// Load synchronously on the first request; concurrent callers wait.
    OnFirstRequest,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self::Startup
    }
}

/// Model and inference runtime configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    #[serde(default = "default_primary_id")]
    pub primary_id: String,
    #[serde(default)]
    pub fallback_id: Option<String>,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// External VAE repository loaded alongside the pipeline
    #[serde(default)]
    pub vae_id: Option<String>,
    #[serde(default)]
    pub device: Device,
    /// Token for private or gated model repositories
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_hub_endpoint")]
    pub hub_endpoint: String,
    #[serde(default = "default_runtime_url")]
    pub runtime_url: String,
    #[serde(default)]
    pub load_policy: LoadPolicy,
    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,
    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_inference")]
    pub max_concurrent_inference: usize,
}

fn default_primary_id() -> String {
    "yisol/IDM-VTON".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_runtime_url() -> String {
    "http://127.0.0.1:7860".to_string()
}

fn default_load_timeout() -> u64 {
    1800
}

fn default_inference_timeout() -> u64 {
    300
}

fn default_max_concurrent_inference() -> usize {
    1
}

impl ModelConfig {
    /// The fallback identifier, if one is usable.
    ///
    /// Empty values and values equal to the primary identifier disable the
    /// fallback path.
    pub fn fallback_identifier(&self) -> Option<&str> {
        self.fallback_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != self.primary_id.trim())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary_id: default_primary_id(),
            fallback_id: None,
            revision: default_revision(),
            vae_id: None,
            device: Device::default(),
            auth_token: None,
            hub_endpoint: default_hub_endpoint(),
            runtime_url: default_runtime_url(),
            load_policy: LoadPolicy::default(),
            load_timeout_secs: default_load_timeout(),
            inference_timeout_secs: default_inference_timeout(),
            max_concurrent_inference: default_max_concurrent_inference(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("model.primary_id", default_primary_id())?
            .set_default("model.device", "gpu")?
            .set_default("model.load_policy", "startup")?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (e.g. TRYON__MODEL__FALLBACK_ID)
            .add_source(
                Environment::with_prefix("TRYON")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;

        if settings.model.auth_token.is_none() {
            settings.model.auth_token = std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty());
        }

        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Server port cannot be 0".to_string(),
            )));
        }

        if self.model.primary_id.trim().is_empty() {
            return Err(AppError::Config(config::ConfigError::Message(
                "model.primary_id cannot be empty".to_string(),
            )));
        }

        if self.model.max_concurrent_inference == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "model.max_concurrent_inference must be at least 1".to_string(),
            )));
        }

        if self.model.load_timeout_secs == 0 || self.model.inference_timeout_secs == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "model timeouts must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
