//! Configuration module

pub mod settings;

pub use settings::{LoadPolicy, LoggingConfig, ModelConfig, ServerConfig, Settings};
