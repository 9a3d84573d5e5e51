//! Error handling for the spikemap CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Image builder error
    #[error("Build error: {0}")]
    Build(#[from] spikemap_build::BuildError),

    /// Image layer error
    #[error("Image error: {0}")]
    Image(#[from] spikemap_image::ImageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network model file error
    #[error("Model error: {0}")]
    Model(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Serialization error: {0}")]
    Serde(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Invalid command arguments
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Missing required file or resource
    #[error("Missing resource: {0}")]
    MissingResource(String),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    /// Create a missing resource error
    pub fn missing_resource(msg: impl Into<String>) -> Self {
        Self::MissingResource(msg.into())
    }
}
