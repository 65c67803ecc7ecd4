//! # Demo Error Types

use std::path::PathBuf;

use framequeue_core::PipelineError;
use thiserror::Error;

/// Errors that can occur while loading the demo configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that end a demo run.
#[derive(Error, Debug)]
pub enum DemoError {
    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A frame thread could not be started or crashed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
