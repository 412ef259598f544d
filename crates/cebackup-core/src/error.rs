//! Error types for cebackup-core

use thiserror::Error;

/// Result type alias using cebackup-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code reserved for configuration errors.
pub const CONFIG_ERROR_EXIT_CODE: i32 = 2;

/// Configuration errors. Every variant aborts the run before archiving starts.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Unknown compression method
    #[error("Unknown compression: {name}. Valid methods: gzip, bzip2, xz")]
    InvalidCompression { name: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an invalid compression error
    pub fn invalid_compression(name: impl Into<String>) -> Self {
        Self::InvalidCompression { name: name.into() }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        CONFIG_ERROR_EXIT_CODE
    }
}
