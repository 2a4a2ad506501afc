//! CLI error type and exit-code mapping.

// Layer 1: Standard library imports
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use amqpferry_engine::control::ControlError;
use amqpferry_engine::{ConfigError, EngineError};

/// Exit code for configuration and validation errors.
pub const EXIT_CONFIG: i32 = 1;

/// Exit code for fatal runtime errors after pipeline start.
pub const EXIT_RUNTIME: i32 = 2;

/// Front-end errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Option parsing or validation failed.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The config file could not be read or parsed.
    #[error("config file {path}: {reason}")]
    ConfigFile {
        /// File the user named.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// PID-file control verb failed.
    #[error("{0}")]
    Control(#[from] ControlError),

    /// The engine reported a runtime failure.
    #[error("{0}")]
    Engine(EngineError),
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Config(config) => Self::Config(config),
            EngineError::Control(control) => Self::Control(control),
            other => Self::Engine(other),
        }
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::ConfigFile { .. } | Self::Control(_) => EXIT_CONFIG,
            Self::Engine(_) => EXIT_RUNTIME,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
