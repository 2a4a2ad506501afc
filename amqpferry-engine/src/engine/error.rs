//! Engine-level error taxonomy.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::config::ConfigError;
use crate::control::ControlError;
use crate::dirq::DirqError;
use crate::transform::TransformError;
use crate::window::WindowError;

/// Runtime errors surfaced by the transfer engine.
///
/// Fatality drives the shutdown decision: everything except a transform
/// failure is fatal once the pipeline is running, with one exception
/// handled by the controller itself (a transport error before the first
/// receipt earns a single reconnect attempt). Acks are never emitted for
/// messages whose outcome an error left unknown.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected configuration; the engine never started.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// PID-file control interface failure at startup.
    #[error("control error: {0}")]
    Control(#[from] ControlError),

    /// Network I/O failure on a broker endpoint.
    #[error("transport error ({context}): {source}")]
    Transport {
        /// What the engine was doing.
        context: String,
        /// Underlying wire-library error.
        #[source]
        source: lapin::Error,
    },

    /// Endpoint connection did not complete within `timeout-connect`.
    #[error("connect timeout after {timeout:?} for {endpoint}")]
    ConnectTimeout {
        /// Endpoint identity (no credentials).
        endpoint: String,
        /// The configured bound.
        timeout: Duration,
    },

    /// The broker violated the AMQP contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local disk I/O failure on a queue endpoint.
    #[error("storage error: {0}")]
    Storage(#[from] DirqError),

    /// The user transform failed while starting.
    #[error("transform failed to start: {0}")]
    TransformStart(#[source] TransformError),

    /// Window bookkeeping was violated (engine bug surface, always fatal).
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// A sink token reported that the send did not complete.
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl EngineError {
    /// Transport error helper with context.
    pub fn transport(context: impl Into<String>, source: lapin::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// True when the error class is recoverable by the controller's
    /// retry-once policy (transport only; everything else is fatal).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: EngineError = ConfigError::MissingOption("subscribe").into();
        assert!(err.to_string().contains("subscribe"));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_classification() {
        let err = EngineError::transport("consume", lapin::Error::ChannelsLimitReached);
        assert!(err.is_transport());
        assert!(err.to_string().contains("consume"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
    }
}
