//! Configuration error type.

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::message::DestinationParseError;

/// Errors rejected at the configuration boundary, before the engine starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Endpoint URI could not be parsed.
    #[error("invalid broker URI {uri:?}: {reason}")]
    InvalidUri {
        /// The rejected URI (credentials, if any, are not echoed back).
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Destination string lacked a recognized prefix.
    #[error(transparent)]
    Destination(#[from] DestinationParseError),

    /// An option value could not be interpreted.
    #[error("invalid value for option {option:?}: {reason}")]
    InvalidOption {
        /// Option name as the user spells it.
        option: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A required option is absent.
    #[error("missing required option {0:?}")]
    MissingOption(&'static str),

    /// Two options cannot be combined.
    #[error("conflicting options: {0}")]
    ConflictingOptions(&'static str),

    /// The named transform is not registered.
    #[error("unknown transform {0:?}")]
    UnknownTransform(String),
}
