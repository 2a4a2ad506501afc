//! Canonical destination addressing for broker endpoints.
//!
//! Destination strings use a path-style prefix to name the broker-side
//! entity: `/queue/name`, `/topic/name` or `/exchange/name`. A string
//! without a recognized prefix is rejected.

// Layer 1: Standard library imports
use std::fmt;
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of broker entity a destination names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// A named queue, consumed or published through the default exchange.
    Queue,
    /// A topic routing key on the broker's topic exchange.
    Topic,
    /// A named exchange.
    Exchange,
}

impl DestinationKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Queue => "/queue/",
            Self::Topic => "/topic/",
            Self::Exchange => "/exchange/",
        }
    }
}

/// Error returned for destination strings without a recognized prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("destination {input:?} lacks a /queue/, /topic/ or /exchange/ prefix")]
pub struct DestinationParseError {
    /// The rejected input string.
    pub input: String,
}

/// A canonicalized destination: `{kind, name}`.
///
/// # Examples
///
/// ```rust
/// use amqpferry_engine::message::{Destination, DestinationKind};
///
/// let dest: Destination = "/queue/orders".parse().unwrap();
/// assert_eq!(dest.kind, DestinationKind::Queue);
/// assert_eq!(dest.name, "orders");
/// assert_eq!(dest.to_string(), "/queue/orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Broker entity kind.
    pub kind: DestinationKind,
    /// Entity name (queue name, topic key or exchange name).
    pub name: String,
}

impl Destination {
    /// Construct a queue destination.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Queue,
            name: name.into(),
        }
    }

    /// Construct a topic destination.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Topic,
            name: name.into(),
        }
    }

    /// Construct an exchange destination.
    pub fn exchange(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Exchange,
            name: name.into(),
        }
    }
}

impl FromStr for Destination {
    type Err = DestinationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        for kind in [
            DestinationKind::Queue,
            DestinationKind::Topic,
            DestinationKind::Exchange,
        ] {
            if let Some(name) = input.strip_prefix(kind.prefix()) {
                if name.is_empty() {
                    break;
                }
                return Ok(Self {
                    kind,
                    name: name.to_string(),
                });
            }
        }
        Err(DestinationParseError {
            input: input.to_string(),
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.name)
    }
}
