//! TOML configuration file.
//!
//! The file mirrors the command-line option names; command-line flags
//! override file values. Queue and subscribe values are duck-typed: a
//! bare string or a structured table both normalize to the same shape.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// Layer 2: Third-party crate imports
use serde::Deserialize;

// Layer 3: Internal module imports
use crate::error::{CliError, Result};
use amqpferry_engine::config::{QueueEndpoint, Subscription};
use amqpferry_engine::ConfigError;

/// Duck-typed queue endpoint value: `"path=…[,type=…]"` or `{ path, type }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueueValue {
    Str(String),
    Table {
        path: String,
        #[serde(rename = "type")]
        kind: Option<String>,
    },
}

impl QueueValue {
    /// Normalize to the engine's structured form.
    pub fn normalize(&self) -> std::result::Result<QueueEndpoint, ConfigError> {
        match self {
            Self::Str(text) => text.parse(),
            Self::Table { path, kind } => QueueEndpoint::new(path, kind.as_deref()),
        }
    }
}

/// Duck-typed subscription value: `"destination=…[,k=v…]"` or a table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubscribeValue {
    Str(String),
    Table {
        destination: String,
        #[serde(flatten)]
        options: BTreeMap<String, String>,
    },
}

impl SubscribeValue {
    /// Normalize to the engine's structured form.
    pub fn normalize(&self) -> std::result::Result<Subscription, ConfigError> {
        match self {
            Self::Str(text) => text.parse(),
            Self::Table {
                destination,
                options,
            } => Ok(Subscription::new(destination.parse()?, options.clone())),
        }
    }
}

/// Parsed config file; every field optional so flags can fill the gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub incoming_broker_uri: Option<String>,
    pub incoming_broker_auth: Option<String>,
    pub incoming_queue: Option<QueueValue>,
    pub outgoing_broker_uri: Option<String>,
    pub outgoing_broker_auth: Option<String>,
    pub outgoing_queue: Option<QueueValue>,
    pub subscribe: Option<Vec<SubscribeValue>>,
    pub prefetch: Option<u16>,
    pub window: Option<usize>,
    pub reliable: Option<bool>,
    pub count: Option<u64>,
    pub duration: Option<u64>,
    pub timeout_inactivity: Option<u64>,
    pub timeout_connect: Option<u64>,
    pub timeout_linger: Option<u64>,
    pub lazy: Option<bool>,
    #[serde(rename = "loop")]
    pub loop_rescan: Option<bool>,
    pub remove: Option<bool>,
    pub statistics: Option<bool>,
    pub callback_name: Option<String>,
    pub callback_data: Option<Vec<String>>,
    pub pidfile: Option<PathBuf>,
}

impl FileConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| CliError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&body).map_err(|e| CliError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file() {
        let file: FileConfig = toml::from_str(
            r#"
            incoming-queue = "/var/spool/in"
            outgoing-broker-uri = "amqp://localhost"
            subscribe = ["/queue/x"]
            "#,
        )
        .unwrap();
        assert!(file.incoming_queue.is_some());
        assert_eq!(
            file.outgoing_broker_uri.as_deref(),
            Some("amqp://localhost")
        );
    }

    #[test]
    fn test_queue_value_forms_normalize_identically() {
        let as_string = QueueValue::Str("path=/tmp/q, type=simple".to_string());
        let as_table: QueueValue = toml::from_str::<FileConfig>(
            r#"
            incoming-queue = { path = "/tmp/q", type = "simple" }
            "#,
        )
        .unwrap()
        .incoming_queue
        .unwrap();

        assert_eq!(
            as_string.normalize().unwrap(),
            as_table.normalize().unwrap()
        );
    }

    #[test]
    fn test_subscribe_value_forms_normalize_identically() {
        let as_string = SubscribeValue::Str("destination=/queue/q, ack=client".to_string());
        let file: FileConfig = toml::from_str(
            r#"
            subscribe = [{ destination = "/queue/q", ack = "client" }]
            "#,
        )
        .unwrap();
        let as_table = &file.subscribe.unwrap()[0];

        assert_eq!(
            as_string.normalize().unwrap(),
            as_table.normalize().unwrap()
        );
    }

    #[test]
    fn test_loop_key_spelling() {
        let file: FileConfig = toml::from_str("loop = true").unwrap();
        assert_eq!(file.loop_rescan, Some(true));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<FileConfig>("heart-beat = 30").is_err());
    }

    #[test]
    fn test_bad_destination_in_table_is_config_error() {
        let value = SubscribeValue::Table {
            destination: "no-prefix".to_string(),
            options: BTreeMap::new(),
        };
        assert!(value.normalize().is_err());
    }
}
