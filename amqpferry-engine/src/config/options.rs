//! Engine option set with defaults and validation.

// Layer 1: Standard library imports
use std::path::PathBuf;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use super::endpoint::{EndpointConfig, Subscription};
use super::error::ConfigError;

/// Default window size (in-flight entry cap).
pub const DEFAULT_WINDOW: usize = 32;

/// Default broker-side prefetch when neither `prefetch` nor the
/// reliable+count derivation applies.
pub const DEFAULT_PREFETCH: u16 = 64;

/// Default bound on endpoint connection establishment.
pub const DEFAULT_TIMEOUT_CONNECT: Duration = Duration::from_secs(10);

/// Default bound on shutdown draining and flushing.
pub const DEFAULT_TIMEOUT_LINGER: Duration = Duration::from_secs(15);

/// Cap applied to the prefetch derived from `count` in reliable mode.
const RELIABLE_COUNT_PREFETCH_CAP: u64 = 100;

/// Transform selection: registry name plus `data` strings handed to its
/// `start` hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Registered transform name.
    pub name: String,
    /// Data strings passed to the transform's `start` hook.
    #[serde(default)]
    pub data: Vec<String>,
}

/// Validated engine configuration.
///
/// Construct with [`EngineConfig::new`] (which applies the documented
/// defaults) and call [`validate`](EngineConfig::validate) after filling in
/// the optional fields; the engine front-end must not run an unvalidated
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Incoming endpoint (message source).
    pub incoming: EndpointConfig,
    /// Outgoing endpoint (message sink).
    pub outgoing: EndpointConfig,
    /// Broker subscriptions (broker source only).
    pub subscriptions: Vec<Subscription>,
    /// Optional transform selection.
    pub callback: Option<CallbackConfig>,
    /// Explicit broker-side prefetch.
    pub prefetch: Option<u16>,
    /// Window size (in-flight cap).
    pub window: usize,
    /// Client-side acks on the source and publisher confirms on the sink.
    pub reliable: bool,
    /// Stop after this many acknowledged messages.
    pub count: Option<u64>,
    /// Stop after this much wall-clock time.
    pub duration: Option<Duration>,
    /// Stop after this long without a receipt.
    pub timeout_inactivity: Option<Duration>,
    /// Bound on endpoint connection establishment.
    pub timeout_connect: Duration,
    /// Bound on shutdown draining and flushing.
    pub timeout_linger: Duration,
    /// Defer sink startup until the first successful receive.
    pub lazy: bool,
    /// Queue source: rescan from the beginning on exhaustion.
    pub loop_rescan: bool,
    /// Queue source: delete entries on acknowledgment.
    pub remove: bool,
    /// Emit a statistics report at shutdown.
    pub statistics: bool,
    /// PID file path (control interface).
    pub pidfile: Option<PathBuf>,
}

impl EngineConfig {
    /// Configuration with the documented defaults for everything beyond the
    /// two endpoints.
    pub fn new(incoming: EndpointConfig, outgoing: EndpointConfig) -> Self {
        Self {
            incoming,
            outgoing,
            subscriptions: Vec::new(),
            callback: None,
            prefetch: None,
            window: DEFAULT_WINDOW,
            reliable: false,
            count: None,
            duration: None,
            timeout_inactivity: None,
            timeout_connect: DEFAULT_TIMEOUT_CONNECT,
            timeout_linger: DEFAULT_TIMEOUT_LINGER,
            lazy: false,
            loop_rescan: false,
            remove: false,
            statistics: false,
            pidfile: None,
        }
    }

    /// Enforce the option compatibility rules.
    ///
    /// * `loop` and `remove` require a queue source.
    /// * `prefetch` and `subscribe` require a broker source.
    /// * A broker source requires at least one subscription.
    /// * `window` and `count` must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.incoming.is_queue() {
            if self.prefetch.is_some() {
                return Err(ConfigError::ConflictingOptions(
                    "prefetch requires a broker source",
                ));
            }
            if !self.subscriptions.is_empty() {
                return Err(ConfigError::ConflictingOptions(
                    "subscribe requires a broker source",
                ));
            }
        } else {
            if self.loop_rescan {
                return Err(ConfigError::ConflictingOptions(
                    "loop requires a queue source",
                ));
            }
            if self.remove {
                return Err(ConfigError::ConflictingOptions(
                    "remove requires a queue source",
                ));
            }
            if self.subscriptions.is_empty() {
                return Err(ConfigError::MissingOption("subscribe"));
            }
        }
        if self.window == 0 {
            return Err(ConfigError::InvalidOption {
                option: "window",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.count == Some(0) {
            return Err(ConfigError::InvalidOption {
                option: "count",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Broker-side prefetch to apply: an explicit `prefetch` wins; in
    /// reliable mode with a `count`, credit is capped at `min(count, 100)`
    /// so the broker cannot hand out more than the run will consume.
    pub fn effective_prefetch(&self) -> u16 {
        if let Some(explicit) = self.prefetch {
            return explicit;
        }
        match (self.reliable, self.count) {
            (true, Some(count)) => count.min(RELIABLE_COUNT_PREFETCH_CAP) as u16,
            _ => DEFAULT_PREFETCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::endpoint::{BrokerEndpoint, QueueEndpoint};

    fn broker() -> EndpointConfig {
        EndpointConfig::Broker(BrokerEndpoint {
            uri: "amqp://localhost".parse().unwrap(),
            auth: None,
        })
    }

    fn queue(path: &str) -> EndpointConfig {
        EndpointConfig::Queue(QueueEndpoint {
            path: path.into(),
        })
    }

    fn broker_config_with_subscription() -> EngineConfig {
        let mut config = EngineConfig::new(broker(), queue("/tmp/out"));
        config.subscriptions.push("/queue/in".parse().unwrap());
        config
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new(queue("/tmp/in"), queue("/tmp/out"));
        assert_eq!(config.window, DEFAULT_WINDOW);
        assert_eq!(config.timeout_connect, DEFAULT_TIMEOUT_CONNECT);
        assert_eq!(config.timeout_linger, DEFAULT_TIMEOUT_LINGER);
        assert!(!config.reliable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broker_source_requires_subscription() {
        let config = EngineConfig::new(broker(), queue("/tmp/out"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOption("subscribe"))
        ));
        assert!(broker_config_with_subscription().validate().is_ok());
    }

    #[test]
    fn test_loop_requires_queue_source() {
        let mut config = broker_config_with_subscription();
        config.loop_rescan = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remove_requires_queue_source() {
        let mut config = broker_config_with_subscription();
        config.remove = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prefetch_requires_broker_source() {
        let mut config = EngineConfig::new(queue("/tmp/in"), queue("/tmp/out"));
        config.prefetch = Some(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_subscribe_requires_broker_source() {
        let mut config = EngineConfig::new(queue("/tmp/in"), queue("/tmp/out"));
        config.subscriptions.push("/queue/x".parse().unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = EngineConfig::new(queue("/tmp/in"), queue("/tmp/out"));
        config.window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_count_rejected() {
        let mut config = EngineConfig::new(queue("/tmp/in"), queue("/tmp/out"));
        config.count = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_prefetch_explicit_wins() {
        let mut config = broker_config_with_subscription();
        config.prefetch = Some(7);
        config.reliable = true;
        config.count = Some(3);
        assert_eq!(config.effective_prefetch(), 7);
    }

    #[test]
    fn test_effective_prefetch_reliable_count_capped() {
        let mut config = broker_config_with_subscription();
        config.reliable = true;
        config.count = Some(12);
        assert_eq!(config.effective_prefetch(), 12);

        config.count = Some(100_000);
        assert_eq!(config.effective_prefetch(), 100);
    }

    #[test]
    fn test_effective_prefetch_default() {
        let config = broker_config_with_subscription();
        assert_eq!(config.effective_prefetch(), DEFAULT_PREFETCH);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let mut config = broker_config_with_subscription();
        config.count = Some(5);
        config.duration = Some(Duration::from_secs(30));
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
