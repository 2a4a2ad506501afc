//! Compiled-in named transforms.
//!
//! Transforms are selected by registry name via configuration and receive
//! their parameters as `data` strings in the `start` hook.

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 2: Third-party crate imports
use tracing::{debug, info};

// Layer 3: Internal module imports
use super::traits::{Transform, TransformError, Verdict};
use crate::config::ConfigError;
use crate::message::Message;

/// Look up a transform by registry name.
///
/// Registered names: `identity`, `set-header`, `header-filter`, `log`.
pub fn build(name: &str) -> Result<Box<dyn Transform>, ConfigError> {
    match name {
        "identity" => Ok(Box::new(Identity)),
        "set-header" => Ok(Box::new(SetHeader::default())),
        "header-filter" => Ok(Box::new(HeaderFilter::default())),
        "log" => Ok(Box::new(LogTap::default())),
        other => Err(ConfigError::UnknownTransform(other.to_string())),
    }
}

/// Pass every message through unchanged. Used when no transform is
/// configured.
#[derive(Debug, Default)]
pub struct Identity;

impl Transform for Identity {
    fn check(&mut self, message: Message) -> Result<Verdict, TransformError> {
        Ok(Verdict::Forward(message))
    }
}

/// Set fixed header fields on every message.
///
/// Data: `key=value` entries, e.g. `destination=/queue/replay`.
#[derive(Debug, Default)]
pub struct SetHeader {
    headers: Vec<(String, String)>,
}

impl Transform for SetHeader {
    fn start(&mut self, data: &[String]) -> Result<(), TransformError> {
        for entry in data {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| TransformError::new(format!("expected key=value, got {entry:?}")))?;
            if key.is_empty() {
                return Err(TransformError::new(format!("empty header key in {entry:?}")));
            }
            self.headers.push((key.to_string(), value.to_string()));
        }
        if self.headers.is_empty() {
            return Err(TransformError::new("set-header requires at least one key=value"));
        }
        Ok(())
    }

    fn check(&mut self, mut message: Message) -> Result<Verdict, TransformError> {
        for (key, value) in &self.headers {
            message.set_header(key.clone(), value.clone());
        }
        Ok(Verdict::Forward(message))
    }
}

const DEFAULT_DROP_REASON: &str = "filtered";

/// Drop messages whose headers match any configured `key=value` pair.
///
/// Data: `key=value` match entries plus an optional `reason=…` entry that
/// sets the logged drop reason (default `filtered`).
#[derive(Debug, Default)]
pub struct HeaderFilter {
    matches: BTreeMap<String, String>,
    reason: String,
}

impl Transform for HeaderFilter {
    fn start(&mut self, data: &[String]) -> Result<(), TransformError> {
        self.reason = DEFAULT_DROP_REASON.to_string();
        for entry in data {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| TransformError::new(format!("expected key=value, got {entry:?}")))?;
            if key == "reason" {
                self.reason = value.to_string();
            } else {
                self.matches.insert(key.to_string(), value.to_string());
            }
        }
        if self.matches.is_empty() {
            return Err(TransformError::new(
                "header-filter requires at least one key=value match",
            ));
        }
        Ok(())
    }

    fn check(&mut self, message: Message) -> Result<Verdict, TransformError> {
        for (key, value) in &self.matches {
            if message.header(key) == Some(value.as_str()) {
                return Ok(Verdict::Drop(self.reason.clone()));
            }
        }
        Ok(Verdict::Forward(message))
    }
}

/// Tap: log every message's headers and forward it unchanged.
#[derive(Debug, Default)]
pub struct LogTap {
    seen: u64,
}

impl Transform for LogTap {
    fn check(&mut self, message: Message) -> Result<Verdict, TransformError> {
        self.seen += 1;
        let headers = message
            .headers()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            seq = self.seen,
            body_len = message.body_len(),
            headers = %headers,
            "message"
        );
        Ok(Verdict::Forward(message))
    }

    fn stop(&mut self) {
        debug!(seen = self.seen, "log tap stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_registry_knows_builtins() {
        for name in ["identity", "set-header", "header-filter", "log"] {
            assert!(build(name).is_ok(), "{name} should be registered");
        }
    }

    #[test]
    fn test_registry_rejects_unknown() {
        assert!(matches!(
            build("rot13"),
            Err(ConfigError::UnknownTransform(_))
        ));
    }

    #[test]
    fn test_identity_forwards_unchanged() {
        let mut transform = Identity;
        let msg = Message::new(b"x".to_vec()).with_header("k", "v");
        match transform.check(msg.clone()).unwrap() {
            Verdict::Forward(out) => assert_eq!(out, msg),
            Verdict::Drop(reason) => panic!("unexpected drop: {reason}"),
        }
    }

    #[test]
    fn test_identity_ignores_data() {
        // Data handed to a transform that does not consume it is ignored.
        let mut transform = Identity;
        assert!(transform.start(&data(&["whatever"])).is_ok());
    }

    #[test]
    fn test_set_header_applies_all_entries() {
        let mut transform = SetHeader::default();
        transform
            .start(&data(&["destination=/queue/replay", "origin=ferry"]))
            .unwrap();

        let msg = Message::new(Vec::new());
        match transform.check(msg).unwrap() {
            Verdict::Forward(out) => {
                assert_eq!(out.header("destination"), Some("/queue/replay"));
                assert_eq!(out.header("origin"), Some("ferry"));
            }
            Verdict::Drop(reason) => panic!("unexpected drop: {reason}"),
        }
    }

    #[test]
    fn test_set_header_overwrites_existing() {
        let mut transform = SetHeader::default();
        transform.start(&data(&["k=new"])).unwrap();
        let msg = Message::new(Vec::new()).with_header("k", "old");
        match transform.check(msg).unwrap() {
            Verdict::Forward(out) => assert_eq!(out.header("k"), Some("new")),
            Verdict::Drop(reason) => panic!("unexpected drop: {reason}"),
        }
    }

    #[test]
    fn test_set_header_requires_data() {
        let mut transform = SetHeader::default();
        assert!(transform.start(&[]).is_err());
        assert!(transform.start(&data(&["no-equals"])).is_err());
    }

    #[test]
    fn test_header_filter_drops_matching() {
        let mut transform = HeaderFilter::default();
        transform
            .start(&data(&["priority=low", "reason=skip"]))
            .unwrap();

        let low = Message::new(Vec::new()).with_header("priority", "low");
        assert_eq!(
            transform.check(low).unwrap(),
            Verdict::Drop("skip".to_string())
        );

        let high = Message::new(Vec::new()).with_header("priority", "high");
        assert!(matches!(transform.check(high).unwrap(), Verdict::Forward(_)));
    }

    #[test]
    fn test_header_filter_default_reason() {
        let mut transform = HeaderFilter::default();
        transform.start(&data(&["k=v"])).unwrap();
        let msg = Message::new(Vec::new()).with_header("k", "v");
        assert_eq!(
            transform.check(msg).unwrap(),
            Verdict::Drop("filtered".to_string())
        );
    }

    #[test]
    fn test_header_filter_requires_match_entry() {
        let mut transform = HeaderFilter::default();
        assert!(transform.start(&data(&["reason=skip"])).is_err());
    }

    #[test]
    fn test_log_tap_forwards() {
        let mut transform = LogTap::default();
        let msg = Message::new(b"x".to_vec());
        assert!(matches!(
            transform.check(msg).unwrap(),
            Verdict::Forward(_)
        ));
    }
}
