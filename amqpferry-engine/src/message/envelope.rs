//! Opaque message envelope moved through the transfer pipeline.
//!
//! A message is a header mapping (short string keys to short string values)
//! plus an opaque byte body tagged with an optional content encoding. The
//! engine never inspects bodies; headers are read and mutated only on behalf
//! of the configured transform and the outgoing endpoint.

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use super::destination::{Destination, DestinationParseError};

/// Header key consulted by broker sinks to select the publish routing.
pub const DESTINATION_HEADER: &str = "destination";

/// Opaque message envelope: header map plus byte body.
///
/// Header keys are unique; insertion order is not significant. The body is
/// an opaque byte string with an optional content-encoding tag that travels
/// with it (mapped to the AMQP `content-encoding` property on broker sinks
/// and preserved verbatim by queue-directory endpoints).
///
/// # Examples
///
/// ```rust
/// use amqpferry_engine::message::Message;
///
/// let msg = Message::new("hello".as_bytes().to_vec())
///     .with_header("destination", "/queue/out")
///     .with_content_encoding("utf-8");
///
/// assert_eq!(msg.header("destination"), Some("/queue/out"));
/// assert_eq!(msg.body().as_ref(), b"hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    header: BTreeMap<String, String>,
    #[serde(with = "body_base64")]
    body: Bytes,
    #[serde(
        rename = "content-encoding",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    content_encoding: Option<String>,
}

impl Message {
    /// Create a message with an empty header map.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            header: BTreeMap::new(),
            body: body.into(),
            content_encoding: None,
        }
    }

    /// Builder method: set a header field.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    /// Builder method: set the content-encoding tag of the body.
    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    /// Look up a header field.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }

    /// Set a header field, replacing any previous value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.header.insert(key.into(), value.into());
    }

    /// Remove a header field, returning its previous value.
    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        self.header.remove(key)
    }

    /// Iterate over all header fields in key order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header fields.
    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// The opaque message body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body length in bytes.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// The content-encoding tag of the body, if any.
    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    /// Parse the `destination` header into a canonical destination.
    ///
    /// Returns `None` when the header is absent and an error when it is
    /// present but carries no recognized prefix.
    pub fn destination(&self) -> Option<Result<Destination, DestinationParseError>> {
        self.header(DESTINATION_HEADER).map(str::parse)
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
