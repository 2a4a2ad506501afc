//! Endpoint, credential and subscription configuration.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use url::Url;

// Layer 3: Internal module imports
use super::error::ConfigError;
use crate::message::Destination;

/// Opaque authentication material for broker endpoints.
///
/// Parsed from `user` or `user:password` strings. The password never
/// appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// User name.
    pub user: String,
    /// Password, when given.
    pub password: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl FromStr for Credential {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (user, password) = match input.split_once(':') {
            Some((user, password)) => (user, Some(password.to_string())),
            None => (input, None),
        };
        if user.is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "auth",
                reason: "empty user name".to_string(),
            });
        }
        Ok(Self {
            user: user.to_string(),
            password,
        })
    }
}

/// Parsed `amqp[s]://[user[:pass]@]host[:port]/vhost` endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerUri {
    /// True for `amqps`.
    pub tls: bool,
    /// Broker host.
    pub host: String,
    /// Broker port (scheme default when absent from the URI).
    pub port: u16,
    /// Virtual host (`/` when the URI path is empty).
    pub vhost: String,
    /// Credential embedded in the URI, if any.
    pub credential: Option<Credential>,
}

impl BrokerUri {
    /// Render the URI for the wire library, substituting `credential` for
    /// any URI-embedded one (an explicit credential wins over the URI's).
    pub fn to_connect_string(&self, credential: Option<&Credential>) -> String {
        let scheme = if self.tls { "amqps" } else { "amqp" };
        let auth = match credential.or(self.credential.as_ref()) {
            Some(c) => match &c.password {
                Some(p) => format!("{}:{}@", c.user, p),
                None => format!("{}@", c.user),
            },
            None => String::new(),
        };
        let vhost = if self.vhost == "/" {
            "%2f".to_string()
        } else {
            self.vhost.clone()
        };
        format!("{scheme}://{auth}{}:{}/{vhost}", self.host, self.port)
    }

    /// Endpoint identity without credentials, for log lines.
    pub fn display_authority(&self) -> String {
        let scheme = if self.tls { "amqps" } else { "amqp" };
        format!("{scheme}://{}:{}/{}", self.host, self.port, self.vhost)
    }
}

impl FromStr for BrokerUri {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidUri {
            uri: input.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(input).map_err(|e| invalid(&e.to_string()))?;
        let tls = match url.scheme() {
            "amqp" => false,
            "amqps" => true,
            other => return Err(invalid(&format!("unsupported scheme {other:?}"))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = url
            .port()
            .unwrap_or(if tls { 5671 } else { 5672 });
        let vhost = match url.path().trim_start_matches('/') {
            "" | "%2f" | "%2F" => "/".to_string(),
            path => path.to_string(),
        };
        let credential = if url.username().is_empty() {
            None
        } else {
            Some(Credential {
                user: url.username().to_string(),
                password: url.password().map(str::to_string),
            })
        };
        Ok(Self {
            tls,
            host,
            port,
            vhost,
            credential,
        })
    }
}

/// Broker endpoint: URI plus optional explicit credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    /// Parsed endpoint URI.
    pub uri: BrokerUri,
    /// Explicit credential; overrides any URI-embedded one.
    pub auth: Option<Credential>,
}

impl BrokerEndpoint {
    /// Connect string with the credential-override rule applied.
    pub fn connect_string(&self) -> String {
        self.uri.to_connect_string(self.auth.as_ref())
    }
}

/// On-disk queue endpoint.
///
/// Normalized from `path=/some/dir[,type=simple]` strings or structured
/// `{ path, type }` values; only the `simple` flat-directory format exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEndpoint {
    /// Queue directory path.
    pub path: PathBuf,
}

impl QueueEndpoint {
    /// Normalize a structured queue value.
    pub fn new(path: impl Into<PathBuf>, kind: Option<&str>) -> Result<Self, ConfigError> {
        match kind {
            None | Some("simple") => Ok(Self { path: path.into() }),
            Some(other) => Err(ConfigError::InvalidOption {
                option: "type",
                reason: format!("unsupported queue type {other:?}"),
            }),
        }
    }
}

impl FromStr for QueueEndpoint {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // Bare path shorthand, or `key=value` pairs.
        if !input.contains('=') {
            return Self::new(input, None);
        }
        let mut path = None;
        let mut kind = None;
        for pair in split_pairs(input) {
            match pair.split_once('=') {
                Some(("path", v)) => path = Some(v.to_string()),
                Some(("type", v)) => kind = Some(v.to_string()),
                _ => {
                    return Err(ConfigError::InvalidOption {
                        option: "queue",
                        reason: format!("unrecognized element {pair:?}"),
                    })
                }
            }
        }
        let path = path.ok_or(ConfigError::MissingOption("path"))?;
        Self::new(path, kind.as_deref())
    }
}

/// Either flavor of endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointConfig {
    /// AMQP broker endpoint.
    Broker(BrokerEndpoint),
    /// On-disk queue directory endpoint.
    Queue(QueueEndpoint),
}

impl EndpointConfig {
    /// True for the broker flavor.
    pub fn is_broker(&self) -> bool {
        matches!(self, Self::Broker(_))
    }

    /// True for the queue flavor.
    pub fn is_queue(&self) -> bool {
        matches!(self, Self::Queue(_))
    }
}

/// Broker subscription: canonical destination plus pass-through options.
///
/// Normalized from `destination=/queue/q[,key=value…]` strings (a bare
/// destination string is accepted as shorthand) or structured tables.
/// Option keys such as `ack` or `exclusive` pass through to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// What to subscribe to.
    pub destination: Destination,
    /// Broker-specific options, passed through unvalidated.
    pub options: BTreeMap<String, String>,
}

impl Subscription {
    /// Build a subscription from already-structured parts.
    pub fn new(destination: Destination, options: BTreeMap<String, String>) -> Self {
        Self {
            destination,
            options,
        }
    }

    /// Look up a pass-through option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// True when the `exclusive` option is set to a truthy value.
    pub fn exclusive(&self) -> bool {
        matches!(self.option("exclusive"), Some("true") | Some("1") | Some("yes"))
    }
}

impl FromStr for Subscription {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if !input.contains('=') {
            // Bare destination shorthand.
            return Ok(Self::new(input.parse()?, BTreeMap::new()));
        }
        let mut destination = None;
        let mut options = BTreeMap::new();
        for pair in split_pairs(input) {
            match pair.split_once('=') {
                Some(("destination", v)) => destination = Some(v.parse::<Destination>()?),
                Some((k, v)) if !k.is_empty() => {
                    options.insert(k.to_string(), v.to_string());
                }
                _ => {
                    return Err(ConfigError::InvalidOption {
                        option: "subscribe",
                        reason: format!("unrecognized element {pair:?}"),
                    })
                }
            }
        }
        let destination = destination.ok_or(ConfigError::MissingOption("destination"))?;
        Ok(Self::new(destination, options))
    }
}

fn split_pairs(input: &str) -> impl Iterator<Item = &str> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DestinationKind;

    #[test]
    fn test_credential_with_password() {
        let cred: Credential = "guest:secret".parse().unwrap();
        assert_eq!(cred.user, "guest");
        assert_eq!(cred.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred: Credential = "guest:secret".parse().unwrap();
        let debug = format!("{cred:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("guest"));
    }

    #[test]
    fn test_credential_empty_user_rejected() {
        assert!(":pw".parse::<Credential>().is_err());
    }

    #[test]
    fn test_uri_full_form() {
        let uri: BrokerUri = "amqp://user:pw@broker.example:5673/prod".parse().unwrap();
        assert!(!uri.tls);
        assert_eq!(uri.host, "broker.example");
        assert_eq!(uri.port, 5673);
        assert_eq!(uri.vhost, "prod");
        let cred = uri.credential.clone().unwrap();
        assert_eq!(cred.user, "user");
        assert_eq!(cred.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_uri_defaults() {
        let uri: BrokerUri = "amqp://localhost".parse().unwrap();
        assert_eq!(uri.port, 5672);
        assert_eq!(uri.vhost, "/");
        assert!(uri.credential.is_none());

        let tls: BrokerUri = "amqps://localhost".parse().unwrap();
        assert!(tls.tls);
        assert_eq!(tls.port, 5671);
    }

    #[test]
    fn test_uri_rejects_other_schemes() {
        assert!("http://localhost".parse::<BrokerUri>().is_err());
    }

    #[test]
    fn test_connect_string_default_vhost_is_escaped() {
        let uri: BrokerUri = "amqp://localhost".parse().unwrap();
        assert_eq!(uri.to_connect_string(None), "amqp://localhost:5672/%2f");
    }

    #[test]
    fn test_explicit_credential_overrides_uri() {
        let uri: BrokerUri = "amqp://old:pw@localhost/v".parse().unwrap();
        let explicit: Credential = "new:npw".parse().unwrap();
        let rendered = uri.to_connect_string(Some(&explicit));
        assert!(rendered.starts_with("amqp://new:npw@"));
    }

    #[test]
    fn test_uri_credential_used_when_no_override() {
        let endpoint = BrokerEndpoint {
            uri: "amqp://u:p@localhost/v".parse().unwrap(),
            auth: None,
        };
        assert!(endpoint.connect_string().starts_with("amqp://u:p@"));
    }

    #[test]
    fn test_queue_endpoint_bare_path() {
        let q: QueueEndpoint = "/var/spool/ferry".parse().unwrap();
        assert_eq!(q.path, PathBuf::from("/var/spool/ferry"));
    }

    #[test]
    fn test_queue_endpoint_pairs() {
        let q: QueueEndpoint = "path=/tmp/in, type=simple".parse().unwrap();
        assert_eq!(q.path, PathBuf::from("/tmp/in"));
    }

    #[test]
    fn test_queue_endpoint_unknown_type() {
        assert!("path=/tmp/in,type=dqs".parse::<QueueEndpoint>().is_err());
    }

    #[test]
    fn test_queue_endpoint_missing_path() {
        assert!("type=simple".parse::<QueueEndpoint>().is_err());
    }

    #[test]
    fn test_subscription_bare_destination() {
        let sub: Subscription = "/queue/in".parse().unwrap();
        assert_eq!(sub.destination.kind, DestinationKind::Queue);
        assert!(sub.options.is_empty());
    }

    #[test]
    fn test_subscription_with_options() {
        let sub: Subscription = "destination=/topic/t, ack=client, exclusive=true"
            .parse()
            .unwrap();
        assert_eq!(sub.destination.kind, DestinationKind::Topic);
        assert_eq!(sub.option("ack"), Some("client"));
        assert!(sub.exclusive());
    }

    #[test]
    fn test_subscription_missing_destination() {
        assert!("ack=client".parse::<Subscription>().is_err());
    }

    #[test]
    fn test_subscription_bad_destination_prefix() {
        assert!("destination=orders".parse::<Subscription>().is_err());
    }
}
