//! AMQP broker sink.
//!
//! Publishes each message to the exchange and routing key selected by its
//! `destination` header. In reliable mode the channel runs with publisher
//! confirms and every send hands back a pending token resolved by a
//! confirm waiter task; otherwise tokens resolve as soon as the frame is
//! enqueued with the wire library.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::time::Instant;
use tracing::warn;

// Layer 3: Internal module imports
use super::traits::{MessageSink, SendToken};
use crate::config::BrokerEndpoint;
use crate::engine::EngineError;
use crate::message::{Destination, DestinationKind, Message, DESTINATION_HEADER};
use crate::source::broker::TOPIC_EXCHANGE;

/// Headers consumed by the property mapping rather than passed through.
const MAPPED_HEADERS: &[&str] = &[
    DESTINATION_HEADER,
    "content-type",
    "persistent",
    "expiration",
    "priority",
    "message-id",
    "correlation-id",
    "reply-to",
    "routing-key",
];

const FLUSH_POLL: Duration = Duration::from_millis(10);

/// Publisher side of a broker endpoint.
pub struct BrokerSink {
    endpoint: BrokerEndpoint,
    reliable: bool,
    connect_timeout: Duration,
    connection: Option<Connection>,
    channel: Option<Channel>,
    in_flight: Arc<AtomicUsize>,
    stopped: bool,
}

impl BrokerSink {
    /// Build an unconnected broker sink.
    pub fn new(endpoint: BrokerEndpoint, reliable: bool, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            reliable,
            connect_timeout,
            connection: None,
            channel: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            stopped: false,
        }
    }

    /// Routing selected by the message's destination header.
    fn routing_for(message: &Message) -> Result<(String, String), EngineError> {
        let destination: Destination = match message.destination() {
            Some(Ok(destination)) => destination,
            Some(Err(e)) => return Err(EngineError::Protocol(e.to_string())),
            None => {
                return Err(EngineError::Protocol(
                    "message lacks a destination header".to_string(),
                ))
            }
        };
        let routing = match destination.kind {
            DestinationKind::Queue => (String::new(), destination.name),
            DestinationKind::Topic => (TOPIC_EXCHANGE.to_string(), destination.name),
            DestinationKind::Exchange => (
                destination.name,
                message.header("routing-key").unwrap_or("").to_string(),
            ),
        };
        Ok(routing)
    }

    /// Map message headers onto AMQP properties; everything the mapping
    /// does not consume travels in the headers table.
    fn properties_for(message: &Message) -> BasicProperties {
        let mut properties = BasicProperties::default();
        if let Some(content_type) = message.header("content-type") {
            properties = properties.with_content_type(ShortString::from(content_type.to_string()));
        }
        if let Some(encoding) = message.content_encoding() {
            properties = properties.with_content_encoding(ShortString::from(encoding.to_string()));
        }
        if matches!(message.header("persistent"), Some("true") | Some("1") | Some("yes")) {
            properties = properties.with_delivery_mode(2);
        }
        if let Some(expiration) = message.header("expiration") {
            properties = properties.with_expiration(ShortString::from(expiration.to_string()));
        }
        if let Some(priority) = message.header("priority") {
            match priority.parse::<u8>() {
                Ok(value) => properties = properties.with_priority(value),
                Err(_) => warn!(priority, "ignoring non-numeric priority header"),
            }
        }
        if let Some(message_id) = message.header("message-id") {
            properties = properties.with_message_id(ShortString::from(message_id.to_string()));
        }
        if let Some(correlation_id) = message.header("correlation-id") {
            properties =
                properties.with_correlation_id(ShortString::from(correlation_id.to_string()));
        }
        if let Some(reply_to) = message.header("reply-to") {
            properties = properties.with_reply_to(ShortString::from(reply_to.to_string()));
        }

        let mut table = FieldTable::default();
        for (key, value) in message.headers() {
            if MAPPED_HEADERS.contains(&key) {
                continue;
            }
            table.insert(
                ShortString::from(key.to_string()),
                AMQPValue::LongString(value.to_string().into()),
            );
        }
        if !table.inner().is_empty() {
            properties = properties.with_headers(table);
        }
        properties
    }
}

#[async_trait]
impl MessageSink for BrokerSink {
    async fn start(&mut self) -> Result<(), EngineError> {
        let uri = self.endpoint.connect_string();
        let connecting = Connection::connect(&uri, ConnectionProperties::default());
        let connection = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| EngineError::ConnectTimeout {
                endpoint: self.endpoint.uri.display_authority(),
                timeout: self.connect_timeout,
            })?
            .map_err(|e| EngineError::transport("connect", e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| EngineError::transport("open channel", e))?;
        if self.reliable {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| EngineError::transport("confirm.select", e))?;
        }
        self.channel = Some(channel);
        self.connection = Some(connection);
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<SendToken, EngineError> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| EngineError::Protocol("send before start".to_string()))?;
        let (exchange, routing_key) = Self::routing_for(&message)?;
        let properties = Self::properties_for(&message);

        let confirm = channel
            .basic_publish(
                &exchange,
                &routing_key,
                BasicPublishOptions::default(),
                message.body().as_ref(),
                properties,
            )
            .await
            .map_err(|e| EngineError::transport("basic.publish", e))?;

        if !self.reliable {
            return Ok(SendToken::resolved());
        }

        let (token, resolver) = SendToken::pending();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            match confirm.await {
                Ok(Confirmation::Nack(_)) => resolver.fail("broker negative confirmation"),
                Ok(_) => resolver.accept(),
                Err(e) => resolver.fail(format!("publisher confirm failed: {e}")),
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(token)
    }

    async fn flush(&mut self, budget: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + budget;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    outstanding = self.in_flight.load(Ordering::SeqCst),
                    "flush budget elapsed with confirms outstanding"
                );
                break;
            }
            tokio::time::sleep(FLUSH_POLL).await;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "amqpferry shutdown").await {
                warn!(error = %e, "connection close failed");
            }
        }
        self.channel = None;
        Ok(())
    }
}
