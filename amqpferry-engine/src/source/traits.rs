//! Message source capability trait.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::engine::EngineError;
use crate::message::Message;

/// Opaque token identifying one yielded message for later ack/nack.
///
/// Two tags are distinct iff they were issued by distinct source yields.
/// The engine never inspects the representation; only the issuing source
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub(crate) TagRepr);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TagRepr {
    /// Channel-scoped AMQP delivery tag.
    Broker(u64),
    /// Queue-directory entry name.
    Entry(String),
    /// In-memory source sequence.
    Memory(u64),
}

impl DeliveryTag {
    /// Tag for an in-memory source yield (also used by tests).
    pub fn memory(seq: u64) -> Self {
        Self(TagRepr::Memory(seq))
    }

    pub(crate) fn broker(tag: u64) -> Self {
        Self(TagRepr::Broker(tag))
    }

    pub(crate) fn entry(name: impl Into<String>) -> Self {
        Self(TagRepr::Entry(name.into()))
    }

    /// The in-memory sequence, when this tag came from an in-memory source.
    pub fn as_memory_seq(&self) -> Option<u64> {
        match &self.0 {
            TagRepr::Memory(seq) => Some(*seq),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            TagRepr::Broker(tag) => write!(f, "broker:{tag}"),
            TagRepr::Entry(name) => write!(f, "entry:{name}"),
            TagRepr::Memory(seq) => write!(f, "memory:{seq}"),
        }
    }
}

/// One non-blocking receive attempt.
#[derive(Debug)]
pub enum Step {
    /// A message and the tag to acknowledge it with.
    Received(Message, DeliveryTag),
    /// Nothing available right now; the source is healthy.
    Idle,
    /// The source will never yield again (finite queue without `loop`).
    Exhausted,
}

/// Capability interface of an incoming endpoint.
///
/// `step` must not block: it reports `Idle` instead of waiting. After
/// `stop`, no further messages are yielded, but the ack path stays usable
/// until the source is dropped so the shutdown drain can release tags;
/// transports are closed on drop.
#[async_trait]
pub trait MessageSource: Send {
    /// Establish the connection or open the directory. Bounded by
    /// `timeout-connect`; failure here is fatal.
    async fn start(&mut self) -> Result<(), EngineError>;

    /// Attempt to obtain one message without blocking.
    async fn step(&mut self) -> Result<Step, EngineError>;

    /// Confirm successful downstream handling of a yielded message.
    async fn ack(&mut self, tag: &DeliveryTag) -> Result<(), EngineError>;

    /// Acknowledge a FIFO run of tags drained from the window.
    ///
    /// The default loops over [`ack`](MessageSource::ack). Broker sources
    /// override this with a single cumulative ack of the run's last tag
    /// when a single subscription guarantees receipt order matches tag
    /// order, and ack tag by tag otherwise.
    async fn ack_run(&mut self, tags: &[DeliveryTag]) -> Result<(), EngineError> {
        for tag in tags {
            self.ack(tag).await?;
        }
        Ok(())
    }

    /// Give a message back: brokers requeue, queue directories release the
    /// entry lock without deleting.
    async fn nack(&mut self, tag: &DeliveryTag) -> Result<(), EngineError>;

    /// Stop yielding messages. Idempotent.
    async fn stop(&mut self) -> Result<(), EngineError>;
}
