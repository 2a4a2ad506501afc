//! In-memory source.
//!
//! In-process counterpart of the broker and queue sources, used by the
//! test suites and as a loopback endpoint. A shared handle feeds messages
//! in and observes which tags were acked or nacked.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::traits::{DeliveryTag, MessageSource, Step};
use crate::engine::EngineError;
use crate::message::Message;

#[derive(Default)]
struct Shared {
    pending: VecDeque<Message>,
    acked: Vec<u64>,
    nacked: Vec<u64>,
    yielded: u64,
    fail_steps: u32,
    started: bool,
    stopped: bool,
}

/// Observation and feeding handle shared with a [`MemorySource`].
#[derive(Clone)]
pub struct MemorySourceHandle {
    inner: Arc<Mutex<Shared>>,
}

impl MemorySourceHandle {
    /// Queue another message for the source to yield.
    pub fn push(&self, message: Message) {
        self.inner.lock().pending.push_back(message);
    }

    /// Sequence numbers of acked yields, in ack order.
    pub fn acked(&self) -> Vec<u64> {
        self.inner.lock().acked.clone()
    }

    /// Sequence numbers of nacked yields.
    pub fn nacked(&self) -> Vec<u64> {
        self.inner.lock().nacked.clone()
    }

    /// How many messages the source has yielded.
    pub fn yielded(&self) -> u64 {
        self.inner.lock().yielded
    }

    /// True once `start` ran.
    pub fn started(&self) -> bool {
        self.inner.lock().started
    }

    /// True once `stop` ran.
    pub fn stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Make the next `n` calls to `step` fail with a transport error.
    pub fn inject_transport_errors(&self, n: u32) {
        self.inner.lock().fail_steps = n;
    }
}

/// Scripted in-process source.
pub struct MemorySource {
    inner: Arc<Mutex<Shared>>,
    exhaust_when_empty: bool,
}

impl MemorySource {
    /// Build a source preloaded with `messages`.
    ///
    /// With `exhaust_when_empty`, running dry reports `Exhausted` (a finite
    /// queue); otherwise the source reports `Idle` and waits for more
    /// pushes through the handle.
    pub fn new(
        messages: impl IntoIterator<Item = Message>,
        exhaust_when_empty: bool,
    ) -> (Self, MemorySourceHandle) {
        let inner = Arc::new(Mutex::new(Shared {
            pending: messages.into_iter().collect(),
            ..Shared::default()
        }));
        (
            Self {
                inner: Arc::clone(&inner),
                exhaust_when_empty,
            },
            MemorySourceHandle { inner },
        )
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn start(&mut self) -> Result<(), EngineError> {
        let mut shared = self.inner.lock();
        shared.started = true;
        // A restart (the reconnect path) resumes yielding.
        shared.stopped = false;
        Ok(())
    }

    async fn step(&mut self) -> Result<Step, EngineError> {
        let mut shared = self.inner.lock();
        if shared.fail_steps > 0 {
            shared.fail_steps -= 1;
            return Err(EngineError::transport(
                "memory source",
                lapin::Error::ChannelsLimitReached,
            ));
        }
        if shared.stopped {
            return Ok(Step::Idle);
        }
        match shared.pending.pop_front() {
            Some(message) => {
                let seq = shared.yielded;
                shared.yielded += 1;
                Ok(Step::Received(message, DeliveryTag::memory(seq)))
            }
            None if self.exhaust_when_empty => Ok(Step::Exhausted),
            None => Ok(Step::Idle),
        }
    }

    async fn ack(&mut self, tag: &DeliveryTag) -> Result<(), EngineError> {
        if let Some(seq) = tag.as_memory_seq() {
            self.inner.lock().acked.push(seq);
        }
        Ok(())
    }

    async fn nack(&mut self, tag: &DeliveryTag) -> Result<(), EngineError> {
        if let Some(seq) = tag.as_memory_seq() {
            self.inner.lock().nacked.push(seq);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.inner.lock().stopped = true;
        Ok(())
    }
}
