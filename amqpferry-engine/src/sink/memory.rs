//! In-memory sink.
//!
//! Collects sent messages behind a shared handle. Token resolution can be
//! delayed or forced to fail, which is how the suites exercise window
//! saturation and the never-ack-unknown-outcomes rule.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

// Layer 3: Internal module imports
use super::traits::{MessageSink, SendToken};
use crate::engine::EngineError;
use crate::message::Message;

#[derive(Default)]
struct Shared {
    accepted: Vec<Message>,
    sends: usize,
    outstanding: usize,
    token_delay: Option<Duration>,
    fail_sends: bool,
    started: bool,
    flushed: bool,
    stopped: bool,
}

/// Observation and control handle shared with a [`MemorySink`].
#[derive(Clone)]
pub struct MemorySinkHandle {
    inner: Arc<Mutex<Shared>>,
}

impl MemorySinkHandle {
    /// Messages whose tokens resolved as accepted, in send order.
    pub fn accepted(&self) -> Vec<Message> {
        self.inner.lock().accepted.clone()
    }

    /// Number of accepted messages.
    pub fn accepted_len(&self) -> usize {
        self.inner.lock().accepted.len()
    }

    /// Total `send` calls, regardless of outcome.
    pub fn sends(&self) -> usize {
        self.inner.lock().sends
    }

    /// Tokens handed out but not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// Delay every token resolution by `delay`.
    pub fn set_token_delay(&self, delay: Duration) {
        self.inner.lock().token_delay = Some(delay);
    }

    /// Make every further send resolve its token as failed.
    pub fn fail_sends(&self) {
        self.inner.lock().fail_sends = true;
    }

    /// True once `start` ran.
    pub fn started(&self) -> bool {
        self.inner.lock().started
    }

    /// True once `flush` ran.
    pub fn flushed(&self) -> bool {
        self.inner.lock().flushed
    }

    /// True once `stop` ran.
    pub fn stopped(&self) -> bool {
        self.inner.lock().stopped
    }
}

/// Collecting in-process sink.
pub struct MemorySink {
    inner: Arc<Mutex<Shared>>,
}

impl MemorySink {
    /// Build a sink and its observation handle.
    pub fn new() -> (Self, MemorySinkHandle) {
        let inner = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MemorySinkHandle { inner },
        )
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn start(&mut self) -> Result<(), EngineError> {
        self.inner.lock().started = true;
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<SendToken, EngineError> {
        let (delay, fail) = {
            let mut shared = self.inner.lock();
            shared.sends += 1;
            (shared.token_delay, shared.fail_sends)
        };

        match (delay, fail) {
            (None, false) => {
                let mut shared = self.inner.lock();
                shared.accepted.push(message);
                Ok(SendToken::resolved())
            }
            (None, true) => Ok(SendToken::failed("injected sink failure")),
            (Some(delay), fail) => {
                let (token, resolver) = SendToken::pending();
                let inner = Arc::clone(&self.inner);
                inner.lock().outstanding += 1;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let mut shared = inner.lock();
                    shared.outstanding -= 1;
                    if fail {
                        drop(shared);
                        resolver.fail("injected sink failure");
                    } else {
                        shared.accepted.push(message);
                        drop(shared);
                        resolver.accept();
                    }
                });
                Ok(token)
            }
        }
    }

    async fn flush(&mut self, budget: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + budget;
        loop {
            {
                let mut shared = self.inner.lock();
                if shared.outstanding == 0 {
                    shared.flushed = true;
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                self.inner.lock().flushed = true;
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.inner.lock().stopped = true;
        Ok(())
    }
}
