//! Transform capability trait.

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::message::Message;

/// Error raised by a transform hook.
///
/// A failing `check` drops the affected message and the engine continues;
/// a failing `start` aborts engine startup.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    /// Build an error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Outcome of a `check` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward this message (possibly mutated or rebuilt) to the sink.
    Forward(Message),
    /// Drop the message; the string is logged as the reason.
    Drop(String),
}

/// Stateful per-message hook sitting between source and sink.
///
/// Hooks are invoked single-threaded from the controller's step loop.
/// `check` receives the message by value and must not retain references to
/// it after returning; it may freely mutate the header map. `idle` is
/// called when the source reports no message available and must not block.
///
/// The identity transform (every message forwarded unchanged) is used when
/// no transform is configured.
pub trait Transform: Send {
    /// Called once before any `check`, with the configured data strings.
    /// Transforms that take no data silently ignore it.
    fn start(&mut self, _data: &[String]) -> Result<(), TransformError> {
        Ok(())
    }

    /// Examine one message: forward (possibly rewritten) or drop.
    fn check(&mut self, message: Message) -> Result<Verdict, TransformError>;

    /// Periodic housekeeping while the source is idle. Must not block.
    fn idle(&mut self) {}

    /// Called once during shutdown.
    fn stop(&mut self) {}
}

impl Transform for Box<dyn Transform> {
    fn start(&mut self, data: &[String]) -> Result<(), TransformError> {
        (**self).start(data)
    }

    fn check(&mut self, message: Message) -> Result<Verdict, TransformError> {
        (**self).check(message)
    }

    fn idle(&mut self) {
        (**self).idle()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
