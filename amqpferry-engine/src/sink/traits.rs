//! Message sink capability trait and send-completion tokens.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::sync::oneshot;

// Layer 3: Internal module imports
use crate::engine::EngineError;
use crate::message::Message;

/// Final disposition of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The send was durably accepted (confirmed or fsynced).
    Accepted,
    /// The send definitively failed.
    Failed(String),
}

enum TokenState {
    Resolved(SendOutcome),
    Pending(oneshot::Receiver<SendOutcome>),
}

/// Completion handle returned by [`MessageSink::send`].
///
/// `send` returns promptly; the token resolves when the broker confirms
/// publication or the on-disk write has been fsynced. A token whose
/// resolver disappears reports a failure rather than staying pending
/// forever, so an aborted confirm waiter cannot wedge the drain.
pub struct SendToken {
    state: TokenState,
}

impl SendToken {
    /// Token that is already accepted (immediate sends).
    pub fn resolved() -> Self {
        Self {
            state: TokenState::Resolved(SendOutcome::Accepted),
        }
    }

    /// Token that is already failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: TokenState::Resolved(SendOutcome::Failed(reason.into())),
        }
    }

    /// Token resolved later through the returned resolver.
    pub fn pending() -> (Self, SendResolver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                state: TokenState::Pending(rx),
            },
            SendResolver(tx),
        )
    }

    /// Non-blocking poll. Returns `None` while the outcome is unknown.
    pub fn try_complete(&mut self) -> Option<SendOutcome> {
        match &mut self.state {
            TokenState::Resolved(outcome) => Some(outcome.clone()),
            TokenState::Pending(rx) => match rx.try_recv() {
                Ok(outcome) => {
                    self.state = TokenState::Resolved(outcome.clone());
                    Some(outcome)
                }
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    let outcome = SendOutcome::Failed("send outcome lost".to_string());
                    self.state = TokenState::Resolved(outcome.clone());
                    Some(outcome)
                }
            },
        }
    }
}

impl std::fmt::Debug for SendToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            TokenState::Resolved(outcome) => write!(f, "SendToken::Resolved({outcome:?})"),
            TokenState::Pending(_) => write!(f, "SendToken::Pending"),
        }
    }
}

/// Resolver side of a pending [`SendToken`].
pub struct SendResolver(oneshot::Sender<SendOutcome>);

impl SendResolver {
    /// Resolve the token as accepted.
    pub fn accept(self) {
        let _ = self.0.send(SendOutcome::Accepted);
    }

    /// Resolve the token as failed.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.0.send(SendOutcome::Failed(reason.into()));
    }
}

/// Capability interface of an outgoing endpoint.
#[async_trait]
pub trait MessageSink: Send {
    /// Establish the connection or open the directory. Bounded by
    /// `timeout-connect`; failure here is fatal.
    async fn start(&mut self) -> Result<(), EngineError>;

    /// Hand one message over. The returned token resolves when the send is
    /// durably accepted.
    async fn send(&mut self, message: Message) -> Result<SendToken, EngineError>;

    /// Wait until all outstanding tokens resolve or `budget` elapses.
    async fn flush(&mut self, budget: Duration) -> Result<(), EngineError>;

    /// Release resources. Idempotent.
    async fn stop(&mut self) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_token() {
        let mut token = SendToken::resolved();
        assert_eq!(token.try_complete(), Some(SendOutcome::Accepted));
        // Stays resolved on repeated polls.
        assert_eq!(token.try_complete(), Some(SendOutcome::Accepted));
    }

    #[test]
    fn test_failed_token() {
        let mut token = SendToken::failed("broker nack");
        assert_eq!(
            token.try_complete(),
            Some(SendOutcome::Failed("broker nack".to_string()))
        );
    }

    #[test]
    fn test_pending_token_resolves_on_accept() {
        let (mut token, resolver) = SendToken::pending();
        assert_eq!(token.try_complete(), None);
        resolver.accept();
        assert_eq!(token.try_complete(), Some(SendOutcome::Accepted));
    }

    #[test]
    fn test_pending_token_resolves_on_fail() {
        let (mut token, resolver) = SendToken::pending();
        resolver.fail("disk full");
        assert_eq!(
            token.try_complete(),
            Some(SendOutcome::Failed("disk full".to_string()))
        );
    }

    #[test]
    fn test_dropped_resolver_fails_token() {
        let (mut token, resolver) = SendToken::pending();
        drop(resolver);
        assert!(matches!(token.try_complete(), Some(SendOutcome::Failed(_))));
    }
}
