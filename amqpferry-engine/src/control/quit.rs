//! Cooperative quit flag.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio::task::JoinHandle;
use tracing::info;

/// Shared flag examined at the top of every step iteration.
///
/// Set by the signal listener, by the PID-file sentinel check, or
/// programmatically; cancellation is cooperative at step granularity.
#[derive(Debug, Clone, Default)]
pub struct QuitFlag(Arc<AtomicBool>);

impl QuitFlag {
    /// Fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once termination was requested.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Listen for SIGINT/SIGTERM and set `flag` on the first one received.
pub fn spawn_signal_listener(flag: QuitFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = term.recv() => info!("termination signal received"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("interrupt received");
        }
        flag.set();
    })
}
