//! Queue-directory sink.
//!
//! Every message becomes one fsynced directory entry; the token resolves
//! as soon as `send` returns. Disk failures here are fatal: unlike the
//! source side there is no safe way to skip, the message would be lost.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tracing::debug;

// Layer 3: Internal module imports
use super::traits::{MessageSink, SendToken};
use crate::dirq::QueueDir;
use crate::engine::EngineError;
use crate::message::Message;

/// Sink writing messages into an on-disk queue directory.
pub struct DirQueueSink {
    dirq: QueueDir,
    written: u64,
}

impl DirQueueSink {
    /// Build a sink over `dirq`.
    pub fn new(dirq: QueueDir) -> Self {
        Self { dirq, written: 0 }
    }
}

#[async_trait]
impl MessageSink for DirQueueSink {
    async fn start(&mut self) -> Result<(), EngineError> {
        // The directory exists once the handle does; nothing to establish.
        debug!(path = %self.dirq.path().display(), "queue sink opened");
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<SendToken, EngineError> {
        let id = self.dirq.add(&message)?;
        self.written += 1;
        debug!(entry = %id, "entry written");
        Ok(SendToken::resolved())
    }

    async fn flush(&mut self, _budget: Duration) -> Result<(), EngineError> {
        // Entries are fsynced in `send`; nothing is outstanding.
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        debug!(written = self.written, "queue sink stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SendOutcome;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_send_writes_readable_entry() {
        let dir = TempDir::new().unwrap();
        let dirq = QueueDir::open(dir.path()).unwrap();
        let mut sink = DirQueueSink::new(dirq.clone());
        sink.start().await.unwrap();

        let msg = Message::new(b"payload".to_vec()).with_header("k", "v");
        let mut token = sink.send(msg.clone()).await.unwrap();
        assert_eq!(token.try_complete(), Some(SendOutcome::Accepted));

        let ids = dirq.scan().unwrap();
        assert_eq!(ids.len(), 1);
        assert!(dirq.lock(&ids[0]).unwrap());
        assert_eq!(dirq.read(&ids[0]).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_send_failure_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let dirq = QueueDir::open(dir.path()).unwrap();
        let mut sink = DirQueueSink::new(dirq);
        sink.start().await.unwrap();

        // Removing the directory out from under the sink breaks the write.
        std::fs::remove_dir_all(dir.path()).unwrap();
        let result = sink.send(Message::new(b"x".to_vec())).await;
        assert!(matches!(result, Err(EngineError::Storage(_))));
    }

    #[tokio::test]
    async fn test_flush_and_stop_are_cheap() {
        let dir = TempDir::new().unwrap();
        let dirq = QueueDir::open(dir.path()).unwrap();
        let mut sink = DirQueueSink::new(dirq);
        sink.start().await.unwrap();
        sink.flush(Duration::from_secs(1)).await.unwrap();
        sink.stop().await.unwrap();
        sink.stop().await.unwrap();
    }
}
