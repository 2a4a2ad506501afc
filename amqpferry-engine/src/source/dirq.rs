//! Queue-directory source.
//!
//! Iterates the ready entries of an on-disk queue directory in arrival
//! order. Entries that fail to lock or read are logged and skipped; a
//! skipped entry is remembered so a `loop` rescan does not retry it
//! forever. Locks still held for unresolved messages are released when the
//! source is dropped, so a crashed or cancelled run leaves its messages
//! available for redelivery.

// Layer 1: Standard library imports
use std::collections::{HashSet, VecDeque};

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::traits::{DeliveryTag, MessageSource, Step, TagRepr};
use crate::dirq::{EntryId, QueueDir};
use crate::engine::EngineError;
use crate::message::Message;

/// Pull-based source iterating an on-disk queue directory.
pub struct DirQueueSource {
    dirq: QueueDir,
    loop_rescan: bool,
    remove: bool,
    batch: VecDeque<EntryId>,
    skipped: HashSet<EntryId>,
    locked: HashSet<EntryId>,
}

impl DirQueueSource {
    /// Build a source over `dirq`.
    ///
    /// With `loop_rescan`, exhaustion triggers a rescan from the beginning
    /// instead of ending the run; with `remove`, acknowledged entries are
    /// deleted (otherwise they are merely released).
    pub fn new(dirq: QueueDir, loop_rescan: bool, remove: bool) -> Self {
        Self {
            dirq,
            loop_rescan,
            remove,
            batch: VecDeque::new(),
            skipped: HashSet::new(),
            locked: HashSet::new(),
        }
    }

    fn entry_id(tag: &DeliveryTag) -> Option<EntryId> {
        match &tag.0 {
            TagRepr::Entry(name) => Some(EntryId::from_name(name.clone())),
            _ => None,
        }
    }

    fn rescan(&mut self) -> Result<(), EngineError> {
        let ids = self.dirq.scan()?;
        self.batch = ids
            .into_iter()
            .filter(|id| !self.skipped.contains(id))
            .collect();
        Ok(())
    }
}

#[async_trait]
impl MessageSource for DirQueueSource {
    async fn start(&mut self) -> Result<(), EngineError> {
        // The directory was opened by the builder; prime the first batch so
        // startup fails loudly on an unreadable directory.
        self.rescan()?;
        debug!(path = %self.dirq.path().display(), ready = self.batch.len(), "queue source opened");
        Ok(())
    }

    async fn step(&mut self) -> Result<Step, EngineError> {
        loop {
            let id = match self.batch.pop_front() {
                Some(id) => id,
                None => {
                    if !self.loop_rescan {
                        return Ok(Step::Exhausted);
                    }
                    self.rescan()?;
                    match self.batch.pop_front() {
                        Some(id) => id,
                        None => return Ok(Step::Idle),
                    }
                }
            };

            // Entries can vanish or break individually without failing the
            // run: log, remember, move on.
            match self.dirq.lock(&id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(entry = %id, error = %e, "skipping unlockable entry");
                    self.skipped.insert(id);
                    continue;
                }
            }
            match self.dirq.read(&id) {
                Ok(message) => {
                    self.locked.insert(id.clone());
                    let tag = DeliveryTag::entry(id.as_str());
                    return Ok(Step::Received(message, tag));
                }
                Err(e) => {
                    warn!(entry = %id, error = %e, "skipping unreadable entry");
                    if let Err(unlock_err) = self.dirq.unlock(&id) {
                        warn!(entry = %id, error = %unlock_err, "failed to release entry");
                    }
                    self.skipped.insert(id);
                }
            }
        }
    }

    async fn ack(&mut self, tag: &DeliveryTag) -> Result<(), EngineError> {
        if let Some(id) = Self::entry_id(tag) {
            if self.remove {
                self.dirq.remove(&id)?;
            } else {
                self.dirq.unlock(&id)?;
            }
            self.locked.remove(&id);
        }
        Ok(())
    }

    async fn nack(&mut self, tag: &DeliveryTag) -> Result<(), EngineError> {
        if let Some(id) = Self::entry_id(tag) {
            self.dirq.unlock(&id)?;
            self.locked.remove(&id);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.batch.clear();
        Ok(())
    }
}

impl Drop for DirQueueSource {
    fn drop(&mut self) {
        // Unresolved locks go back to ready so another run can redeliver.
        for id in self.locked.drain() {
            if let Err(e) = self.dirq.unlock(&id) {
                warn!(entry = %id, error = %e, "failed to release entry on drop");
            }
        }
    }
}
