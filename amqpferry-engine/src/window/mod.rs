//! Bounded FIFO window of in-flight messages.
//!
//! The window caps the number of received-but-unacknowledged messages and
//! sequences acknowledgments: tags are released to the source strictly in
//! the order their messages were received, which keeps cumulative broker
//! acks safe and bounds engine memory.

// Layer 1: Standard library imports
use std::collections::VecDeque;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::source::DeliveryTag;

/// Resolution recorded for an in-flight entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The message was handed to the sink and its token resolved.
    Sent,
    /// The transform dropped the message (or it failed transformation).
    Dropped,
}

/// State of one in-flight entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightState {
    /// Awaiting a send-token resolution or a drop decision.
    Pending,
    /// Resolved; eligible for FIFO drain.
    Resolved(Outcome),
}

/// Window operation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// The window already holds `capacity` unresolved-or-undrained entries.
    #[error("window full: capacity={capacity}")]
    Full {
        /// Configured window size.
        capacity: usize,
    },

    /// `complete` named a sequence number that is not in the window.
    #[error("unknown window sequence: {0}")]
    UnknownSeq(u64),

    /// `complete` named an entry that was already resolved.
    #[error("window sequence {0} already resolved")]
    AlreadyResolved(u64),
}

#[derive(Debug)]
struct InFlight {
    seq: u64,
    tag: DeliveryTag,
    state: InFlightState,
}

/// Bounded FIFO of in-flight entries.
///
/// `admit` appends a Pending entry and hands back its receipt sequence;
/// `complete` resolves an entry; `drain` pops resolved entries from the
/// head only, so acknowledgments always leave in receipt order. Entries
/// hold contiguous sequence numbers, which makes `complete` O(1).
///
/// # Examples
///
/// ```rust
/// use amqpferry_engine::window::{Outcome, Window};
/// use amqpferry_engine::source::DeliveryTag;
///
/// let mut window = Window::new(4);
/// let a = window.admit(DeliveryTag::memory(1)).unwrap();
/// let b = window.admit(DeliveryTag::memory(2)).unwrap();
///
/// // Resolving out of order holds the younger entry back.
/// window.complete(b, Outcome::Sent).unwrap();
/// assert!(window.drain().is_empty());
///
/// window.complete(a, Outcome::Sent).unwrap();
/// assert_eq!(window.drain().len(), 2);
/// assert!(window.is_empty());
/// ```
#[derive(Debug)]
pub struct Window {
    entries: VecDeque<InFlight>,
    capacity: usize,
    next_seq: u64,
}

impl Window {
    /// Create a window with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a new Pending entry for `tag`, returning its receipt sequence.
    pub fn admit(&mut self, tag: DeliveryTag) -> Result<u64, WindowError> {
        if self.entries.len() >= self.capacity {
            return Err(WindowError::Full {
                capacity: self.capacity,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(InFlight {
            seq,
            tag,
            state: InFlightState::Pending,
        });
        Ok(seq)
    }

    /// Resolve the entry with receipt sequence `seq`.
    pub fn complete(&mut self, seq: u64, outcome: Outcome) -> Result<(), WindowError> {
        let front = match self.entries.front() {
            Some(entry) => entry.seq,
            None => return Err(WindowError::UnknownSeq(seq)),
        };
        if seq < front || seq >= self.next_seq {
            return Err(WindowError::UnknownSeq(seq));
        }
        // Sequences in the deque are contiguous, so the offset is the index.
        let index = (seq - front) as usize;
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(WindowError::UnknownSeq(seq))?;
        match entry.state {
            InFlightState::Pending => {
                entry.state = InFlightState::Resolved(outcome);
                Ok(())
            }
            InFlightState::Resolved(_) => Err(WindowError::AlreadyResolved(seq)),
        }
    }

    /// Pop resolved entries from the head, returning their tags in FIFO
    /// order. Stops at the first entry that is still Pending.
    pub fn drain(&mut self) -> Vec<DeliveryTag> {
        let mut tags = Vec::new();
        while let Some(entry) = self.entries.front() {
            match entry.state {
                InFlightState::Resolved(_) => {
                    if let Some(entry) = self.entries.pop_front() {
                        tags.push(entry.tag);
                    }
                }
                InFlightState::Pending => break,
            }
        }
        tags
    }

    /// Number of entries currently held (Pending or awaiting drain).
    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when a further `admit` would fail.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}
