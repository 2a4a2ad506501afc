//! Message envelope and destination addressing.

pub mod destination;
pub mod envelope;

// Re-exports
pub use destination::{Destination, DestinationKind, DestinationParseError};
pub use envelope::{Message, DESTINATION_HEADER};
