//! Transfer engine: controller, stop conditions, statistics, errors.

pub mod controller;
pub mod error;
pub mod stats;
pub mod stop;

// Re-exports
pub use controller::{Controller, RunReport};
pub use error::EngineError;
pub use stats::PipelineStats;
pub use stop::{StopConditions, StopReason};
