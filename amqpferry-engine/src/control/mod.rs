//! Process control: PID file and quit signalling.

pub mod pidfile;
pub mod quit;

// Re-exports
pub use pidfile::{ControlError, PidFile, PidStatus, QUIT_SENTINEL};
pub use quit::{spawn_signal_listener, QuitFlag};
