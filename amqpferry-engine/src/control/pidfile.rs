//! PID-file control interface.
//!
//! The PID file signals a running instance and doubles as the control
//! channel: a foreign process requests graceful termination by writing the
//! `quit` sentinel into it, and a status query reads the pid and start
//! time back out. The file holds two lines, the pid and the RFC3339 start
//! time; the owning instance removes it on drop.

// Layer 1: Standard library imports
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

/// Sentinel value a foreign process writes to request termination.
pub const QUIT_SENTINEL: &str = "quit";

/// PID-file errors.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Filesystem operation failed.
    #[error("pid file I/O error at {path}: {source}")]
    Io {
        /// The PID file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Another live instance already holds the PID file.
    #[error("already running with pid {pid} (pid file {path})")]
    AlreadyRunning {
        /// Pid of the running instance.
        pid: u32,
        /// The PID file path.
        path: PathBuf,
    },
}

impl ControlError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidStatus {
    /// An instance is running.
    Running {
        /// Its pid.
        pid: u32,
        /// Time since it wrote the PID file.
        uptime: Duration,
    },
    /// No instance is running (no file, a stale file, or a pending quit).
    Stopped,
}

/// Exclusive handle on the PID file, held for the process lifetime.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim the PID file, writing this process's pid and start time.
    ///
    /// A file left by a live instance is an error; one left by a dead
    /// instance is taken over.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, ControlError> {
        let path = path.into();
        if let Some((pid, _)) = read_contents(&path)? {
            if pid_alive(pid) {
                return Err(ControlError::AlreadyRunning { pid, path });
            }
            warn!(path = %path.display(), stale_pid = pid, "taking over stale pid file");
        }
        let body = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
        fs::write(&path, body).map_err(|e| ControlError::io(&path, e))?;
        Ok(Self { path })
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when a foreign process has written the quit sentinel.
    pub fn quit_requested(&self) -> bool {
        matches!(fs::read_to_string(&self.path), Ok(body) if body.trim() == QUIT_SENTINEL)
    }

    /// Write the quit sentinel into an existing PID file.
    pub fn request_quit(path: impl AsRef<Path>) -> Result<(), ControlError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ControlError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no pid file"),
            ));
        }
        fs::write(path, QUIT_SENTINEL).map_err(|e| ControlError::io(path, e))
    }

    /// Query running/stopped state plus uptime.
    pub fn status(path: impl AsRef<Path>) -> Result<PidStatus, ControlError> {
        let path = path.as_ref();
        match read_contents(path)? {
            Some((pid, started)) if pid_alive(pid) => {
                let uptime = Utc::now()
                    .signed_duration_since(started)
                    .to_std()
                    .unwrap_or_default();
                Ok(PidStatus::Running { pid, uptime })
            }
            _ => Ok(PidStatus::Stopped),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}

fn read_contents(path: &Path) -> Result<Option<(u32, DateTime<Utc>)>, ControlError> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ControlError::io(path, e)),
    };
    if body.trim() == QUIT_SENTINEL {
        return Ok(None);
    }
    let mut lines = body.lines();
    let pid = match lines.next().and_then(|l| l.trim().parse::<u32>().ok()) {
        Some(pid) => pid,
        None => return Ok(None),
    };
    let started = lines
        .next()
        .and_then(|l| DateTime::parse_from_rfc3339(l.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Ok(Some((pid, started)))
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // kill(0) would signal our own process group; treat it as not a pid.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // The process exists but belongs to someone else.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a liveness probe, assume the holder is alive.
    true
}
