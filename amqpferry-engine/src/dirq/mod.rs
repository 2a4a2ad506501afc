//! On-disk message queue directory.
//!
//! Entries are single files in one flat directory. A producer writes the
//! JSON envelope to `<name>.tmp`, fsyncs it and renames it to `<name>.msg`;
//! the rename is what makes the entry visible, so a reader never observes a
//! half-written entry. A consumer claims an entry by renaming `<name>.msg`
//! to `<name>.lck`, and either deletes the `.lck` file (acknowledged with
//! `remove`) or renames it back (released). Names embed a microsecond
//! timestamp so a lexical sort yields arrival order.
//!
//! Locks left behind by a crashed consumer are reclaimed by age.

// Layer 1: Standard library imports
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

// Layer 2: Third-party crate imports
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::message::Message;

const READY_EXT: &str = "msg";
const LOCK_EXT: &str = "lck";
const TEMP_EXT: &str = "tmp";

/// Queue directory errors.
#[derive(Debug, Error)]
pub enum DirqError {
    /// Filesystem operation failed.
    #[error("queue directory I/O error at {path}: {source}")]
    Io {
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An entry file exists but does not hold a valid envelope.
    #[error("malformed queue entry {path}: {source}")]
    Malformed {
        /// Path of the offending entry.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl DirqError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Identifier of one queue entry (the file name without extension).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(String);

impl EntryId {
    /// The bare entry name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle on a queue directory.
#[derive(Debug, Clone)]
pub struct QueueDir {
    root: PathBuf,
}

impl QueueDir {
    /// Open a queue directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DirqError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| DirqError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, id: &EntryId, ext: &str) -> PathBuf {
        self.root.join(format!("{}.{ext}", id.0))
    }

    /// Append a message as a new entry. The entry file and the directory are
    /// fsynced before the entry becomes visible under its final name.
    pub fn add(&self, message: &Message) -> Result<EntryId, DirqError> {
        let id = EntryId(format!(
            "{:016x}{}",
            Utc::now().timestamp_micros().max(0),
            Uuid::new_v4().simple()
        ));
        let tmp = self.entry_path(&id, TEMP_EXT);
        let ready = self.entry_path(&id, READY_EXT);

        let payload =
            serde_json::to_vec(message).map_err(|e| DirqError::Malformed {
                path: tmp.clone(),
                source: e,
            })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|e| DirqError::io(&tmp, e))?;
        file.write_all(&payload).map_err(|e| DirqError::io(&tmp, e))?;
        file.sync_all().map_err(|e| DirqError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &ready).map_err(|e| DirqError::io(&ready, e))?;
        self.sync_dir()?;
        Ok(id)
    }

    /// List ready entries in arrival order.
    pub fn scan(&self) -> Result<Vec<EntryId>, DirqError> {
        let mut ids = Vec::new();
        let dir = fs::read_dir(&self.root).map_err(|e| DirqError::io(&self.root, e))?;
        for item in dir {
            let item = item.map_err(|e| DirqError::io(&self.root, e))?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(READY_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(EntryId(stem.to_string()));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Number of ready entries.
    pub fn len(&self) -> Result<usize, DirqError> {
        Ok(self.scan()?.len())
    }

    /// True when no ready entries exist.
    pub fn is_empty(&self) -> Result<bool, DirqError> {
        Ok(self.scan()?.is_empty())
    }

    /// Claim an entry. Returns `false` when the entry is no longer ready
    /// (claimed by another consumer or removed).
    pub fn lock(&self, id: &EntryId) -> Result<bool, DirqError> {
        let ready = self.entry_path(id, READY_EXT);
        let lock = self.entry_path(id, LOCK_EXT);
        match fs::rename(&ready, &lock) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DirqError::io(&ready, e)),
        }
    }

    /// Release a claimed entry back to ready state.
    pub fn unlock(&self, id: &EntryId) -> Result<(), DirqError> {
        let lock = self.entry_path(id, LOCK_EXT);
        let ready = self.entry_path(id, READY_EXT);
        match fs::rename(&lock, &ready) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DirqError::io(&lock, e)),
        }
    }

    /// Read the message held by a claimed entry.
    pub fn read(&self, id: &EntryId) -> Result<Message, DirqError> {
        let lock = self.entry_path(id, LOCK_EXT);
        let bytes = fs::read(&lock).map_err(|e| DirqError::io(&lock, e))?;
        serde_json::from_slice(&bytes).map_err(|e| DirqError::Malformed {
            path: lock,
            source: e,
        })
    }

    /// Delete a claimed entry permanently.
    pub fn remove(&self, id: &EntryId) -> Result<(), DirqError> {
        let lock = self.entry_path(id, LOCK_EXT);
        match fs::remove_file(&lock) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DirqError::io(&lock, e)),
        }
    }

    /// Release locks older than `max_age`, returning how many were
    /// reclaimed. Used to recover entries claimed by a crashed consumer.
    pub fn reclaim_stale_locks(&self, max_age: Duration) -> Result<usize, DirqError> {
        let mut reclaimed = 0;
        let dir = fs::read_dir(&self.root).map_err(|e| DirqError::io(&self.root, e))?;
        let now = SystemTime::now();
        for item in dir {
            let item = item.map_err(|e| DirqError::io(&self.root, e))?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXT) {
                continue;
            }
            let modified = item
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| DirqError::io(&path, e))?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.unlock(&EntryId(stem.to_string()))?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    fn sync_dir(&self) -> Result<(), DirqError> {
        // Directory fsync makes the rename durable on Unix filesystems.
        #[cfg(unix)]
        {
            let dir = File::open(&self.root).map_err(|e| DirqError::io(&self.root, e))?;
            dir.sync_all().map_err(|e| DirqError::io(&self.root, e))?;
        }
        Ok(())
    }
}
