//! Durable read-position checkpoints.
//!
//! A checkpoint records the last file position known to correspond to
//! fully delivered content: the watched path, its identity token, and the
//! byte offset just past the last delivered line. It is read once at
//! startup and rewritten after each confirmed delivery.
//!
//! Writes are atomic (temp file in the same directory, then rename), so a
//! restart never observes a partially written record. A record that fails
//! to parse is corrupt and treated as a fatal startup error rather than
//! silently starting from an unknown position.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tailer::FileIdentity;

/// Last delivered position for one watched file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Path of the log file this checkpoint belongs to.
    pub log_path: PathBuf,
    /// Identity of the file the offset refers to.
    pub identity: FileIdentity,
    /// Byte offset just past the last delivered line.
    pub offset: u64,
    /// When the checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Build a checkpoint for a freshly delivered line.
    pub fn new(log_path: impl Into<PathBuf>, identity: FileIdentity, offset: u64) -> Self {
        Self {
            log_path: log_path.into(),
            identity,
            offset,
            updated_at: Utc::now(),
        }
    }
}

/// Checkpoint store errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the checkpoint file failed.
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        /// Checkpoint file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The record on disk is not valid JSON — fatal at startup, since
    /// the real read position is unknown.
    #[error("checkpoint record at {path} is corrupt: {source}")]
    Corrupt {
        /// Checkpoint file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed checkpoint store, one JSON record per file.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted checkpoint, if any.
    ///
    /// Returns `Ok(None)` when no checkpoint has ever been written, and
    /// [`CheckpointError::Corrupt`] when the record cannot be parsed.
    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let checkpoint =
            serde_json::from_str(&contents).map_err(|e| CheckpointError::Corrupt {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(Some(checkpoint))
    }

    /// Persist a checkpoint atomically.
    ///
    /// The record is written to a sibling temp file and renamed into
    /// place, so readers see either the old record or the new one, never
    /// a torn write.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(checkpoint).map_err(|e| {
            CheckpointError::Corrupt {
                path: self.path.clone(),
                source: e,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path).map_err(io_err)?;
            tmp.write_all(json.as_bytes()).map_err(io_err)?;
            tmp.sync_all().map_err(io_err)?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}
