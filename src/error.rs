//! Error types for kvstate
//!
//! Provides a unified error type for all store operations. Engine failures
//! are wrapped with the operation and key that triggered them.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::{EngineError, Keyspace};

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store operation that failed, carried inside engine-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Has,
    Get,
    Set,
    Delete,
    GetOffset,
    SetOffset,
    Iterate,
    Seek,
    Next,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Has => "has",
            Op::Get => "get",
            Op::Set => "set",
            Op::Delete => "delete",
            Op::GetOffset => "get_offset",
            Op::SetOffset => "set_offset",
            Op::Iterate => "iterate",
            Op::Seek => "seek",
            Op::Next => "next",
        };
        f.write_str(name)
    }
}

/// The key an operation was working on, for error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorKey {
    pub space: Keyspace,
    pub key: Vec<u8>,
}

impl ErrorKey {
    pub fn new(space: Keyspace, key: &[u8]) -> Self {
        Self {
            space,
            key: key.to_vec(),
        }
    }
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.space, String::from_utf8_lossy(&self.key))
    }
}

/// Unified error type for kvstate operations
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("{op} on {key}: write conflict: {message}")]
    Conflict {
        op: Op,
        key: ErrorKey,
        message: String,
    },

    #[error("{op} on {key}: {source}")]
    Io {
        op: Op,
        key: ErrorKey,
        #[source]
        source: EngineError,
    },

    /// The engine could not be opened or prepared; `path` is `None` for
    /// engines without a backing file
    #[error("open {}: {source}", open_target(.path))]
    Open {
        path: Option<PathBuf>,
        #[source]
        source: EngineError,
    },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store is closed")]
    Closed,

    #[error("Iterator used after release")]
    UseAfterRelease,

    // -------------------------------------------------------------------------
    // Checkpoint Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap an engine error with the failing operation and key
    ///
    /// Conflicts keep their own variant so callers can retry them.
    pub fn engine(op: Op, space: Keyspace, key: &[u8], err: EngineError) -> Self {
        let key = ErrorKey::new(space, key);
        match err {
            EngineError::Conflict(message) => StoreError::Conflict { op, key, message },
            source => StoreError::Io { op, key, source },
        }
    }

    /// Wrap an engine error raised while opening the database
    pub fn open(path: Option<&Path>, source: EngineError) -> Self {
        StoreError::Open {
            path: path.map(Path::to_path_buf),
            source,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

fn open_target(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "engine".to_string(),
    }
}
