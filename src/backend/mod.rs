//! Backend Module
//!
//! The embedded key-value engine the store is built on.
//!
//! ## Responsibilities
//! - Begin read (snapshot) and read-write transactions
//! - Point reads and writes inside a transaction
//! - Ordered forward cursors over a snapshot
//! - Keep user data and store metadata in disjoint keyspaces
//!
//! ## Contract
//! ```text
//! KvEngine ──begin_read──▶ ReadTxn ──cursor──▶ Cursor (seek / next)
//!     │                       └── get
//!     └─────begin_write─▶ WriteTxn (get / set / delete) ──▶ commit | discard
//! ```
//!
//! The engine is closed by dropping it. Transactions that are dropped without
//! `commit` are discarded.

mod redb_engine;

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

pub use redb_engine::{RedbCursor, RedbEngine, RedbReadTxn, RedbWriteTxn};

/// A key-value pair produced by a cursor
pub type KeyValue = (Bytes, Bytes);

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Partition of the engine namespace
///
/// Each keyspace is stored separately, so no user key can address or
/// enumerate an entry of the metadata keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    /// Application keys and values
    User,

    /// Store bookkeeping (the checkpoint offset)
    Metadata,
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Keyspace::User => f.write_str("user"),
            Keyspace::Metadata => f.write_str("metadata"),
        }
    }
}

/// Errors reported by an engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("commit failed: {0}")]
    Commit(String),

    /// Another transaction committed a conflicting write first
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// An embedded engine offering snapshot-isolated transactions
///
/// Implementations must be thread-safe; the store shares one engine across
/// all callers.
pub trait KvEngine: Send + Sync {
    type Read: ReadTxn;
    type Write: WriteTxn;

    /// Begin a read-only transaction over a snapshot taken now
    fn begin_read(&self) -> EngineResult<Self::Read>;

    /// Begin a read-write transaction
    fn begin_write(&self) -> EngineResult<Self::Write>;

    /// Make every keyspace ready for use. Must be idempotent.
    fn prepare(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// A read-only view of one snapshot
pub trait ReadTxn {
    /// Cursor over this snapshot; keeps the snapshot alive while it exists
    type Cursor: Cursor;

    fn get(&self, space: Keyspace, key: &[u8]) -> EngineResult<Option<Bytes>>;

    fn contains(&self, space: Keyspace, key: &[u8]) -> EngineResult<bool> {
        Ok(self.get(space, key)?.is_some())
    }

    /// Open an ordered cursor over one keyspace, positioned before the first key
    fn cursor(&self, space: Keyspace) -> EngineResult<Self::Cursor>;

    /// Release the snapshot
    fn discard(self);
}

/// A read-write transaction
pub trait WriteTxn {
    fn get(&self, space: Keyspace, key: &[u8]) -> EngineResult<Option<Bytes>>;

    fn set(&mut self, space: Keyspace, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Returns whether the key existed
    fn delete(&mut self, space: Keyspace, key: &[u8]) -> EngineResult<bool>;

    /// Make all writes durable and visible
    fn commit(self) -> EngineResult<()>;

    /// Drop all writes
    fn discard(self);
}

/// Forward cursor over a snapshot, ascending by key
pub trait Cursor {
    /// Position at the first key >= `key`
    fn seek(&mut self, key: &[u8]) -> EngineResult<Option<KeyValue>>;

    /// Advance one entry; from the initial position this is the first entry
    fn next(&mut self) -> EngineResult<Option<KeyValue>>;
}
