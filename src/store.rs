//! Store Module
//!
//! The storage adapter a stream processor holds for each partition's local
//! state.
//!
//! ## Responsibilities
//! - Point reads and writes on user keys, each in its own transaction scope
//! - Persist and load the processing checkpoint (offset)
//! - Track whether recovery has finished for this process
//! - Hand out snapshot iterators over user keys
//! - Explicit open/close lifecycle over an owned engine handle

use std::path::Path;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{EngineError, Keyspace, KvEngine, ReadTxn, RedbEngine, WriteTxn};
use crate::checkpoint::{CheckpointRecord, RecoveryState, OFFSET_KEY};
use crate::config::StoreConfig;
use crate::error::{Op, Result, StoreError};
use crate::iterator::{Bounds, RangeIterator, Snapshot, SnapshotSlot};
use crate::txn;

/// Key-value store for one partition
///
/// ## Concurrency Model
///
/// - Every point operation opens and resolves its own transaction scope, so
///   calls from many threads never share a transaction
/// - `engine`: `close` empties the slot and every later call sees `Closed`
/// - `snapshots`: read scopes held by live iterators; `close` releases them
///   so nothing keeps the engine open afterwards
/// - Write conflicts reported by the engine come back as
///   `StoreError::Conflict`; nothing is retried here
pub struct Store<E: KvEngine = RedbEngine> {
    /// Engine handle, `None` once closed
    engine: RwLock<Option<Arc<E>>>,

    /// Snapshots of iterators that have not been released
    snapshots: Mutex<Vec<Weak<SnapshotSlot<E>>>>,

    /// Process-local recovery flag
    recovery: RecoveryState,
}

impl<E: KvEngine> std::fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl<E: KvEngine> Store<E> {
    /// Wrap an already-open engine
    ///
    /// Call [`Store::open`] before use to make sure the engine is prepared.
    pub fn new(engine: E) -> Self {
        Self {
            engine: RwLock::new(Some(Arc::new(engine))),
            snapshots: Mutex::new(Vec::new()),
            recovery: RecoveryState::new(),
        }
    }

    /// Current engine handle, or `Closed`
    pub(crate) fn engine(&self) -> Result<Arc<E>> {
        self.engine.read().as_ref().cloned().ok_or(StoreError::Closed)
    }

    /// Open an iterator snapshot that `close` can reclaim
    ///
    /// Registered under the engine read lock, so a concurrent `close` either
    /// sees it or the call fails with `Closed`.
    pub(crate) fn track_snapshot(&self, at: &[u8]) -> Result<Arc<SnapshotSlot<E>>> {
        let engine = self.engine.read();
        let engine = engine.as_ref().ok_or(StoreError::Closed)?;
        let snapshot = Snapshot::begin(&**engine)
            .map_err(|e| fail(Op::Iterate, Keyspace::User, at, e))?;

        let slot = Arc::new(Mutex::new(Some(snapshot)));
        let mut live = self.snapshots.lock();
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(&slot));
        Ok(slot)
    }

    /// Release every snapshot still held by an iterator
    fn release_snapshots(&self) -> usize {
        let live: Vec<_> = self.snapshots.lock().drain(..).collect();
        let mut released = 0;
        for slot in live.iter().filter_map(Weak::upgrade) {
            if let Some(snapshot) = slot.lock().take() {
                snapshot.release();
                released += 1;
            }
        }
        released
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Prepare the engine's keyspaces. Safe to call repeatedly.
    pub fn open(&self) -> Result<()> {
        let engine = self.engine()?;
        engine
            .prepare()
            .map_err(|e| StoreError::open(None, e))?;
        debug!("store opened");
        Ok(())
    }

    /// Release the engine handle
    ///
    /// Idempotent. Snapshots of live iterators are released too, so the
    /// engine is dropped as soon as in-flight point operations finish. Those
    /// iterators report `Closed` when positioned.
    pub fn close(&self) -> Result<()> {
        let mut slot = self.engine.write();
        let Some(engine) = slot.take() else {
            return Ok(());
        };

        let released = self.release_snapshots();
        drop(engine);
        drop(slot);

        info!(released_iterators = released, "store closed");
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.engine.read().is_none()
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Whether `key` exists
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        let engine = self.engine()?;
        txn::view(&*engine, |tx| tx.contains(Keyspace::User, key))
            .map_err(|e| fail(Op::Has, Keyspace::User, key, e))
    }

    /// Value stored at `key`, or `None` if the key is absent
    ///
    /// The returned buffer is owned; it does not alias engine memory.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let engine = self.engine()?;
        txn::view(&*engine, |tx| ReadTxn::get(tx, Keyspace::User, key))
            .map_err(|e| fail(Op::Get, Keyspace::User, key, e))
    }

    /// Store `value` at `key`; durable once this returns `Ok`
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let engine = self.engine()?;
        txn::update(&*engine, |tx| tx.set(Keyspace::User, key, value))
            .map_err(|e| fail(Op::Set, Keyspace::User, key, e))
    }

    /// Remove `key`. Removing an absent key succeeds.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let engine = self.engine()?;
        txn::update(&*engine, |tx| tx.delete(Keyspace::User, key))
            .map_err(|e| fail(Op::Delete, Keyspace::User, key, e))?;
        Ok(())
    }

    // =========================================================================
    // Checkpoint
    // =========================================================================

    /// Stored offset, or `default` if no checkpoint was ever written
    pub fn get_offset(&self, default: i64) -> Result<i64> {
        let engine = self.engine()?;
        let stored = txn::view(&*engine, |tx| ReadTxn::get(tx, Keyspace::Metadata, OFFSET_KEY))
            .map_err(|e| fail(Op::GetOffset, Keyspace::Metadata, OFFSET_KEY, e))?;

        match stored {
            Some(bytes) => Ok(CheckpointRecord::decode(&bytes)?.offset),
            None => Ok(default),
        }
    }

    /// Persist `offset` as the checkpoint
    pub fn set_offset(&self, offset: i64) -> Result<()> {
        let engine = self.engine()?;
        let record = CheckpointRecord::new(offset).encode()?;

        let previous = txn::update(&*engine, |tx| {
            let previous = WriteTxn::get(tx, Keyspace::Metadata, OFFSET_KEY)?;
            tx.set(Keyspace::Metadata, OFFSET_KEY, &record)?;
            Ok(previous)
        })
        .map_err(|e| fail(Op::SetOffset, Keyspace::Metadata, OFFSET_KEY, e))?;

        match previous.map(|bytes| CheckpointRecord::decode(&bytes)) {
            Some(Ok(prev)) if prev.offset > offset => {
                warn!(previous = prev.offset, offset, "checkpoint offset moved backwards");
            }
            Some(Err(e)) => {
                warn!(error = %e, offset, "overwrote unreadable checkpoint");
            }
            _ => {}
        }

        debug!(offset, "checkpoint written");
        Ok(())
    }

    /// Record that recovery has finished for the rest of this process
    pub fn mark_recovered(&self) -> Result<()> {
        self.engine()?;
        if self.recovery.mark() {
            info!("store recovered");
        }
        Ok(())
    }

    /// Whether `mark_recovered` has been called in this process
    pub fn recovered(&self) -> bool {
        self.recovery.is_recovered()
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterate over every user key in ascending order
    pub fn iterator(&self) -> Result<RangeIterator<'_, E>> {
        RangeIterator::new(self, Bounds::all())
    }

    /// Iterate over user keys `k` with `start <= k <= limit`
    pub fn iterator_with_range(&self, start: &[u8], limit: &[u8]) -> Result<RangeIterator<'_, E>> {
        RangeIterator::new(self, Bounds::inclusive(start, limit))
    }

    /// Iterate with optional lower and upper bounds
    pub fn iterator_with_bounds(&self, bounds: Bounds) -> Result<RangeIterator<'_, E>> {
        RangeIterator::new(self, bounds)
    }
}

// =============================================================================
// Redb Constructors
// =============================================================================

impl Store<RedbEngine> {
    /// Open or create a redb-backed store
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let engine =
            RedbEngine::open(&config).map_err(|e| StoreError::open(Some(&config.path), e))?;

        let store = Self::new(engine);
        store.open()?;
        Ok(store)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the given database file
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = StoreConfig::builder().path(path.as_ref()).build();
        Self::with_config(config)
    }

    /// A store that keeps everything in memory
    pub fn in_memory() -> Result<Self> {
        let engine =
            RedbEngine::in_memory().map_err(|e| StoreError::open(None, e))?;
        let store = Self::new(engine);
        store.open()?;
        Ok(store)
    }
}

/// Wrap an engine error, logging conflicts
fn fail(op: Op, space: Keyspace, key: &[u8], err: EngineError) -> StoreError {
    let err = StoreError::engine(op, space, key, err);
    if err.is_retryable() {
        warn!(error = %err, "write conflict");
    }
    err
}
