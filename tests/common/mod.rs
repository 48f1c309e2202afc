//! Shared helpers for integration tests
//!
//! - Temp-dir backed redb stores
//! - Log output controlled by RUST_LOG
//! - `MemEngine`: an optimistic in-memory engine with fault injection, for
//!   the error paths redb never produces (conflicts, failing reads)

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use bytes::Bytes;
use kvstate::backend::{
    Cursor, EngineError, EngineResult, KeyValue, Keyspace, KvEngine, ReadTxn, WriteTxn,
};
use kvstate::{Store, StoreConfig};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

// =============================================================================
// Setup
// =============================================================================

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt().with_env_filter(filter).with_test_writer().init();
    });
}

pub fn setup_temp_store() -> (TempDir, Store) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::builder()
        .path(temp_dir.path().join("partition-0.redb"))
        .build();
    let store = Store::with_config(config).unwrap();
    (temp_dir, store)
}

pub fn reopen(temp_dir: &TempDir) -> Store {
    Store::open_path(temp_dir.path().join("partition-0.redb")).unwrap()
}

// =============================================================================
// In-Memory Engine
// =============================================================================

type Table = BTreeMap<Vec<u8>, Bytes>;

#[derive(Clone, Default)]
struct Snapshot {
    user: Arc<Table>,
    metadata: Arc<Table>,
    version: u64,
}

impl Snapshot {
    fn table(&self, space: Keyspace) -> &Arc<Table> {
        match space {
            Keyspace::User => &self.user,
            Keyspace::Metadata => &self.metadata,
        }
    }

    fn table_mut(&mut self, space: Keyspace) -> &mut Table {
        match space {
            Keyspace::User => Arc::make_mut(&mut self.user),
            Keyspace::Metadata => Arc::make_mut(&mut self.metadata),
        }
    }
}

/// Faults the next operations should hit
#[derive(Default)]
pub struct Faults {
    /// Every `get` fails with a storage error
    pub fail_reads: AtomicBool,
    /// Every commit reports a conflict
    pub conflict_on_commit: AtomicBool,
    /// Cursors fail once they have produced this many entries (0 = never)
    pub fail_cursor_after: AtomicUsize,
}

#[derive(Default)]
struct Shared {
    committed: Mutex<Snapshot>,
    faults: Faults,
    open_reads: AtomicUsize,
    open_writes: AtomicUsize,
}

/// Snapshot-isolated engine with first-committer-wins conflict detection
///
/// Clones share the same data, so a test can keep a handle after giving
/// one to a `Store`.
#[derive(Clone, Default)]
pub struct MemEngine {
    shared: Arc<Shared>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &Faults {
        &self.shared.faults
    }

    /// Transactions begun and not yet committed or discarded
    pub fn open_transactions(&self) -> usize {
        self.shared.open_reads.load(Ordering::SeqCst) + self.shared.open_writes.load(Ordering::SeqCst)
    }

    /// Write directly, bypassing fault injection
    pub fn poke(&self, space: Keyspace, key: &[u8], value: &[u8]) {
        let mut committed = self.shared.committed.lock();
        committed
            .table_mut(space)
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        committed.version += 1;
    }
}

impl KvEngine for MemEngine {
    type Read = MemReadTxn;
    type Write = MemWriteTxn;

    fn begin_read(&self) -> EngineResult<MemReadTxn> {
        self.shared.open_reads.fetch_add(1, Ordering::SeqCst);
        Ok(MemReadTxn {
            snapshot: self.shared.committed.lock().clone(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn begin_write(&self) -> EngineResult<MemWriteTxn> {
        self.shared.open_writes.fetch_add(1, Ordering::SeqCst);
        Ok(MemWriteTxn {
            pending: self.shared.committed.lock().clone(),
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct MemReadTxn {
    snapshot: Snapshot,
    shared: Arc<Shared>,
}

impl Drop for MemReadTxn {
    fn drop(&mut self) {
        self.shared.open_reads.fetch_sub(1, Ordering::SeqCst);
    }
}

fn read(shared: &Shared, snapshot: &Snapshot, space: Keyspace, key: &[u8]) -> EngineResult<Option<Bytes>> {
    if shared.faults.fail_reads.load(Ordering::SeqCst) {
        return Err(EngineError::Storage("injected read failure".to_string()));
    }
    Ok(snapshot.table(space).get(key).cloned())
}

impl ReadTxn for MemReadTxn {
    type Cursor = MemCursor;

    fn get(&self, space: Keyspace, key: &[u8]) -> EngineResult<Option<Bytes>> {
        read(&self.shared, &self.snapshot, space, key)
    }

    fn cursor(&self, space: Keyspace) -> EngineResult<MemCursor> {
        Ok(MemCursor {
            table: Arc::clone(self.snapshot.table(space)),
            position: Position::Start,
            produced: 0,
            fail_after: self.shared.faults.fail_cursor_after.load(Ordering::SeqCst),
        })
    }

    fn discard(self) {}
}

pub struct MemWriteTxn {
    pending: Snapshot,
    shared: Arc<Shared>,
}

impl Drop for MemWriteTxn {
    fn drop(&mut self) {
        self.shared.open_writes.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WriteTxn for MemWriteTxn {
    fn get(&self, space: Keyspace, key: &[u8]) -> EngineResult<Option<Bytes>> {
        read(&self.shared, &self.pending, space, key)
    }

    fn set(&mut self, space: Keyspace, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.pending
            .table_mut(space)
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn delete(&mut self, space: Keyspace, key: &[u8]) -> EngineResult<bool> {
        Ok(self.pending.table_mut(space).remove(key).is_some())
    }

    fn commit(mut self) -> EngineResult<()> {
        if self.shared.faults.conflict_on_commit.load(Ordering::SeqCst) {
            return Err(EngineError::Conflict("injected conflict".to_string()));
        }

        let mut committed = self.shared.committed.lock();
        if committed.version != self.pending.version {
            return Err(EngineError::Conflict(format!(
                "snapshot version {} superseded by {}",
                self.pending.version, committed.version
            )));
        }

        self.pending.version += 1;
        *committed = std::mem::take(&mut self.pending);
        Ok(())
    }

    fn discard(self) {}
}

enum Position {
    Start,
    At(Vec<u8>),
    End,
}

pub struct MemCursor {
    table: Arc<Table>,
    position: Position,
    produced: usize,
    fail_after: usize,
}

impl MemCursor {
    fn land(&mut self, entry: Option<(&Vec<u8>, &Bytes)>) -> EngineResult<Option<KeyValue>> {
        let Some((key, value)) = entry else {
            self.position = Position::End;
            return Ok(None);
        };

        if self.fail_after > 0 && self.produced >= self.fail_after {
            return Err(EngineError::Storage("injected cursor failure".to_string()));
        }

        self.produced += 1;
        let entry = (Bytes::copy_from_slice(key), value.clone());
        self.position = Position::At(key.clone());
        Ok(Some(entry))
    }
}

impl Cursor for MemCursor {
    fn seek(&mut self, key: &[u8]) -> EngineResult<Option<KeyValue>> {
        let table = Arc::clone(&self.table);
        let entry = table
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next();
        self.land(entry)
    }

    fn next(&mut self) -> EngineResult<Option<KeyValue>> {
        let table = Arc::clone(&self.table);
        let entry = match &self.position {
            Position::Start => table.iter().next(),
            Position::At(last) => table
                .range::<[u8], _>((Bound::Excluded(last.as_slice()), Bound::Unbounded))
                .next(),
            Position::End => None,
        };
        self.land(entry)
    }
}

/// Store over a fresh `MemEngine`, plus a handle to the same engine
pub fn setup_mem_store() -> (MemEngine, Store<MemEngine>) {
    init_tracing();
    let engine = MemEngine::new();
    let store = Store::new(engine.clone());
    store.open().unwrap();
    (engine, store)
}
