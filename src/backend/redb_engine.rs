//! Redb backend
//!
//! Stores each keyspace in its own redb table inside a single database file.
//! Read transactions are MVCC snapshots, so cursors never observe writes
//! committed after they were opened.

use std::collections::VecDeque;
use std::fs;
use std::ops::Bound;

use bytes::Bytes;
use redb::{
    Database, Durability, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition,
    TableError, WriteTransaction,
};
use tracing::{debug, info};

use crate::config::{StoreConfig, SyncMode};
use crate::error::{Result, StoreError};

use super::{Cursor, EngineError, EngineResult, KeyValue, Keyspace, KvEngine, ReadTxn, WriteTxn};

/// Table holding application keys
const USER_TABLE: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("user_data");

/// Table holding store bookkeeping
const METADATA_TABLE: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("metadata");

const DEFAULT_BATCH_SIZE: usize = 256;

type BytesTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

fn table_for(space: Keyspace) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match space {
        Keyspace::User => USER_TABLE,
        Keyspace::Metadata => METADATA_TABLE,
    }
}

fn storage_err(e: redb::StorageError) -> EngineError {
    EngineError::Storage(e.to_string())
}

fn table_err(e: TableError) -> EngineError {
    EngineError::Table(e.to_string())
}

// =============================================================================
// Engine
// =============================================================================

/// Engine backed by a redb database
///
/// The database is closed when the engine is dropped. Readers never block;
/// writers are serialized by redb, so this backend never reports conflicts.
pub struct RedbEngine {
    db: Database,
    durability: Durability,
    batch_size: usize,
}

impl RedbEngine {
    /// Open or create the database file named by `config.path`
    pub fn open(config: &StoreConfig) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Open(e.to_string()))?;

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| EngineError::Open(e.to_string()))?;
            }
        }

        let mut builder = Database::builder();
        if let Some(cache_size) = config.cache_size {
            builder.set_cache_size(cache_size);
        }

        let db = builder
            .create(&config.path)
            .map_err(|e| EngineError::Open(e.to_string()))?;

        info!(path = %config.path.display(), "opened redb database");

        Ok(Self {
            db,
            durability: durability_for(config.sync_mode),
            batch_size: config.cursor_batch_size,
        })
    }

    /// Create a database that lives only in memory
    pub fn in_memory() -> EngineResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| EngineError::Open(e.to_string()))?;

        Ok(Self {
            db,
            durability: Durability::Immediate,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Set how many entries a cursor pulls per refill
    ///
    /// Zero is rejected with `Config`, the same as in [`StoreConfig::validate`].
    pub fn with_cursor_batch_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(StoreError::Config(
                "cursor_batch_size must be greater than zero".to_string(),
            ));
        }
        self.batch_size = size;
        Ok(self)
    }
}

fn durability_for(mode: SyncMode) -> Durability {
    match mode {
        SyncMode::Immediate => Durability::Immediate,
        SyncMode::Eventual => Durability::Eventual,
    }
}

impl KvEngine for RedbEngine {
    type Read = RedbReadTxn;
    type Write = RedbWriteTxn;

    fn begin_read(&self) -> EngineResult<RedbReadTxn> {
        let tx = self
            .db
            .begin_read()
            .map_err(|e| EngineError::Transaction(e.to_string()))?;
        Ok(RedbReadTxn {
            tx,
            batch_size: self.batch_size,
        })
    }

    fn begin_write(&self) -> EngineResult<RedbWriteTxn> {
        let mut tx = self
            .db
            .begin_write()
            .map_err(|e| EngineError::Transaction(e.to_string()))?;
        tx.set_durability(self.durability);
        Ok(RedbWriteTxn { tx })
    }

    fn prepare(&self) -> EngineResult<()> {
        let tx = self.begin_write()?;
        // Opening a table inside a write transaction creates it
        {
            tx.tx.open_table(USER_TABLE).map_err(table_err)?;
            tx.tx.open_table(METADATA_TABLE).map_err(table_err)?;
        }
        tx.commit()
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// Read-only snapshot transaction
pub struct RedbReadTxn {
    tx: ReadTransaction,
    batch_size: usize,
}

impl RedbReadTxn {
    /// A keyspace that was never written has no table yet; that reads as empty.
    fn table(&self, space: Keyspace) -> EngineResult<Option<BytesTable>> {
        match self.tx.open_table(table_for(space)) {
            Ok(table) => Ok(Some(table)),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(table_err(e)),
        }
    }
}

impl ReadTxn for RedbReadTxn {
    type Cursor = RedbCursor;

    fn get(&self, space: Keyspace, key: &[u8]) -> EngineResult<Option<Bytes>> {
        let Some(table) = self.table(space)? else {
            return Ok(None);
        };
        let value = table
            .get(key)
            .map_err(storage_err)?
            .map(|guard| Bytes::copy_from_slice(guard.value()));
        Ok(value)
    }

    fn cursor(&self, space: Keyspace) -> EngineResult<RedbCursor> {
        Ok(RedbCursor {
            table: self.table(space)?,
            buffer: VecDeque::new(),
            last_key: None,
            drained: false,
            batch_size: self.batch_size,
        })
    }

    fn discard(self) {
        drop(self.tx);
    }
}

/// Read-write transaction
pub struct RedbWriteTxn {
    tx: WriteTransaction,
}

impl WriteTxn for RedbWriteTxn {
    fn get(&self, space: Keyspace, key: &[u8]) -> EngineResult<Option<Bytes>> {
        let table = self.tx.open_table(table_for(space)).map_err(table_err)?;
        let value = table
            .get(key)
            .map_err(storage_err)?
            .map(|guard| Bytes::copy_from_slice(guard.value()));
        Ok(value)
    }

    fn set(&mut self, space: Keyspace, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut table = self.tx.open_table(table_for(space)).map_err(table_err)?;
        table.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    fn delete(&mut self, space: Keyspace, key: &[u8]) -> EngineResult<bool> {
        let mut table = self.tx.open_table(table_for(space)).map_err(table_err)?;
        let existed = table.remove(key).map_err(storage_err)?.is_some();
        Ok(existed)
    }

    fn commit(self) -> EngineResult<()> {
        self.tx
            .commit()
            .map_err(|e| EngineError::Commit(e.to_string()))
    }

    fn discard(self) {
        if let Err(e) = self.tx.abort() {
            debug!(error = %e, "redb abort failed");
        }
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// Forward cursor over one table of a read snapshot
///
/// Entries are pulled from the snapshot in batches rather than all at once;
/// the table handle keeps the snapshot alive until the cursor is dropped.
pub struct RedbCursor {
    /// `None` when the keyspace has no table in this snapshot
    table: Option<BytesTable>,
    buffer: VecDeque<KeyValue>,
    /// Last key handed out, where the next refill resumes
    last_key: Option<Bytes>,
    /// Set once a refill came back short: nothing past the buffer remains
    drained: bool,
    batch_size: usize,
}

impl RedbCursor {
    fn refill(&mut self, start: Bound<&[u8]>) -> EngineResult<()> {
        self.buffer.clear();

        let Some(table) = &self.table else {
            self.drained = true;
            return Ok(());
        };

        let range = table
            .range::<&[u8]>((start, Bound::Unbounded))
            .map_err(storage_err)?;
        for entry in range.take(self.batch_size) {
            let (key, value) = entry.map_err(storage_err)?;
            self.buffer.push_back((
                Bytes::copy_from_slice(key.value()),
                Bytes::copy_from_slice(value.value()),
            ));
        }

        self.drained = self.buffer.len() < self.batch_size;
        Ok(())
    }

    fn advance(&mut self) -> Option<KeyValue> {
        let entry = self.buffer.pop_front()?;
        self.last_key = Some(entry.0.clone());
        Some(entry)
    }
}

impl Cursor for RedbCursor {
    fn seek(&mut self, key: &[u8]) -> EngineResult<Option<KeyValue>> {
        self.refill(Bound::Included(key))?;
        Ok(self.advance())
    }

    fn next(&mut self) -> EngineResult<Option<KeyValue>> {
        if self.buffer.is_empty() && !self.drained {
            match self.last_key.clone() {
                Some(after) => self.refill(Bound::Excluded(after.as_ref()))?,
                None => self.refill(Bound::Unbounded)?,
            }
        }
        Ok(self.advance())
    }
}
