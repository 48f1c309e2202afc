//! Range Iterator
//!
//! Ordered traversal of user keys over a snapshot that stays fixed for the
//! iterator's whole life.
//!
//! ## Lifecycle
//! ```text
//!  Created ──next/seek──▶ Positioned ──next/seek──▶ Exhausted
//!     │                       │    ▲                    │
//!     │                       │    └──────seek──────────┤
//!     └───────────────────────┴───────release───────────┴──▶ Released
//! ```
//!
//! The iterator holds a read transaction open until it is released or its
//! store is closed. An open snapshot keeps superseded versions alive in the
//! engine, so release iterators promptly; dropping one releases it.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{Cursor, EngineResult, KeyValue, Keyspace, KvEngine, ReadTxn};
use crate::error::{Op, Result, StoreError};
use crate::store::Store;
use crate::txn::ReadScope;

/// Inclusive key bounds for a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bounds {
    /// Smallest key produced
    pub start: Option<Vec<u8>>,

    /// Largest key produced
    pub limit: Option<Vec<u8>>,
}

impl Bounds {
    /// No bounds: every key
    pub fn all() -> Self {
        Self::default()
    }

    /// Keys `k` with `start <= k <= limit`
    pub fn inclusive(start: &[u8], limit: &[u8]) -> Self {
        Self {
            start: Some(start.to_vec()),
            limit: Some(limit.to_vec()),
        }
    }

    pub fn from_start(start: &[u8]) -> Self {
        Self {
            start: Some(start.to_vec()),
            limit: None,
        }
    }

    pub fn up_to(limit: &[u8]) -> Self {
        Self {
            start: None,
            limit: Some(limit.to_vec()),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = self.start.as_deref().map_or(true, |start| key >= start);
        above_start && self.below_limit(key)
    }

    fn below_limit(&self, key: &[u8]) -> bool {
        self.limit.as_deref().map_or(true, |limit| key <= limit)
    }
}

/// Lifecycle state of a [`RangeIterator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    /// Opened, not yet positioned
    Created,
    /// At a valid entry
    Positioned,
    /// Past the last entry in bounds
    Exhausted,
    /// Snapshot released; every further call fails
    Released,
}

/// Read scope and cursor backing one iterator
pub(crate) struct Snapshot<E: KvEngine> {
    cursor: <E::Read as ReadTxn>::Cursor,
    scope: ReadScope<E::Read>,
}

impl<E: KvEngine> Snapshot<E> {
    pub(crate) fn begin(engine: &E) -> EngineResult<Self> {
        let scope = ReadScope::begin(engine)?;
        let cursor = scope.txn().cursor(Keyspace::User)?;
        Ok(Self { cursor, scope })
    }

    /// Drop the cursor, then resolve the read scope
    pub(crate) fn release(self) {
        drop(self.cursor);
        self.scope.discard();
    }
}

/// Snapshot shared between an iterator and its store
///
/// Emptied by whichever comes first: the iterator's `release` or the
/// store's `close`.
pub(crate) type SnapshotSlot<E> = Mutex<Option<Snapshot<E>>>;

/// Snapshot iterator over user keys
///
/// Borrows the store, so it cannot outlive it. Closing the store releases
/// the snapshot even while the iterator is alive.
pub struct RangeIterator<'a, E: KvEngine> {
    store: &'a Store<E>,
    snapshot: Arc<SnapshotSlot<E>>,
    bounds: Bounds,
    current: Option<KeyValue>,
    state: IterState,
    /// Last engine error hit while positioning
    error: Option<StoreError>,
}

impl<'a, E: KvEngine> RangeIterator<'a, E> {
    pub(crate) fn new(store: &'a Store<E>, bounds: Bounds) -> Result<Self> {
        let at = bounds.start.clone().unwrap_or_default();
        let snapshot = store.track_snapshot(&at)?;

        debug!(start = ?bounds.start, limit = ?bounds.limit, "iterator opened");

        Ok(Self {
            store,
            snapshot,
            bounds,
            current: None,
            state: IterState::Created,
            error: None,
        })
    }

    // =========================================================================
    // Positioning
    // =========================================================================

    /// Advance to the next entry in bounds
    ///
    /// From `Created` this moves to the first entry. Returns whether the
    /// iterator now sits at a valid entry.
    pub fn next(&mut self) -> Result<bool> {
        self.check_live()?;

        let (step, at) = match self.state {
            IterState::Exhausted => return Ok(false),
            IterState::Created => match self.bounds.start.clone() {
                Some(start) => (self.with_cursor(|c| c.seek(&start))?, start),
                None => (self.with_cursor(|c| c.next())?, Vec::new()),
            },
            _ => {
                let at = self.current_key_vec();
                (self.with_cursor(|c| c.next())?, at)
            }
        };

        self.settle(Op::Next, &at, step)
    }

    /// Move to the first entry with key >= `key`, clamped to the lower bound
    ///
    /// Returns whether that entry exists and lies within the upper bound.
    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        self.check_live()?;

        let target = match self.bounds.start.as_deref() {
            Some(start) if start > key => start.to_vec(),
            _ => key.to_vec(),
        };
        let step = self.with_cursor(|c| c.seek(&target))?;

        self.settle(Op::Seek, &target, step)
    }

    fn settle(&mut self, op: Op, at: &[u8], step: EngineResult<Option<KeyValue>>) -> Result<bool> {
        match step {
            Ok(Some(entry)) if self.bounds.below_limit(&entry.0) => {
                self.current = Some(entry);
                self.state = IterState::Positioned;
                Ok(true)
            }
            Ok(_) => {
                self.current = None;
                self.state = IterState::Exhausted;
                Ok(false)
            }
            Err(e) => {
                let err = StoreError::engine(op, Keyspace::User, at, e);
                self.error = Some(err.clone());
                self.current = None;
                self.state = IterState::Exhausted;
                Err(err)
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Key of the current entry, `None` unless positioned
    pub fn key(&self) -> Result<Option<&[u8]>> {
        self.check_released()?;
        Ok(self.current.as_ref().map(|(key, _)| key.as_ref()))
    }

    /// Value of the current entry, `None` unless positioned
    pub fn value(&self) -> Result<Option<Bytes>> {
        self.check_released()?;
        Ok(self.current.as_ref().map(|(_, value)| value.clone()))
    }

    /// Last engine error met while iterating
    pub fn err(&self) -> Option<&StoreError> {
        self.error.as_ref()
    }

    pub fn state(&self) -> IterState {
        self.state
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Borrowing adapter over the remaining entries
    pub fn entries(&mut self) -> Entries<'_, 'a, E> {
        Entries {
            iter: self,
            done: false,
        }
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Close the cursor and its snapshot. Idempotent.
    pub fn release(&mut self) {
        if self.state == IterState::Released {
            return;
        }

        self.current = None;
        if let Some(snapshot) = self.snapshot.lock().take() {
            snapshot.release();
        }
        self.state = IterState::Released;
        debug!("iterator released");
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    fn check_released(&self) -> Result<()> {
        if self.state == IterState::Released {
            return Err(StoreError::UseAfterRelease);
        }
        Ok(())
    }

    fn check_live(&self) -> Result<()> {
        self.check_released()?;
        if self.store.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Run `f` on the cursor; `Closed` once the store reclaimed the snapshot
    fn with_cursor<T>(
        &self,
        f: impl FnOnce(&mut <E::Read as ReadTxn>::Cursor) -> T,
    ) -> Result<T> {
        let mut slot = self.snapshot.lock();
        let snapshot = slot.as_mut().ok_or(StoreError::Closed)?;
        Ok(f(&mut snapshot.cursor))
    }

    fn current_key_vec(&self) -> Vec<u8> {
        self.current
            .as_ref()
            .map(|(key, _)| key.to_vec())
            .unwrap_or_default()
    }
}

impl<E: KvEngine> Drop for RangeIterator<'_, E> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Entries of a [`RangeIterator`] as a standard iterator
///
/// Stops after the first error.
pub struct Entries<'i, 'a, E: KvEngine> {
    iter: &'i mut RangeIterator<'a, E>,
    done: bool,
}

impl<E: KvEngine> Iterator for Entries<'_, '_, E> {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.iter.next() {
            Ok(true) => self.iter.current.clone().map(Ok),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_contains() {
        let bounds = Bounds::inclusive(b"b", b"d");
        assert!(!bounds.contains(b"a"));
        assert!(bounds.contains(b"b"));
        assert!(bounds.contains(b"c"));
        assert!(bounds.contains(b"d"));
        assert!(!bounds.contains(b"da"));

        assert!(Bounds::all().contains(b""));
        assert!(Bounds::from_start(b"m").contains(b"zzz"));
        assert!(!Bounds::up_to(b"m").contains(b"ma"));
    }

    #[test]
    fn test_fresh_iterator_is_created() {
        let store = Store::in_memory().unwrap();
        let iter = store.iterator().unwrap();

        assert_eq!(iter.state(), IterState::Created);
        assert_eq!(iter.key().unwrap(), None);
        assert!(iter.err().is_none());
    }

    #[test]
    fn test_release_then_use_fails() {
        let store = Store::in_memory().unwrap();
        store.set(b"a", b"1").unwrap();

        let mut iter = store.iterator().unwrap();
        assert!(iter.next().unwrap());
        iter.release();
        iter.release();

        assert_eq!(iter.state(), IterState::Released);
        assert!(matches!(iter.next(), Err(StoreError::UseAfterRelease)));
        assert!(matches!(iter.seek(b"a"), Err(StoreError::UseAfterRelease)));
        assert!(matches!(iter.key(), Err(StoreError::UseAfterRelease)));
        assert!(matches!(iter.value(), Err(StoreError::UseAfterRelease)));
    }
}
