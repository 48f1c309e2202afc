//! Transaction Scope
//!
//! Scoped acquisition of a read or read-write view of the engine.
//!
//! ## Guarantees
//! - Every scope is resolved exactly once: committed, or discarded
//! - A scope that leaves by `?`, early return or panic is discarded on drop
//! - Point operations open and resolve their scope within a single call
//!
//! ```text
//!  begin ──▶ [ open ] ──commit──▶ resolved
//!               │
//!               └──discard / drop──▶ resolved
//! ```

use crate::backend::{EngineResult, KvEngine, ReadTxn, WriteTxn};

// =============================================================================
// Read Scope
// =============================================================================

/// A read-only snapshot view, discarded when dropped
pub struct ReadScope<T: ReadTxn> {
    txn: Option<T>,
}

impl<T: ReadTxn> ReadScope<T> {
    /// Begin a read view on `engine`
    pub fn begin<E>(engine: &E) -> EngineResult<Self>
    where
        E: KvEngine<Read = T> + ?Sized,
    {
        Ok(Self {
            txn: Some(engine.begin_read()?),
        })
    }

    /// The open transaction
    pub fn txn(&self) -> &T {
        // Only `discard` takes the transaction, and it consumes the scope
        self.txn.as_ref().expect("read scope used after resolution")
    }

    /// Release the snapshot now
    pub fn discard(mut self) {
        if let Some(txn) = self.txn.take() {
            txn.discard();
        }
    }
}

impl<T: ReadTxn> Drop for ReadScope<T> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.discard();
        }
    }
}

// =============================================================================
// Write Scope
// =============================================================================

/// A read-write view; writes only persist through `commit`
pub struct WriteScope<T: WriteTxn> {
    txn: Option<T>,
}

impl<T: WriteTxn> WriteScope<T> {
    /// Begin a read-write view on `engine`
    pub fn begin<E>(engine: &E) -> EngineResult<Self>
    where
        E: KvEngine<Write = T> + ?Sized,
    {
        Ok(Self {
            txn: Some(engine.begin_write()?),
        })
    }

    pub fn txn(&self) -> &T {
        self.txn.as_ref().expect("write scope used after resolution")
    }

    pub fn txn_mut(&mut self) -> &mut T {
        self.txn.as_mut().expect("write scope used after resolution")
    }

    /// Commit all writes made in this scope
    pub fn commit(mut self) -> EngineResult<()> {
        match self.txn.take() {
            Some(txn) => txn.commit(),
            None => Ok(()),
        }
    }

    /// Drop all writes made in this scope
    pub fn discard(mut self) {
        if let Some(txn) = self.txn.take() {
            txn.discard();
        }
    }
}

impl<T: WriteTxn> Drop for WriteScope<T> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.discard();
        }
    }
}

// =============================================================================
// Closure Helpers
// =============================================================================

/// Run `f` inside a read scope; the scope is discarded after `f` returns
pub fn view<E, R, F>(engine: &E, f: F) -> EngineResult<R>
where
    E: KvEngine + ?Sized,
    F: FnOnce(&E::Read) -> EngineResult<R>,
{
    let scope = ReadScope::begin(engine)?;
    let result = f(scope.txn());
    scope.discard();
    result
}

/// Run `f` inside a write scope; committed if `f` succeeds, discarded otherwise
pub fn update<E, R, F>(engine: &E, f: F) -> EngineResult<R>
where
    E: KvEngine + ?Sized,
    F: FnOnce(&mut E::Write) -> EngineResult<R>,
{
    let mut scope = WriteScope::begin(engine)?;
    match f(scope.txn_mut()) {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(e) => {
            scope.discard();
            Err(e)
        }
    }
}
