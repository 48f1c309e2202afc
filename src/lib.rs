//! # kvstate
//!
//! Durable local state for stream processors, one store per partition:
//! - Point get/set/delete/has on opaque byte keys and values
//! - Snapshot range iteration with inclusive bounds
//! - A persisted processing checkpoint (offset) for crash recovery
//! - Embedded transactional storage via redb
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Stream Processing Runtime                   │
//! │              (one Store per partition state)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │      (point ops, checkpoint, recovery flag, lifecycle)       │
//! └──────────┬───────────────────────────────────┬──────────────┘
//!            │                                   │
//!            ▼                                   ▼
//!   ┌─────────────────┐                 ┌─────────────────┐
//!   │ Transaction     │◀────────────────│  RangeIterator  │
//!   │ Scope           │  long-lived     │  (snapshot +    │
//!   │ (read / write)  │  read scope     │   cursor)       │
//!   └────────┬────────┘                 └─────────────────┘
//!            │
//!            ▼
//!   ┌─────────────────┐
//!   │   KvEngine      │
//!   │ (redb: user_data│
//!   │  + metadata)    │
//!   └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod backend;
pub mod txn;
pub mod checkpoint;
pub mod store;
pub mod iterator;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Op, Result, StoreError};
pub use config::{StoreConfig, SyncMode};
pub use backend::{EngineError, Keyspace, KvEngine, RedbEngine};
pub use iterator::{Bounds, IterState, RangeIterator};
pub use store::Store;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvstate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
