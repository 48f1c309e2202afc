//! Checkpoint Module
//!
//! Persisted processing offset and the process-local recovery flag.
//!
//! ## Record Format
//! ```text
//! ┌──────────┬──────────────────────────────────────────┐
//! │ CRC (4)  │ bincode(CheckpointRecord)                │
//! └──────────┴──────────────────────────────────────────┘
//! ```
//! The CRC32 (little-endian) covers the payload. A record that is too short,
//! fails its CRC or does not decode is reported as corrupt, never as absent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Metadata key under which the checkpoint record is stored
pub const OFFSET_KEY: &[u8] = b"offset";

const CRC_SIZE: usize = 4;

/// The persisted checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Last durably processed upstream offset
    pub offset: i64,

    /// Wall-clock time of the write (unix millis)
    pub updated_at_ms: u64,
}

impl CheckpointRecord {
    pub fn new(offset: i64) -> Self {
        let updated_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            offset,
            updated_at_ms,
        }
    }

    /// Frame the record as `crc | payload`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| StoreError::CorruptCheckpoint(format!("encode failed: {}", e)))?;

        let mut out = Vec::with_capacity(CRC_SIZE + payload.len());
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse a framed record
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CRC_SIZE {
            return Err(StoreError::CorruptCheckpoint(format!(
                "record is {} bytes, shorter than its checksum",
                bytes.len()
            )));
        }

        let (crc_bytes, payload) = bytes.split_at(CRC_SIZE);
        let mut stored = [0u8; CRC_SIZE];
        stored.copy_from_slice(crc_bytes);
        let stored = u32::from_le_bytes(stored);
        let actual = crc32fast::hash(payload);
        if stored != actual {
            return Err(StoreError::CorruptCheckpoint(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, actual
            )));
        }

        bincode::deserialize(payload)
            .map_err(|e| StoreError::CorruptCheckpoint(format!("decode failed: {}", e)))
    }
}

// =============================================================================
// Recovery Flag
// =============================================================================

/// Whether the store has finished replaying its recovery log
///
/// Lives for the process only; each run starts unrecovered.
#[derive(Debug, Default)]
pub struct RecoveryState {
    recovered: AtomicBool,
}

impl RecoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call performed the transition
    pub fn mark(&self) -> bool {
        !self.recovered.swap(true, Ordering::AcqRel)
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered.load(Ordering::Acquire)
    }
}
