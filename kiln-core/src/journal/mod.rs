//! Append-only journal for durability and resumable deployments.
//!
//! The journal records every externally-visible state transition of a
//! deployment. On resume, it is replayed into an
//! [`ExecutionStateMap`](crate::state::ExecutionStateMap) that the
//! reconciliation engine checks against the (possibly edited) graph and
//! the driver uses to skip completed work.
//!
//! Records are framed with a length prefix and a CRC32 checksum; a torn
//! write at the tail is tolerated on replay, interior corruption is not.
//! Appends are flushed (and synced, when configured) before returning, so
//! the journal never lags the last on-chain side effect.

mod record;
mod writer;

pub use record::{JournalPayload, JournalRecord, JournalRecordType, MIN_RECORD_SIZE};
pub use writer::{replay_records, Journal, JournalConfig};
