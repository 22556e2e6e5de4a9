//! Error types for Kiln.
//!
//! Errors are strongly typed and carry the identifiers needed to act on
//! them (future ids, journal positions). Per-future execution outcomes are
//! not errors: they live in [`crate::state::ExecutionResult`] and are
//! reported through the deployment result. `KilnError` covers the failures
//! that abort or refuse a run.

use crate::types::FutureId;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Kiln operations.
#[derive(Error, Debug)]
pub enum KilnError {
    // =========================================================================
    // Graph Construction Errors (E001-E099)
    // =========================================================================
    /// Two futures declared with the same id.
    #[error("E001: Duplicate future id '{future_id}' in deployment graph")]
    DuplicateFutureId {
        /// The id declared more than once.
        future_id: FutureId,
    },

    /// A dependency names a future that is not in the graph.
    #[error("E002: Future '{future_id}' depends on unknown future '{dependency}'")]
    UnknownDependency {
        /// The future declaring the dependency.
        future_id: FutureId,
        /// The dependency id that does not exist.
        dependency: FutureId,
    },

    /// Dependency cycle detected while batching.
    #[error("E003: Dependency cycle detected involving futures: {futures:?}")]
    DependencyCycle {
        /// The futures involved in the cycle.
        futures: Vec<FutureId>,
    },

    // =========================================================================
    // Journal Errors (E100-E199)
    // =========================================================================
    /// Journal write failed.
    #[error("E101: Journal write failed for future '{future_id}': {cause}")]
    JournalWrite {
        /// The future whose record could not be written.
        future_id: FutureId,
        /// Reason for the write failure.
        cause: String,
    },

    /// Journal open or read failed.
    #[error("E102: Journal read failed at {path}: {cause}")]
    JournalRead {
        /// Path of the journal file.
        path: PathBuf,
        /// Reason for the read failure.
        cause: String,
    },

    /// Journal corruption detected.
    #[error("E103: Journal corruption detected at position {position}: {cause}")]
    JournalCorruption {
        /// Byte offset of the corrupt record.
        position: u64,
        /// Description of the corruption.
        cause: String,
    },

    /// Journal replay produced an inconsistent state transition.
    #[error("E104: Journal replay failed for future '{future_id}': {cause}")]
    JournalReplay {
        /// The future whose recorded transitions are inconsistent.
        future_id: FutureId,
        /// Reason for the replay failure.
        cause: String,
    },

    // =========================================================================
    // Driver Errors (E200-E299)
    // =========================================================================
    /// A batch references a future missing from the graph.
    #[error("E201: Future '{future_id}' scheduled but not present in the graph")]
    UnknownFuture {
        /// The missing future id.
        future_id: FutureId,
    },

    /// A spawned execution task panicked.
    #[error("E202: Execution task for future '{future_id}' panicked: {cause}")]
    TaskPanic {
        /// The future whose task panicked.
        future_id: FutureId,
        /// The panic message.
        cause: String,
    },
}

impl KilnError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateFutureId { .. } => "E001",
            Self::UnknownDependency { .. } => "E002",
            Self::DependencyCycle { .. } => "E003",
            Self::JournalWrite { .. } => "E101",
            Self::JournalRead { .. } => "E102",
            Self::JournalCorruption { .. } => "E103",
            Self::JournalReplay { .. } => "E104",
            Self::UnknownFuture { .. } => "E201",
            Self::TaskPanic { .. } => "E202",
        }
    }

    /// Check if this error is a graph construction error (fatal before any
    /// execution takes place).
    #[must_use]
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateFutureId { .. }
                | Self::UnknownDependency { .. }
                | Self::DependencyCycle { .. }
        )
    }

    /// Check if this error is retriable by re-invoking the run.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::JournalWrite { .. } | Self::TaskPanic { .. })
    }
}

/// Result type alias using `KilnError`.
pub type Result<T> = std::result::Result<T, KilnError>;
