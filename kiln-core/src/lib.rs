//! Kiln Core Library
//!
//! This crate provides the foundational types for the Kiln deployment
//! orchestrator: the future graph, per-future execution state, the durable
//! append-only journal, and the error taxonomy.
//!
//! # Key Components
//!
//! - **Graph**: immutable description of deployment steps ("futures") and
//!   their dependency edges
//! - **State**: per-future execution state with a bounded outcome taxonomy
//! - **Journal**: append-only log replayed on resume for crash recovery
//! - **Types**: strongly-typed identifiers and on-chain primitives

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod graph;
pub mod journal;
pub mod state;
pub mod types;

pub use error::{KilnError, Result};
pub use graph::{AddressExpr, DeploymentGraph, Future, FutureKind, FutureParams};
pub use journal::{Journal, JournalConfig, JournalRecord, JournalRecordType};
pub use state::{
    ExecutionResult, ExecutionState, ExecutionStateMap, ExecutionStatus, InteractionAttempt,
    SuccessValue,
};
pub use types::{Address, FutureId, RunId, TxHash};
