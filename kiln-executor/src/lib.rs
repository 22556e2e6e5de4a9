//! Kiln Executor Library
//!
//! This crate turns a [`DeploymentGraph`](kiln_core::DeploymentGraph) into
//! on-chain effects. It layers four pieces on top of `kiln-core`:
//!
//! - **Batcher**: levels the graph into maximal batches of independent
//!   futures, skipping work that already succeeded
//! - **Driver**: runs batches with bounded concurrency, journaling every
//!   externally-visible transition before proceeding
//! - **Reconciliation**: on resume, checks the (possibly edited) graph
//!   against the journaled record and refuses unsafe drift
//! - **Deployer**: the top-level API tying plan, reconcile, and execute
//!   together
//!
//! Network access is abstracted behind the [`ExecutionStrategy`] trait;
//! the [`testing`] module provides a scripted in-memory implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batcher;
pub mod deployer;
pub mod driver;
pub mod reconcile;
pub mod strategy;
pub mod testing;

pub use batcher::{compute_batches, BatchPlan, BlockedFuture};
pub use deployer::{Deployer, DeploymentResult};
pub use driver::{Driver, DriverConfig, DriverReport, FutureOutcome};
pub use reconcile::{reconcile, ReconciliationContext, ReconciliationFailure, ReconciliationResult};
pub use strategy::{
    ConfirmationOutcome, ExecutionContext, ExecutionStrategy, SimulationOutcome, SubmitOutcome,
};
