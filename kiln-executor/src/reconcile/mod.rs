//! Reconciliation: validating an edited graph against the journal.
//!
//! Between runs the user may edit the deployment description. Futures
//! with journaled progress were executed against the old description, so
//! resuming is only safe when the parts that already took effect still
//! mean the same thing. Reconciliation walks every future with a recorded
//! state, applies the stability checks, and collects every failure rather
//! than stopping at the first, so the user sees the full extent of the
//! drift at once.
//!
//! A successful future that no longer exists in the graph is not an
//! error; it is surfaced separately as a missing executed future.

mod checks;

use kiln_core::graph::DeploymentGraph;
use kiln_core::state::ExecutionStateMap;
use kiln_core::types::{Address, FutureId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// What reconciliation checks against: the journaled record plus the
/// current run's account list, module parameters, and strategy.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationContext<'a> {
    /// Execution states replayed from the journal.
    pub states: &'a ExecutionStateMap,
    /// Account addresses for the current run, in index order.
    pub accounts: &'a [Address],
    /// User-supplied module parameters for the current run.
    pub parameters: &'a HashMap<String, Value>,
    /// Strategy selected for the current run.
    pub strategy: &'a str,
}

/// One detected incompatibility between the graph and the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationFailure {
    /// The future whose definition drifted.
    pub future_id: FutureId,
    /// Human-readable description of the drift.
    pub reason: String,
}

impl fmt::Display for ReconciliationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.future_id, self.reason)
    }
}

/// Everything reconciliation found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// Detected drift, in graph declaration order. Any entry here refuses
    /// execution.
    pub failures: Vec<ReconciliationFailure>,
    /// Futures that completed successfully in a prior run but are absent
    /// from the current graph. Informational, sorted by id.
    pub missing_executed_futures: Vec<FutureId>,
}

impl ReconciliationResult {
    /// Whether the graph is compatible with the journaled record.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.missing_executed_futures.is_empty()
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure(s), {} missing executed future(s)",
            self.failures.len(),
            self.missing_executed_futures.len()
        )
    }
}

/// Check an edited graph against the journaled record.
///
/// Kind and dependency stability are checked for every future with any
/// recorded state. Argument, account, and strategy stability are checked
/// only once a future has an irreversible footprint (a recorded
/// transaction or a terminal result); before that point, re-running with
/// new values is safe.
pub fn reconcile(graph: &DeploymentGraph, ctx: &ReconciliationContext<'_>) -> ReconciliationResult {
    let mut failures = Vec::new();

    for future in graph.futures() {
        let Some(state) = ctx.states.get(&future.id) else {
            continue;
        };

        let mut push = |reason: Option<String>| {
            if let Some(reason) = reason {
                failures.push(ReconciliationFailure {
                    future_id: future.id.clone(),
                    reason,
                });
            }
        };

        push(checks::check_kind(future, state));
        push(checks::check_dependencies(future, state));

        if checks::has_irreversible_footprint(state) {
            push(checks::check_arguments(future, state));
            push(checks::check_account(future, state, ctx.accounts));
            push(checks::check_strategy(state, ctx.strategy));
        }
    }

    let mut missing_executed_futures: Vec<FutureId> = ctx
        .states
        .iter()
        .filter(|(id, state)| state.result.as_ref().is_some_and(|r| r.is_success()) && !graph.contains(id))
        .map(|(id, _)| id.clone())
        .collect();
    missing_executed_futures.sort();

    if !failures.is_empty() || !missing_executed_futures.is_empty() {
        tracing::warn!(
            failures = failures.len(),
            missing = missing_executed_futures.len(),
            "Reconciliation found drift"
        );
    }

    ReconciliationResult {
        failures,
        missing_executed_futures,
    }
}
