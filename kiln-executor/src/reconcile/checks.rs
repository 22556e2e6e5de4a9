//! Individual stability checks.
//!
//! Each check compares one facet of a future's current definition against
//! what the journal recorded when execution started, and returns a reason
//! string on drift. Checks are pure; the caller decides which apply.

use kiln_core::graph::Future;
use kiln_core::state::{ExecutionState, ExecutionStatus};
use kiln_core::types::Address;

/// Whether the recorded state represents progress that cannot be redone:
/// a recorded transaction, or a terminal result.
pub(super) fn has_irreversible_footprint(state: &ExecutionState) -> bool {
    state.pending_submission().is_some()
        || matches!(
            state.status,
            ExecutionStatus::Success | ExecutionStatus::Failed
        )
}

/// The future's kind must match what was recorded.
pub(super) fn check_kind(future: &Future, state: &ExecutionState) -> Option<String> {
    if future.kind() != state.kind {
        return Some(format!(
            "kind changed from {} to {}",
            state.kind,
            future.kind()
        ));
    }
    None
}

/// Every recorded dependency must still be declared.
///
/// New dependencies are fine (they are checked for success at batch
/// time); dropping one silently rewrites the meaning of recorded work.
pub(super) fn check_dependencies(future: &Future, state: &ExecutionState) -> Option<String> {
    let current = future.dependencies();
    let dropped: Vec<&str> = state
        .dependencies
        .iter()
        .filter(|dep| !current.contains(dep))
        .map(|dep| dep.as_str())
        .collect();
    if !dropped.is_empty() {
        return Some(format!(
            "recorded dependencies no longer declared: {}",
            dropped.join(", ")
        ));
    }
    None
}

/// The parameter payload must match what was recorded.
pub(super) fn check_arguments(future: &Future, state: &ExecutionState) -> Option<String> {
    let current = serde_json::to_value(&future.params).ok()?;
    if current != state.params {
        return Some("arguments changed since execution was recorded".to_string());
    }
    None
}

/// The resolved sending account must match what was recorded.
pub(super) fn check_account(
    future: &Future,
    state: &ExecutionState,
    accounts: &[Address],
) -> Option<String> {
    let recorded = state.account?;
    let index = future.params.from_account().unwrap_or(0);
    match accounts.get(index) {
        None => Some(format!("sending account index {index} is out of range")),
        Some(current) if *current != recorded => Some(format!(
            "sending account changed from {recorded} to {current}"
        )),
        Some(_) => None,
    }
}

/// The run's strategy must match the one that produced the record.
pub(super) fn check_strategy(state: &ExecutionState, strategy: &str) -> Option<String> {
    if state.strategy != strategy {
        return Some(format!(
            "strategy changed from '{}' to '{strategy}'",
            state.strategy
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::graph::{AddressExpr, FutureParams};
    use kiln_core::state::InteractionAttempt;
    use kiln_core::types::{FutureId, TxHash};
    use kiln_core::FutureKind;
    use serde_json::json;

    fn call(id: &str, function: &str) -> Future {
        Future::new(
            id,
            FutureParams::ContractCall {
                target: AddressExpr::Literal {
                    address: Address::new([1; 20]),
                },
                function: function.to_string(),
                args: vec![],
                value: 0,
                from: None,
            },
        )
    }

    fn state_for(future: &Future) -> ExecutionState {
        ExecutionState::started(
            future.id.clone(),
            future.kind(),
            future.dependencies(),
            serde_json::to_value(&future.params).unwrap(),
            Some(Address::new([1; 20])),
            "direct",
        )
    }

    #[test]
    fn footprint_requires_submission_or_terminal() {
        let future = call("a", "init");
        let mut state = state_for(&future);
        assert!(!has_irreversible_footprint(&state));

        state
            .record_submission(InteractionAttempt {
                payload: json!({}),
                tx: Some(TxHash::new([1; 32])),
                note: None,
            })
            .unwrap();
        assert!(has_irreversible_footprint(&state));
    }

    #[test]
    fn argument_drift_detected() {
        let recorded_against = call("a", "init");
        let state = state_for(&recorded_against);

        assert!(check_arguments(&recorded_against, &state).is_none());
        let edited = call("a", "initialize");
        assert!(check_arguments(&edited, &state).is_some());
    }

    #[test]
    fn dropped_dependency_detected() {
        let original = call("a", "init").after("setup");
        let state = state_for(&original);

        assert!(check_dependencies(&original, &state).is_none());

        // Adding is fine, dropping is not.
        let extended = call("a", "init").after("setup").after("extra");
        assert!(check_dependencies(&extended, &state).is_none());
        let narrowed = call("a", "init");
        let reason = check_dependencies(&narrowed, &state).unwrap();
        assert!(reason.contains("setup"));
    }

    #[test]
    fn account_drift_and_range() {
        let future = call("a", "init");
        let state = state_for(&future);

        let same = [Address::new([1; 20])];
        assert!(check_account(&future, &state, &same).is_none());

        let different = [Address::new([2; 20])];
        assert!(check_account(&future, &state, &different).is_some());

        assert!(check_account(&future, &state, &[]).is_some());
    }

    #[test]
    fn account_check_skipped_without_recorded_sender() {
        let future = Future::new(
            "read",
            FutureParams::ReadEventArgument {
                emitter: FutureId::from("a"),
                event: "Transfer".to_string(),
                argument: "to".to_string(),
                event_index: 0,
            },
        );
        let mut state = state_for(&future);
        state.account = None;
        assert_eq!(state.kind, FutureKind::ReadEventArgument);
        assert!(check_account(&future, &state, &[]).is_none());
    }

    #[test]
    fn strategy_drift_detected() {
        let future = call("a", "init");
        let state = state_for(&future);
        assert!(check_strategy(&state, "direct").is_none());
        assert!(check_strategy(&state, "create2").is_some());
    }
}
