//! Per-future execution state and the terminal outcome taxonomy.
//!
//! One [`ExecutionState`] exists per future id. It is owned by the journal
//! replay / execution store, mutated only by the execution driver, and read
//! (never written) by the reconciliation engine. Transitions are forward
//! only; a state becomes terminal exactly once.

use crate::error::{KilnError, Result};
use crate::graph::FutureKind;
use crate::types::{Address, FutureId, TxHash};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle status of a future's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Created but nothing attempted yet. Also the effective status after a
    /// simulation-phase failure, which leaves no on-chain footprint.
    Unstarted,
    /// A transaction was submitted (or a synchronous resolution began) and
    /// the outcome is not yet known.
    Started,
    /// Terminal: the future completed successfully.
    Success,
    /// Terminal: the future failed after an irreversible on-chain effect.
    Failed,
    /// No confirmation was observed within the bounded wait. Not a failure;
    /// the confirmation wait resumes on the next run.
    TimedOut,
}

impl ExecutionStatus {
    /// Whether this status is terminal for the run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::TimedOut)
    }
}

/// One recorded on-chain interaction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionAttempt {
    /// The payload that was submitted (strategy-constructed).
    pub payload: Value,
    /// Transaction hash, or `None` for synchronous resolutions.
    pub tx: Option<TxHash>,
    /// Free-form note about the observed outcome, if any.
    #[serde(default)]
    pub note: Option<String>,
}

/// Payload carried by a successful terminal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuccessValue {
    /// A deployed (or bound) contract address.
    Address {
        /// The address.
        address: Address,
    },
    /// A decoded return value or event argument.
    Data {
        /// The decoded value.
        value: Value,
    },
    /// Nothing to carry (calls and sends).
    None,
}

/// Terminal outcome of a future's state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The future completed successfully.
    Success {
        /// Kind-specific success payload.
        value: SuccessValue,
    },
    /// Pre-flight simulation failed. No on-chain side effect occurred, so
    /// this is never journaled as a persisted failure.
    SimulationError {
        /// Reason reported by the network.
        reason: String,
    },
    /// The strategy rejected an otherwise-successful simulation. Also
    /// footprint-free and retryable.
    StrategySimulationError {
        /// Reason reported by the strategy.
        reason: String,
    },
    /// The submitted transaction reverted on chain. Gas was consumed, so
    /// this is journaled and never auto-retried.
    RevertedTransaction {
        /// Hash of the reverted transaction.
        tx: TxHash,
    },
    /// A read-only call failed after submission.
    FailedStaticCall {
        /// Failure reason.
        reason: String,
    },
    /// The strategy reported an error outside the simulate/submit protocol.
    StrategyError {
        /// Error reason.
        reason: String,
    },
}

impl ExecutionResult {
    /// Whether this result is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether this result followed an irreversible on-chain side effect.
    ///
    /// Footprint failures are journaled and never retried automatically.
    #[must_use]
    pub fn has_onchain_footprint(&self) -> bool {
        matches!(
            self,
            Self::Success { .. }
                | Self::RevertedTransaction { .. }
                | Self::FailedStaticCall { .. }
                | Self::StrategyError { .. }
        )
    }

    /// Whether re-running the deployment may safely retry this future.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SimulationError { .. } | Self::StrategySimulationError { .. }
        )
    }
}

/// Durable execution record of a single future.
///
/// Fields beyond `status`/`history`/`result` snapshot what the future
/// looked like when it first produced an on-chain effect; the
/// reconciliation engine compares them against the current graph on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// The future this state belongs to.
    pub future_id: FutureId,
    /// Kind recorded when execution started.
    pub kind: FutureKind,
    /// Dependency set recorded when execution started.
    pub dependencies: Vec<FutureId>,
    /// Parameter payload recorded when execution started.
    pub params: Value,
    /// Sending account recorded when execution started, if any.
    pub account: Option<Address>,
    /// Name of the strategy that drove this future.
    pub strategy: String,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Ordered history of on-chain interaction attempts.
    pub history: Vec<InteractionAttempt>,
    /// Final result, set exactly once when the state becomes terminal.
    pub result: Option<ExecutionResult>,
}

impl ExecutionState {
    /// Create a started state, recording the future's shape for later
    /// reconciliation.
    pub fn started(
        future_id: FutureId,
        kind: FutureKind,
        dependencies: Vec<FutureId>,
        params: Value,
        account: Option<Address>,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            future_id,
            kind,
            dependencies,
            params,
            account,
            strategy: strategy.into(),
            status: ExecutionStatus::Started,
            history: Vec::new(),
            result: None,
        }
    }

    /// Append a submission to the history.
    ///
    /// Fails if the state is already terminal (forward-only lifecycle).
    pub fn record_submission(&mut self, attempt: InteractionAttempt) -> Result<()> {
        self.ensure_not_terminal("record submission")?;
        self.history.push(attempt);
        Ok(())
    }

    /// Transition to terminal `Success`.
    pub fn succeed(&mut self, value: SuccessValue) -> Result<()> {
        self.ensure_not_terminal("succeed")?;
        self.status = ExecutionStatus::Success;
        self.result = Some(ExecutionResult::Success { value });
        Ok(())
    }

    /// Transition to terminal `Failed` with a footprint failure result.
    pub fn fail(&mut self, result: ExecutionResult) -> Result<()> {
        self.ensure_not_terminal("fail")?;
        debug_assert!(!result.is_success() && !result.is_retryable());
        self.status = ExecutionStatus::Failed;
        self.result = Some(result);
        Ok(())
    }

    /// Mark the confirmation wait as timed out.
    ///
    /// A timed-out state keeps its submission history; the next run resumes
    /// the wait instead of resubmitting.
    pub fn time_out(&mut self) -> Result<()> {
        if self.status == ExecutionStatus::Success || self.status == ExecutionStatus::Failed {
            return Err(KilnError::JournalReplay {
                future_id: self.future_id.clone(),
                cause: "timeout recorded after terminal state".to_string(),
            });
        }
        self.status = ExecutionStatus::TimedOut;
        Ok(())
    }

    /// Resume a previously timed-out wait: the state goes back to
    /// `Started` so the driver picks up the recorded submission.
    pub fn resume_wait(&mut self) {
        if self.status == ExecutionStatus::TimedOut {
            self.status = ExecutionStatus::Started;
        }
    }

    /// The last recorded submission carrying a transaction hash, if any.
    #[must_use]
    pub fn pending_submission(&self) -> Option<&InteractionAttempt> {
        self.history.iter().rev().find(|a| a.tx.is_some())
    }

    /// Deployed address, for successful deployment-kind futures.
    #[must_use]
    pub fn deployed_address(&self) -> Option<Address> {
        match self.result {
            Some(ExecutionResult::Success {
                value: SuccessValue::Address { address },
            }) => Some(address),
            _ => None,
        }
    }

    fn ensure_not_terminal(&self, action: &str) -> Result<()> {
        if self.status == ExecutionStatus::Success || self.status == ExecutionStatus::Failed {
            return Err(KilnError::JournalReplay {
                future_id: self.future_id.clone(),
                cause: format!("cannot {action}: state already terminal"),
            });
        }
        Ok(())
    }
}

/// Map of future id to execution state, as replayed from the journal.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStateMap {
    states: HashMap<FutureId, ExecutionState>,
}

impl ExecutionStateMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the state of a future.
    #[must_use]
    pub fn get(&self, id: &FutureId) -> Option<&ExecutionState> {
        self.states.get(id)
    }

    /// Get the state of a future mutably.
    pub fn get_mut(&mut self, id: &FutureId) -> Option<&mut ExecutionState> {
        self.states.get_mut(id)
    }

    /// Insert or replace a state.
    pub fn insert(&mut self, state: ExecutionState) {
        self.states.insert(state.future_id.clone(), state);
    }

    /// Whether a future already completed successfully.
    #[must_use]
    pub fn is_success(&self, id: &FutureId) -> bool {
        self.get(id)
            .is_some_and(|s| s.status == ExecutionStatus::Success)
    }

    /// Iterate over all recorded states.
    pub fn iter(&self) -> impl Iterator<Item = (&FutureId, &ExecutionState)> {
        self.states.iter()
    }

    /// Number of recorded states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if no state has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(id: &str) -> ExecutionState {
        ExecutionState::started(
            FutureId::from(id),
            FutureKind::ContractCall,
            vec![],
            json!({}),
            None,
            "direct",
        )
    }

    #[test]
    fn success_is_terminal_once() {
        let mut state = started("a");
        state.succeed(SuccessValue::None).unwrap();
        assert_eq!(state.status, ExecutionStatus::Success);
        assert!(state.succeed(SuccessValue::None).is_err());
        assert!(state
            .fail(ExecutionResult::StrategyError {
                reason: "late".to_string()
            })
            .is_err());
    }

    #[test]
    fn timeout_is_not_fully_terminal() {
        let mut state = started("a");
        state
            .record_submission(InteractionAttempt {
                payload: json!({"to": "0x00"}),
                tx: Some(TxHash::new([1; 32])),
                note: None,
            })
            .unwrap();
        state.time_out().unwrap();
        assert_eq!(state.status, ExecutionStatus::TimedOut);
        assert!(state.status.is_terminal());

        // The wait can resume and then conclude.
        state.resume_wait();
        assert_eq!(state.status, ExecutionStatus::Started);
        state.succeed(SuccessValue::None).unwrap();
    }

    #[test]
    fn pending_submission_finds_last_tx() {
        let mut state = started("a");
        state
            .record_submission(InteractionAttempt {
                payload: json!(1),
                tx: None,
                note: Some("simulation only".to_string()),
            })
            .unwrap();
        let tx = TxHash::new([7; 32]);
        state
            .record_submission(InteractionAttempt {
                payload: json!(2),
                tx: Some(tx),
                note: None,
            })
            .unwrap();
        assert_eq!(state.pending_submission().unwrap().tx, Some(tx));
    }

    #[test]
    fn footprint_classification() {
        assert!(ExecutionResult::RevertedTransaction {
            tx: TxHash::new([0; 32])
        }
        .has_onchain_footprint());
        assert!(ExecutionResult::SimulationError {
            reason: "gas".to_string()
        }
        .is_retryable());
        assert!(!ExecutionResult::SimulationError {
            reason: "gas".to_string()
        }
        .has_onchain_footprint());
        assert!(!ExecutionResult::StrategyError {
            reason: "nonce".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn deployed_address_extraction() {
        let mut state = started("a");
        let addr = Address::new([9; 20]);
        state
            .succeed(SuccessValue::Address { address: addr })
            .unwrap();
        assert_eq!(state.deployed_address(), Some(addr));
    }

    #[test]
    fn state_map_success_lookup() {
        let mut map = ExecutionStateMap::new();
        let mut state = started("a");
        state.succeed(SuccessValue::None).unwrap();
        map.insert(state);
        assert!(map.is_success(&FutureId::from("a")));
        assert!(!map.is_success(&FutureId::from("b")));
    }
}
