//! The strategy boundary: how futures become on-chain effects.
//!
//! The driver owns ordering, durability, and state transitions; the
//! strategy owns everything network-shaped, such as building transactions,
//! submitting them, and watching for confirmations. Swapping the strategy
//! (direct submission, create2 factory, multisig proposal) never changes
//! the driver's semantics.
//!
//! Strategy methods return outcome enums rather than errors: a failed
//! simulation or a reverted transaction is a domain result the driver
//! journals and reports, not a fault that aborts the run.

use async_trait::async_trait;
use kiln_core::graph::{AddressExpr, Future};
use kiln_core::state::SuccessValue;
use kiln_core::types::{Address, FutureId, TxHash};
use serde_json::Value;
use std::collections::HashMap;

/// Result of the pre-flight simulation phase.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationOutcome {
    /// The network accepted the simulated transaction.
    Success,
    /// The network rejected the simulation. No on-chain footprint; the
    /// future stays schedulable on the next run.
    Failed {
        /// Reason reported by the network.
        reason: String,
    },
    /// The strategy vetoed an otherwise-successful simulation. Also
    /// footprint-free.
    StrategyRejected {
        /// Reason reported by the strategy.
        reason: String,
    },
}

/// Result of the submission phase.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A transaction was sent and must be confirmed.
    Submitted {
        /// Strategy-constructed payload, journaled for the record.
        payload: Value,
        /// Hash of the submitted transaction.
        tx: TxHash,
    },
    /// The future resolved synchronously without a transaction
    /// (address bindings, event reads).
    Resolved {
        /// The resolved success value.
        value: SuccessValue,
    },
    /// The strategy failed while submitting. The driver cannot prove
    /// nothing reached the chain, so this is a footprint failure.
    Failed {
        /// Failure reason.
        reason: String,
    },
}

/// Result of waiting for a submitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    /// The transaction confirmed.
    Confirmed {
        /// Kind-specific success value (deployed address, decoded data).
        value: SuccessValue,
    },
    /// The transaction confirmed but reverted.
    Reverted,
    /// A read-only call failed after submission.
    StaticCallFailed {
        /// Failure reason.
        reason: String,
    },
    /// The strategy failed while watching the transaction.
    StrategyError {
        /// Failure reason.
        reason: String,
    },
    /// The strategy gave up waiting. The driver also enforces its own
    /// deadline around the whole confirmation wait.
    TimedOut,
}

/// Execution-time context shared by every future in a batch.
///
/// Carries the run's accounts and user parameters, plus the success
/// values of completed futures so address expressions can resolve.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Account addresses available to the run, in index order.
    pub accounts: Vec<Address>,
    /// User-supplied deployment parameters.
    pub parameters: HashMap<String, Value>,
    results: HashMap<FutureId, SuccessValue>,
}

impl ExecutionContext {
    /// Create a context for a run.
    #[must_use]
    pub fn new(accounts: Vec<Address>, parameters: HashMap<String, Value>) -> Self {
        Self {
            accounts,
            parameters,
            results: HashMap::new(),
        }
    }

    /// Record the success value of a completed future.
    pub fn record_result(&mut self, id: FutureId, value: SuccessValue) {
        self.results.insert(id, value);
    }

    /// Success value of a completed future, if any.
    #[must_use]
    pub fn result(&self, id: &FutureId) -> Option<&SuccessValue> {
        self.results.get(id)
    }

    /// Address produced by a completed future, if it produced one.
    #[must_use]
    pub fn address_of(&self, id: &FutureId) -> Option<Address> {
        match self.results.get(id) {
            Some(SuccessValue::Address { address }) => Some(*address),
            _ => None,
        }
    }

    /// Resolve an address expression against this context.
    ///
    /// Returns `None` when the expression references an account index out
    /// of range or a future that has not produced an address.
    #[must_use]
    pub fn resolve(&self, expr: &AddressExpr) -> Option<Address> {
        match expr {
            AddressExpr::Literal { address } => Some(*address),
            AddressExpr::Account { index } => self.accounts.get(*index).copied(),
            AddressExpr::FutureResult { future } => self.address_of(future),
        }
    }

    /// The account a future sends from. Defaults to account 0 when the
    /// future does not name one.
    #[must_use]
    pub fn sender(&self, future: &Future) -> Option<Address> {
        let index = future.params.from_account().unwrap_or(0);
        self.accounts.get(index).copied()
    }
}

/// How futures are simulated, submitted, and confirmed.
///
/// Implementations must be safe to call concurrently: the driver runs
/// every future of a batch against the same strategy instance.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Stable strategy name, journaled per future and checked on resume.
    fn name(&self) -> &str;

    /// Dry-run the future against current chain state.
    async fn simulate(&self, future: &Future, ctx: &ExecutionContext) -> SimulationOutcome;

    /// Submit the future's transaction, or resolve it synchronously for
    /// kinds that never submit one.
    async fn submit(&self, future: &Future, ctx: &ExecutionContext) -> SubmitOutcome;

    /// Wait for a submitted transaction to confirm.
    ///
    /// The driver wraps this call in its own confirmation deadline, so
    /// implementations may wait indefinitely.
    async fn confirm(&self, future: &Future, tx: TxHash) -> ConfirmationOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::graph::FutureParams;

    #[test]
    fn resolve_literal_and_account() {
        let ctx = ExecutionContext::new(vec![Address::new([1; 20]), Address::new([2; 20])], HashMap::new());

        let literal = AddressExpr::Literal {
            address: Address::new([9; 20]),
        };
        assert_eq!(ctx.resolve(&literal), Some(Address::new([9; 20])));

        let account = AddressExpr::Account { index: 1 };
        assert_eq!(ctx.resolve(&account), Some(Address::new([2; 20])));

        let out_of_range = AddressExpr::Account { index: 5 };
        assert_eq!(ctx.resolve(&out_of_range), None);
    }

    #[test]
    fn resolve_future_result() {
        let mut ctx = ExecutionContext::default();
        ctx.record_result(
            FutureId::from("token"),
            SuccessValue::Address {
                address: Address::new([7; 20]),
            },
        );
        ctx.record_result(FutureId::from("call"), SuccessValue::None);

        let expr = AddressExpr::FutureResult {
            future: FutureId::from("token"),
        };
        assert_eq!(ctx.resolve(&expr), Some(Address::new([7; 20])));

        // A completed future without an address value does not resolve.
        let expr = AddressExpr::FutureResult {
            future: FutureId::from("call"),
        };
        assert_eq!(ctx.resolve(&expr), None);
    }

    #[test]
    fn sender_defaults_to_first_account() {
        let ctx = ExecutionContext::new(vec![Address::new([1; 20]), Address::new([2; 20])], HashMap::new());

        let default_from = Future::new(
            "a",
            FutureParams::SendData {
                to: AddressExpr::Account { index: 0 },
                data: "0x".to_string(),
                value: 1,
                from: None,
            },
        );
        assert_eq!(ctx.sender(&default_from), Some(Address::new([1; 20])));

        let explicit_from = Future::new(
            "b",
            FutureParams::SendData {
                to: AddressExpr::Account { index: 0 },
                data: "0x".to_string(),
                value: 1,
                from: Some(1),
            },
        );
        assert_eq!(ctx.sender(&explicit_from), Some(Address::new([2; 20])));
    }
}
