//! Test support: a scripted in-memory strategy and graph builders.
//!
//! [`ScriptedStrategy`] answers the strategy protocol from per-future
//! scripts instead of a network, and records every call so tests can
//! assert on what was simulated and submitted.

use crate::strategy::{
    ConfirmationOutcome, ExecutionContext, ExecutionStrategy, SimulationOutcome, SubmitOutcome,
};
use async_trait::async_trait;
use dashmap::DashMap;
use kiln_core::graph::{AddressExpr, DeploymentGraph, Future, FutureParams};
use kiln_core::state::SuccessValue;
use kiln_core::types::{Address, FutureId, TxHash};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum SubmitAction {
    Transaction,
    Resolve(SuccessValue),
    Fail(String),
}

/// Scripted behavior of one future across the strategy protocol.
#[derive(Debug, Clone)]
pub struct FutureScript {
    simulate: SimulationOutcome,
    submit: SubmitAction,
    confirm: ConfirmationOutcome,
    confirm_delay: Option<Duration>,
}

impl FutureScript {
    fn submitting(confirm: ConfirmationOutcome) -> Self {
        Self {
            simulate: SimulationOutcome::Success,
            submit: SubmitAction::Transaction,
            confirm,
            confirm_delay: None,
        }
    }

    /// Deploys successfully and confirms with the given address.
    #[must_use]
    pub fn deploys(address: Address) -> Self {
        Self::submitting(ConfirmationOutcome::Confirmed {
            value: SuccessValue::Address { address },
        })
    }

    /// Submits and confirms with no payload (calls, sends).
    #[must_use]
    pub fn calls() -> Self {
        Self::submitting(ConfirmationOutcome::Confirmed {
            value: SuccessValue::None,
        })
    }

    /// Submits and confirms with decoded return data.
    #[must_use]
    pub fn returns_data(value: serde_json::Value) -> Self {
        Self::submitting(ConfirmationOutcome::Confirmed {
            value: SuccessValue::Data { value },
        })
    }

    /// Resolves synchronously without a transaction.
    #[must_use]
    pub fn resolves(value: SuccessValue) -> Self {
        Self {
            simulate: SimulationOutcome::Success,
            submit: SubmitAction::Resolve(value),
            confirm: ConfirmationOutcome::Confirmed {
                value: SuccessValue::None,
            },
            confirm_delay: None,
        }
    }

    /// Fails the simulation phase.
    #[must_use]
    pub fn fails_simulation(reason: impl Into<String>) -> Self {
        Self {
            simulate: SimulationOutcome::Failed {
                reason: reason.into(),
            },
            ..Self::calls()
        }
    }

    /// The strategy vetoes the simulation.
    #[must_use]
    pub fn rejected_by_strategy(reason: impl Into<String>) -> Self {
        Self {
            simulate: SimulationOutcome::StrategyRejected {
                reason: reason.into(),
            },
            ..Self::calls()
        }
    }

    /// Submits, then the transaction reverts.
    #[must_use]
    pub fn reverts() -> Self {
        Self::submitting(ConfirmationOutcome::Reverted)
    }

    /// Submits, then the static call fails.
    #[must_use]
    pub fn fails_static_call(reason: impl Into<String>) -> Self {
        Self::submitting(ConfirmationOutcome::StaticCallFailed {
            reason: reason.into(),
        })
    }

    /// The strategy fails during submission.
    #[must_use]
    pub fn fails_submission(reason: impl Into<String>) -> Self {
        Self {
            submit: SubmitAction::Fail(reason.into()),
            ..Self::calls()
        }
    }

    /// The strategy fails while watching the transaction.
    #[must_use]
    pub fn fails_confirmation(reason: impl Into<String>) -> Self {
        Self::submitting(ConfirmationOutcome::StrategyError {
            reason: reason.into(),
        })
    }

    /// Submits, then never confirms; used to exercise the driver's
    /// confirmation deadline.
    #[must_use]
    pub fn never_confirms() -> Self {
        Self::calls().with_confirm_delay(Duration::from_secs(3600))
    }

    /// Delay the confirmation by `delay` before answering.
    #[must_use]
    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = Some(delay);
        self
    }
}

/// An [`ExecutionStrategy`] driven by per-future scripts.
///
/// Unscripted futures succeed with a value derived from their kind, so
/// tests only script the futures they care about.
pub struct ScriptedStrategy {
    name: String,
    scripts: DashMap<FutureId, FutureScript>,
    simulations: Mutex<Vec<FutureId>>,
    submissions: Mutex<Vec<FutureId>>,
    next_tx: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedStrategy {
    /// Create a strategy named `"scripted"`.
    #[must_use]
    pub fn new() -> Self {
        Self::named("scripted")
    }

    /// Create a strategy with an explicit name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: DashMap::new(),
            simulations: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            next_tx: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Script the behavior of one future.
    #[must_use]
    pub fn script(self, id: impl Into<FutureId>, script: FutureScript) -> Self {
        self.scripts.insert(id.into(), script);
        self
    }

    /// Future ids simulated so far, in call order.
    #[must_use]
    pub fn simulations(&self) -> Vec<FutureId> {
        self.simulations.lock().clone()
    }

    /// Future ids submitted so far, in call order.
    #[must_use]
    pub fn submissions(&self) -> Vec<FutureId> {
        self.submissions.lock().clone()
    }

    /// Number of submissions made so far.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Highest number of confirmation waits observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script_for(&self, future: &Future) -> FutureScript {
        self.scripts
            .get(&future.id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| default_script(future))
    }

    fn fresh_tx(&self) -> TxHash {
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        TxHash::new(bytes)
    }
}

impl Default for ScriptedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn simulate(&self, future: &Future, _ctx: &ExecutionContext) -> SimulationOutcome {
        self.simulations.lock().push(future.id.clone());
        self.script_for(future).simulate
    }

    async fn submit(&self, future: &Future, _ctx: &ExecutionContext) -> SubmitOutcome {
        self.submissions.lock().push(future.id.clone());
        match self.script_for(future).submit {
            SubmitAction::Transaction => SubmitOutcome::Submitted {
                payload: json!({ "future": future.id.as_str() }),
                tx: self.fresh_tx(),
            },
            SubmitAction::Resolve(value) => SubmitOutcome::Resolved { value },
            SubmitAction::Fail(reason) => SubmitOutcome::Failed { reason },
        }
    }

    async fn confirm(&self, future: &Future, _tx: TxHash) -> ConfirmationOutcome {
        let script = self.script_for(future);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = script.confirm_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        script.confirm
    }
}

fn default_script(future: &Future) -> FutureScript {
    match &future.params {
        params if params.kind().is_deployment() => {
            FutureScript::deploys(address_for(&future.id))
        }
        FutureParams::ContractAt { .. } => FutureScript::resolves(SuccessValue::Address {
            address: address_for(&future.id),
        }),
        FutureParams::ReadEventArgument { .. } => FutureScript::resolves(SuccessValue::Data {
            value: json!("0x01"),
        }),
        FutureParams::StaticCall { .. } => FutureScript::returns_data(json!("0x01")),
        _ => FutureScript::calls(),
    }
}

/// Deterministic address derived from a future id.
#[must_use]
pub fn address_for(id: &FutureId) -> Address {
    let mut bytes = [0u8; 20];
    for (slot, byte) in bytes.iter_mut().zip(id.as_str().bytes().cycle()) {
        *slot = byte;
    }
    Address::new(bytes)
}

/// A named-artifact contract deployment future.
#[must_use]
pub fn deploy_future(id: &str) -> Future {
    Future::new(
        id,
        FutureParams::NamedArtifactContractDeployment {
            contract_name: "Token".to_string(),
            args: vec![json!(1000)],
            value: 0,
            from: None,
        },
    )
}

/// A contract call targeting another future's deployed address.
#[must_use]
pub fn call_future(id: &str, target: &str) -> Future {
    Future::new(
        id,
        FutureParams::ContractCall {
            target: AddressExpr::FutureResult {
                future: FutureId::from(target),
            },
            function: "initialize".to_string(),
            args: vec![],
            value: 0,
            from: None,
        },
    )
}

/// Build a graph from futures in declaration order.
///
/// # Panics
///
/// Panics on duplicate ids; test graphs are expected to be well formed.
#[must_use]
pub fn build_graph(futures: Vec<Future>) -> DeploymentGraph {
    let mut graph = DeploymentGraph::new();
    for future in futures {
        graph.add_future(future).expect("test graph ids are unique");
    }
    graph
}
