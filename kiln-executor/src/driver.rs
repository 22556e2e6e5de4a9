//! The execution driver: runs a batch plan to completion.
//!
//! The driver walks batches in order and runs each batch's futures
//! concurrently, bounded by a semaphore. Every future moves through the
//! same per-future protocol: simulate, journal the start, submit, journal
//! the submission, wait for confirmation, journal the terminal record.
//! Each journal append completes before the driver proceeds, so a crash
//! at any point leaves a journal that replays to exactly the externally
//! visible progress.
//!
//! On resume, a future with a journaled submission picks its confirmation
//! wait back up instead of resubmitting.

use crate::batcher::BatchPlan;
use crate::strategy::{
    ConfirmationOutcome, ExecutionContext, ExecutionStrategy, SimulationOutcome, SubmitOutcome,
};
use kiln_core::error::{KilnError, Result};
use kiln_core::graph::{DeploymentGraph, Future};
use kiln_core::journal::{Journal, JournalRecord};
use kiln_core::state::{
    ExecutionResult, ExecutionState, ExecutionStateMap, InteractionAttempt,
};
use kiln_core::types::{FutureId, TxHash};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Configuration for the execution driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Maximum number of futures executing concurrently within a batch.
    pub max_concurrent_futures: usize,
    /// Deadline for a single confirmation wait. Exceeding it marks the
    /// future timed out; the wait resumes on the next run.
    pub confirmation_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_concurrent_futures: 16,
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

impl DriverConfig {
    /// Set the concurrency bound.
    #[must_use]
    pub fn with_max_concurrent_futures(mut self, max: usize) -> Self {
        self.max_concurrent_futures = max.max(1);
        self
    }

    /// Set the confirmation deadline.
    #[must_use]
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Create configuration from environment variables, or use defaults.
    ///
    /// Reads `KILN_MAX_CONCURRENT_FUTURES` and
    /// `KILN_CONFIRMATION_TIMEOUT_MS`.
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(max) = std::env::var("KILN_MAX_CONCURRENT_FUTURES") {
            if let Ok(max) = max.parse::<usize>() {
                config.max_concurrent_futures = max.max(1);
            }
        }
        if let Ok(ms) = std::env::var("KILN_CONFIRMATION_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                config.confirmation_timeout = Duration::from_millis(ms);
            }
        }
        config
    }
}

/// Per-future outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum FutureOutcome {
    /// The future reached a terminal result (success or failure).
    Completed(ExecutionResult),
    /// The confirmation wait exceeded its deadline; resumable.
    TimedOut,
    /// A dependency failed, so the future never ran.
    Blocked {
        /// The dependency it is waiting on.
        waiting_on: FutureId,
    },
    /// The run was cancelled before the future settled.
    Cancelled,
}

impl FutureOutcome {
    /// Whether the future completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(result) if result.is_success())
    }
}

/// What a run produced: per-future outcomes and the updated state map.
#[derive(Debug)]
pub struct DriverReport {
    /// Outcome of every future the driver considered this run.
    pub outcomes: BTreeMap<FutureId, FutureOutcome>,
    /// Execution states after the run, prior states included.
    pub states: ExecutionStateMap,
}

/// Drives a batch plan against a strategy, journaling as it goes.
pub struct Driver {
    config: DriverConfig,
    strategy: Arc<dyn ExecutionStrategy>,
    journal: Arc<Journal>,
}

impl Driver {
    /// Create a driver.
    pub fn new(
        config: DriverConfig,
        strategy: Arc<dyn ExecutionStrategy>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            config,
            strategy,
            journal,
        }
    }

    /// Run the plan to completion (or cancellation).
    ///
    /// `states` carries the journaled record of prior runs; it is updated
    /// in place and returned in the report. Fails only on journal faults
    /// or task panics; per-future failures are outcomes, not errors.
    #[instrument(skip_all, fields(batches = plan.batches.len()))]
    pub async fn run(
        &self,
        graph: &DeploymentGraph,
        plan: &BatchPlan,
        mut states: ExecutionStateMap,
        mut context: ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<DriverReport> {
        // Prior successes feed address resolution for this run.
        for (id, state) in states.iter() {
            if let Some(ExecutionResult::Success { value }) = &state.result {
                context.record_result(id.clone(), value.clone());
            }
        }

        let mut outcomes = BTreeMap::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_futures));

        for (batch_index, batch) in plan.batches.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(batch = batch_index, "Run cancelled; skipping remaining batches");
                mark_cancelled(&mut outcomes, &plan.batches[batch_index..]);
                break;
            }

            debug!(batch = batch_index, futures = batch.len(), "Dispatching batch");
            let batch_context = Arc::new(context.clone());
            let mut tasks: JoinSet<Result<TaskResult>> = JoinSet::new();
            let mut task_ids: HashMap<tokio::task::Id, FutureId> = HashMap::new();

            for id in batch {
                let future = graph
                    .get(id)
                    .ok_or_else(|| KilnError::UnknownFuture {
                        future_id: id.clone(),
                    })?
                    .clone();

                // The plan placed every dependency in an earlier batch; one
                // that is not successful by now failed during this run.
                if let Some(dep) = future
                    .dependencies()
                    .into_iter()
                    .find(|dep| !states.is_success(dep))
                {
                    debug!(future_id = %id, waiting_on = %dep, "Dependency unresolved; blocking");
                    outcomes.insert(id.clone(), FutureOutcome::Blocked { waiting_on: dep });
                    continue;
                }

                let task = FutureTask {
                    strategy: Arc::clone(&self.strategy),
                    journal: Arc::clone(&self.journal),
                    future,
                    prior: states.get(id).cloned(),
                    context: Arc::clone(&batch_context),
                    timeout: self.config.confirmation_timeout,
                    cancel: cancel.clone(),
                    semaphore: Arc::clone(&semaphore),
                };
                let handle = tasks.spawn(task.run());
                task_ids.insert(handle.id(), id.clone());
            }

            while let Some(joined) = tasks.join_next_with_id().await {
                let task_result = match joined {
                    Ok((_, result)) => result?,
                    Err(e) => {
                        let future_id = task_ids
                            .get(&e.id())
                            .cloned()
                            .unwrap_or_else(|| FutureId::new(""));
                        return Err(KilnError::TaskPanic {
                            future_id,
                            cause: e.to_string(),
                        });
                    }
                };

                info!(
                    future_id = %task_result.future_id,
                    outcome = ?task_result.outcome,
                    "Future settled"
                );
                if let Some(state) = task_result.state {
                    if let Some(ExecutionResult::Success { value }) = &state.result {
                        context.record_result(state.future_id.clone(), value.clone());
                    }
                    states.insert(state);
                }
                outcomes.insert(task_result.future_id, task_result.outcome);
            }
        }

        Ok(DriverReport { outcomes, states })
    }
}

fn mark_cancelled(outcomes: &mut BTreeMap<FutureId, FutureOutcome>, batches: &[Vec<FutureId>]) {
    for batch in batches {
        for id in batch {
            outcomes
                .entry(id.clone())
                .or_insert(FutureOutcome::Cancelled);
        }
    }
}

struct TaskResult {
    future_id: FutureId,
    outcome: FutureOutcome,
    /// Updated execution state, `None` when nothing durable changed.
    state: Option<ExecutionState>,
}

impl TaskResult {
    fn unchanged(future_id: FutureId, outcome: FutureOutcome) -> Self {
        Self {
            future_id,
            outcome,
            state: None,
        }
    }
}

/// Everything one spawned future execution needs, captured by value.
struct FutureTask {
    strategy: Arc<dyn ExecutionStrategy>,
    journal: Arc<Journal>,
    future: Future,
    prior: Option<ExecutionState>,
    context: Arc<ExecutionContext>,
    timeout: Duration,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
}

impl FutureTask {
    #[instrument(skip_all, fields(future_id = %self.future.id, kind = %self.future.kind()))]
    async fn run(self) -> Result<TaskResult> {
        let future_id = self.future.id.clone();

        let Ok(_permit) = self.semaphore.acquire().await else {
            return Ok(TaskResult::unchanged(future_id, FutureOutcome::Cancelled));
        };
        if self.cancel.is_cancelled() {
            return Ok(TaskResult::unchanged(future_id, FutureOutcome::Cancelled));
        }

        if let Some(mut state) = self.prior.clone() {
            // A journaled submission means the transaction may already be
            // on chain. Never resubmit; pick the wait back up.
            if let Some(tx) = state.pending_submission().and_then(|a| a.tx) {
                info!(tx = %tx, "Resuming confirmation wait for recorded submission");
                self.journal
                    .append(&JournalRecord::wait_resumed(future_id.clone()))?;
                state.resume_wait();
                return self.await_confirmation(state, tx).await;
            }
            // Execution started but nothing was submitted before the
            // interruption, so the definition may legitimately have been
            // edited since. Run the full protocol again; the fresh start
            // record it journals supersedes the stale one on replay.
        }

        self.execute().await
    }

    /// The simulate / journal-start / submit / confirm protocol.
    async fn execute(&self) -> Result<TaskResult> {
        let future_id = self.future.id.clone();

        match self.strategy.simulate(&self.future, &self.context).await {
            SimulationOutcome::Success => {}
            SimulationOutcome::Failed { reason } => {
                // No footprint and nothing journaled; the future stays
                // schedulable on the next run.
                debug!(%reason, "Simulation failed");
                return Ok(TaskResult::unchanged(
                    future_id,
                    FutureOutcome::Completed(ExecutionResult::SimulationError { reason }),
                ));
            }
            SimulationOutcome::StrategyRejected { reason } => {
                debug!(%reason, "Strategy rejected simulation");
                return Ok(TaskResult::unchanged(
                    future_id,
                    FutureOutcome::Completed(ExecutionResult::StrategySimulationError { reason }),
                ));
            }
        }

        let account = if self.future.kind().submits_transaction() {
            self.context.sender(&self.future)
        } else {
            None
        };
        let dependencies = self.future.dependencies();
        let params = serde_json::to_value(&self.future.params).map_err(|e| {
            KilnError::JournalWrite {
                future_id: future_id.clone(),
                cause: e.to_string(),
            }
        })?;

        self.journal.append(&JournalRecord::execution_start(
            future_id.clone(),
            self.future.kind(),
            dependencies.clone(),
            params.clone(),
            account,
            self.strategy.name(),
        ))?;
        let mut state = ExecutionState::started(
            future_id.clone(),
            self.future.kind(),
            dependencies,
            params,
            account,
            self.strategy.name(),
        );

        match self.strategy.submit(&self.future, &self.context).await {
            SubmitOutcome::Resolved { value } => {
                self.journal
                    .append(&JournalRecord::success(future_id.clone(), value.clone()))?;
                state.succeed(value.clone())?;
                Ok(TaskResult {
                    future_id,
                    outcome: FutureOutcome::Completed(ExecutionResult::Success { value }),
                    state: Some(state),
                })
            }
            SubmitOutcome::Submitted { payload, tx } => {
                self.journal.append(&JournalRecord::submission(
                    future_id.clone(),
                    payload.clone(),
                    Some(tx),
                ))?;
                state.record_submission(InteractionAttempt {
                    payload,
                    tx: Some(tx),
                    note: None,
                })?;
                self.await_confirmation(state, tx).await
            }
            SubmitOutcome::Failed { reason } => {
                // The submit path ran, so the chain may have seen the
                // transaction. Treated as a footprint failure.
                let result = ExecutionResult::StrategyError { reason };
                self.journal
                    .append(&JournalRecord::failure(future_id.clone(), result.clone()))?;
                state.fail(result.clone())?;
                Ok(TaskResult {
                    future_id,
                    outcome: FutureOutcome::Completed(result),
                    state: Some(state),
                })
            }
        }
    }

    async fn await_confirmation(
        &self,
        mut state: ExecutionState,
        tx: TxHash,
    ) -> Result<TaskResult> {
        let future_id = state.future_id.clone();

        let confirmation = tokio::select! {
            () = self.cancel.cancelled() => {
                // The submission record is durable; the next run resumes
                // this wait.
                return Ok(TaskResult {
                    future_id,
                    outcome: FutureOutcome::Cancelled,
                    state: Some(state),
                });
            }
            confirmed = tokio::time::timeout(self.timeout, self.strategy.confirm(&self.future, tx)) => {
                match confirmed {
                    Ok(outcome) => outcome,
                    Err(_) => ConfirmationOutcome::TimedOut,
                }
            }
        };

        match confirmation {
            ConfirmationOutcome::Confirmed { value } => {
                self.journal
                    .append(&JournalRecord::success(future_id.clone(), value.clone()))?;
                state.succeed(value.clone())?;
                Ok(TaskResult {
                    future_id,
                    outcome: FutureOutcome::Completed(ExecutionResult::Success { value }),
                    state: Some(state),
                })
            }
            ConfirmationOutcome::Reverted => {
                self.settle_failure(state, ExecutionResult::RevertedTransaction { tx })
            }
            ConfirmationOutcome::StaticCallFailed { reason } => {
                self.settle_failure(state, ExecutionResult::FailedStaticCall { reason })
            }
            ConfirmationOutcome::StrategyError { reason } => {
                self.settle_failure(state, ExecutionResult::StrategyError { reason })
            }
            ConfirmationOutcome::TimedOut => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    tx = %tx,
                    "Confirmation wait timed out"
                );
                self.journal
                    .append(&JournalRecord::timeout(future_id.clone()))?;
                state.time_out()?;
                Ok(TaskResult {
                    future_id,
                    outcome: FutureOutcome::TimedOut,
                    state: Some(state),
                })
            }
        }
    }

    fn settle_failure(
        &self,
        mut state: ExecutionState,
        result: ExecutionResult,
    ) -> Result<TaskResult> {
        let future_id = state.future_id.clone();
        self.journal
            .append(&JournalRecord::failure(future_id.clone(), result.clone()))?;
        state.fail(result.clone())?;
        Ok(TaskResult {
            future_id,
            outcome: FutureOutcome::Completed(result),
            state: Some(state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::compute_batches;
    use crate::testing::{FutureScript, ScriptedStrategy};
    use kiln_core::graph::FutureParams;
    use kiln_core::types::Address;

    fn deploy(id: &str) -> Future {
        Future::new(
            id,
            FutureParams::NamedArtifactContractDeployment {
                contract_name: "Token".to_string(),
                args: vec![],
                value: 0,
                from: None,
            },
        )
    }

    #[test]
    fn config_defaults_and_builders() {
        let config = DriverConfig::default();
        assert_eq!(config.max_concurrent_futures, 16);
        assert_eq!(config.confirmation_timeout, Duration::from_secs(60));

        let config = DriverConfig::default()
            .with_max_concurrent_futures(0)
            .with_confirmation_timeout(Duration::from_millis(250));
        // The bound never drops below one.
        assert_eq!(config.max_concurrent_futures, 1);
        assert_eq!(config.confirmation_timeout, Duration::from_millis(250));
    }

    struct ExplodingStrategy;

    #[async_trait::async_trait]
    impl ExecutionStrategy for ExplodingStrategy {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn simulate(&self, _future: &Future, _ctx: &ExecutionContext) -> SimulationOutcome {
            panic!("provider connection poisoned")
        }

        async fn submit(&self, _future: &Future, _ctx: &ExecutionContext) -> SubmitOutcome {
            unreachable!()
        }

        async fn confirm(&self, _future: &Future, _tx: TxHash) -> ConfirmationOutcome {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn task_panic_names_the_future() {
        let mut graph = DeploymentGraph::new();
        graph.add_future(deploy("token")).unwrap();

        let driver = Driver::new(
            DriverConfig::default(),
            Arc::new(ExplodingStrategy),
            Arc::new(Journal::in_memory()),
        );
        let plan = compute_batches(&graph, &ExecutionStateMap::new()).unwrap();
        let err = driver
            .run(
                &graph,
                &plan,
                ExecutionStateMap::new(),
                ExecutionContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            KilnError::TaskPanic { future_id, .. } => {
                assert_eq!(future_id, FutureId::from("token"));
            }
            other => panic!("expected a task panic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn happy_path_journals_and_reports_success() {
        let mut graph = DeploymentGraph::new();
        graph.add_future(deploy("token")).unwrap();

        let strategy = Arc::new(
            ScriptedStrategy::new().script("token", FutureScript::deploys(Address::new([7; 20]))),
        );
        let journal = Arc::new(Journal::in_memory());
        let driver = Driver::new(DriverConfig::default(), strategy, Arc::clone(&journal));

        let plan = compute_batches(&graph, &ExecutionStateMap::new()).unwrap();
        let report = driver
            .run(
                &graph,
                &plan,
                ExecutionStateMap::new(),
                ExecutionContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let outcome = &report.outcomes[&FutureId::from("token")];
        assert!(outcome.is_success());
        assert_eq!(
            report
                .states
                .get(&FutureId::from("token"))
                .unwrap()
                .deployed_address(),
            Some(Address::new([7; 20]))
        );

        // Start, submission, and success were all journaled.
        let states = journal.replay().unwrap();
        assert!(states.is_success(&FutureId::from("token")));
    }
}
