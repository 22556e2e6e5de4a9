//! The top-level deployment API.
//!
//! A [`Deployer`] owns a strategy and a journal, and turns a
//! [`DeploymentGraph`] into a finished (or refused) run: replay the
//! journal, reconcile the graph against it, level the remaining work into
//! batches, and drive them. The returned [`DeploymentResult`] enumerates
//! every future's outcome; nothing is reported through logs alone.

use crate::batcher::{compute_batches, BatchPlan};
use crate::driver::{Driver, DriverConfig, FutureOutcome};
use crate::reconcile::{reconcile, ReconciliationContext, ReconciliationResult};
use crate::strategy::{ExecutionContext, ExecutionStrategy};
use kiln_core::error::Result;
use kiln_core::graph::DeploymentGraph;
use kiln_core::journal::{Journal, JournalRecord};
use kiln_core::state::ExecutionStatus;
use kiln_core::types::{Address, FutureId, RunId};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Final report of one run.
#[derive(Debug)]
pub struct DeploymentResult {
    /// Identifier of this run.
    pub run_id: RunId,
    /// Outcome of every future in the graph. Empty when execution was
    /// refused by reconciliation.
    pub outcomes: BTreeMap<FutureId, FutureOutcome>,
    /// What reconciliation found before the run. Any failure here means
    /// nothing was executed.
    pub reconciliation: ReconciliationResult,
}

impl DeploymentResult {
    /// Whether reconciliation refused the run before any on-chain action.
    #[must_use]
    pub fn execution_refused(&self) -> bool {
        !self.reconciliation.failures.is_empty()
    }

    /// Whether every future completed successfully.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        !self.execution_refused()
            && !self.outcomes.is_empty()
            && self.outcomes.values().all(FutureOutcome::is_success)
    }

    /// Outcome of one future, if it was considered.
    #[must_use]
    pub fn outcome(&self, id: &FutureId) -> Option<&FutureOutcome> {
        self.outcomes.get(id)
    }
}

/// Orchestrates plan, reconcile, and execute against one journal.
pub struct Deployer {
    strategy: Arc<dyn ExecutionStrategy>,
    journal: Arc<Journal>,
    config: DriverConfig,
    accounts: Vec<Address>,
    parameters: HashMap<String, Value>,
}

impl Deployer {
    /// Create a deployer with default driver configuration.
    pub fn new(strategy: Arc<dyn ExecutionStrategy>, journal: Journal) -> Self {
        Self {
            strategy,
            journal: Arc::new(journal),
            config: DriverConfig::default(),
            accounts: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    /// Set the driver configuration.
    #[must_use]
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the account addresses available to runs, in index order.
    #[must_use]
    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Set the user-supplied deployment parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Compute the batch plan a run would execute, without executing.
    ///
    /// Planned against the current journal, so already-successful futures
    /// are absent and failure-blocked futures are listed.
    pub fn plan(&self, graph: &DeploymentGraph) -> Result<BatchPlan> {
        let states = self.journal.replay()?;
        compute_batches(graph, &states)
    }

    /// Reconcile the graph against the journal without executing.
    pub fn reconcile(&self, graph: &DeploymentGraph) -> Result<ReconciliationResult> {
        let states = self.journal.replay()?;
        Ok(reconcile(
            graph,
            &ReconciliationContext {
                states: &states,
                accounts: &self.accounts,
                parameters: &self.parameters,
                strategy: self.strategy.name(),
            },
        ))
    }

    /// Execute the graph to completion.
    pub async fn execute(&self, graph: &DeploymentGraph) -> Result<DeploymentResult> {
        self.execute_with_cancellation(graph, CancellationToken::new())
            .await
    }

    /// Execute the graph, stopping at the next safe point when `cancel`
    /// fires. In-flight confirmation waits stop immediately; their
    /// journaled submissions resume on the next run.
    #[instrument(skip_all, fields(futures = graph.len()))]
    pub async fn execute_with_cancellation(
        &self,
        graph: &DeploymentGraph,
        cancel: CancellationToken,
    ) -> Result<DeploymentResult> {
        graph.validate()?;
        let prior = self.journal.replay()?;
        let run_id = RunId::new();

        let reconciliation = reconcile(
            graph,
            &ReconciliationContext {
                states: &prior,
                accounts: &self.accounts,
                parameters: &self.parameters,
                strategy: self.strategy.name(),
            },
        );
        if !reconciliation.failures.is_empty() {
            warn!(
                run_id = %run_id,
                failures = reconciliation.failures.len(),
                "Refusing to execute: graph is incompatible with journaled record"
            );
            return Ok(DeploymentResult {
                run_id,
                outcomes: BTreeMap::new(),
                reconciliation,
            });
        }

        let plan = compute_batches(graph, &prior)?;
        info!(
            run_id = %run_id,
            batches = plan.batches.len(),
            scheduled = plan.scheduled_count(),
            blocked = plan.blocked.len(),
            "Starting run"
        );

        self.journal.append(&JournalRecord::run_start(
            run_id,
            self.strategy.name(),
            self.accounts.clone(),
        ))?;

        let driver = Driver::new(
            self.config.clone(),
            Arc::clone(&self.strategy),
            Arc::clone(&self.journal),
        );
        let context = ExecutionContext::new(self.accounts.clone(), self.parameters.clone());
        let report = driver.run(graph, &plan, prior, context, cancel).await?;

        let mut outcomes = report.outcomes;
        for blocked in &plan.blocked {
            outcomes.insert(
                blocked.future_id.clone(),
                FutureOutcome::Blocked {
                    waiting_on: blocked.waiting_on.clone(),
                },
            );
        }
        // Futures settled in prior runs were never scheduled; echo their
        // journaled outcome so the result covers the whole graph.
        for future in graph.futures() {
            if outcomes.contains_key(&future.id) {
                continue;
            }
            if let Some(state) = report.states.get(&future.id) {
                if let Some(result) = &state.result {
                    outcomes.insert(future.id.clone(), FutureOutcome::Completed(result.clone()));
                } else if state.status == ExecutionStatus::TimedOut {
                    outcomes.insert(future.id.clone(), FutureOutcome::TimedOut);
                }
            }
        }

        info!(run_id = %run_id, futures = outcomes.len(), "Run finished");
        Ok(DeploymentResult {
            run_id,
            outcomes,
            reconciliation,
        })
    }
}
