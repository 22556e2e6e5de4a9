//! Batch computation: leveling the dependency graph.
//!
//! A batch is a maximal set of futures whose dependencies are all already
//! satisfied, either by a previous batch in this run or by a prior run's
//! journaled successes. Batches execute in order; futures within a batch
//! are independent and may run concurrently.
//!
//! Futures that already succeeded are not scheduled again. Futures whose
//! transitive dependencies include a journaled failure are not scheduled
//! either; they are reported as blocked so the caller can see exactly why
//! nothing happened for them.

use kiln_core::error::{KilnError, Result};
use kiln_core::graph::DeploymentGraph;
use kiln_core::state::{ExecutionStateMap, ExecutionStatus};
use kiln_core::types::FutureId;
use std::collections::HashMap;

/// A future that cannot be scheduled because a dependency failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedFuture {
    /// The future that cannot run.
    pub future_id: FutureId,
    /// The failed (or transitively blocked) dependency it is waiting on.
    pub waiting_on: FutureId,
}

/// The leveled execution plan for one run.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Batches in execution order. Within a batch, futures appear in
    /// declaration order.
    pub batches: Vec<Vec<FutureId>>,
    /// Futures excluded because a dependency already failed, in
    /// declaration order.
    pub blocked: Vec<BlockedFuture>,
}

impl BatchPlan {
    /// Total number of futures scheduled across all batches.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Whether the plan schedules nothing and blocks nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.blocked.is_empty()
    }
}

/// Level the graph into batches, given the journaled state of prior runs.
///
/// Successful futures are treated as satisfied dependencies and dropped
/// from the plan. Failed futures are dropped too, and everything
/// depending on them (transitively) lands in `blocked`. Timed-out and
/// in-flight futures are scheduled normally so their waits can resume.
///
/// A dependency cycle is a construction error
/// ([`KilnError::DependencyCycle`]).
pub fn compute_batches(graph: &DeploymentGraph, states: &ExecutionStateMap) -> Result<BatchPlan> {
    graph.validate()?;

    let is_failed = |id: &FutureId| {
        states
            .get(id)
            .is_some_and(|s| s.status == ExecutionStatus::Failed)
    };

    let mut levels: HashMap<FutureId, usize> = HashMap::new();
    let mut blocked_on: HashMap<FutureId, FutureId> = HashMap::new();

    let mut remaining: Vec<_> = graph
        .futures()
        .filter(|f| !states.is_success(&f.id) && !is_failed(&f.id))
        .collect();

    // Fixpoint over the unleveled futures. Each pass levels every future
    // whose dependencies are all satisfied or already leveled, and blocks
    // every future with a failed or blocked dependency. No progress with
    // futures left over means a cycle.
    while !remaining.is_empty() {
        let mut progressed = false;
        let mut deferred = Vec::new();

        for future in remaining {
            let mut level = 0usize;
            let mut unresolved = false;
            let mut blocker = None;

            for dep in future.dependencies() {
                if states.is_success(&dep) {
                    continue;
                }
                if is_failed(&dep) || blocked_on.contains_key(&dep) {
                    blocker = Some(dep);
                    break;
                }
                match levels.get(&dep) {
                    Some(&dep_level) => level = level.max(dep_level + 1),
                    None => {
                        unresolved = true;
                        break;
                    }
                }
            }

            if let Some(dep) = blocker {
                blocked_on.insert(future.id.clone(), dep);
                progressed = true;
            } else if unresolved {
                deferred.push(future);
            } else {
                levels.insert(future.id.clone(), level);
                progressed = true;
            }
        }

        if !progressed {
            return Err(KilnError::DependencyCycle {
                futures: deferred.iter().map(|f| f.id.clone()).collect(),
            });
        }
        remaining = deferred;
    }

    // Fill batches by walking the graph in declaration order, so ties
    // within a level resolve deterministically.
    let depth = levels.values().map(|&l| l + 1).max().unwrap_or(0);
    let mut batches = vec![Vec::new(); depth];
    let mut blocked = Vec::new();
    for future in graph.futures() {
        if let Some(&level) = levels.get(&future.id) {
            batches[level].push(future.id.clone());
        } else if let Some(dep) = blocked_on.get(&future.id) {
            blocked.push(BlockedFuture {
                future_id: future.id.clone(),
                waiting_on: dep.clone(),
            });
        }
    }

    Ok(BatchPlan { batches, blocked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::graph::{Future, FutureParams};
    use kiln_core::state::{ExecutionResult, ExecutionState, SuccessValue};
    use kiln_core::types::TxHash;
    use kiln_core::FutureKind;
    use serde_json::json;

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

    fn graph(futures: Vec<Future>) -> DeploymentGraph {
        let mut graph = DeploymentGraph::new();
        for future in futures {
            graph.add_future(future).unwrap();
        }
        graph
    }

    fn succeeded(id: &str) -> ExecutionState {
        let mut state = ExecutionState::started(
            FutureId::from(id),
            FutureKind::NamedArtifactContractDeployment,
            vec![],
            json!({}),
            None,
            "direct",
        );
        state.succeed(SuccessValue::None).unwrap();
        state
    }

    fn failed(id: &str) -> ExecutionState {
        let mut state = ExecutionState::started(
            FutureId::from(id),
            FutureKind::ContractCall,
            vec![],
            json!({}),
            None,
            "direct",
        );
        state
            .fail(ExecutionResult::RevertedTransaction {
                tx: TxHash::new([0; 32]),
            })
            .unwrap();
        state
    }

    fn ids(batch: &[FutureId]) -> Vec<&str> {
        batch.iter().map(FutureId::as_str).collect()
    }

    #[test]
    fn independent_futures_share_a_batch() {
        let graph = graph(vec![deploy("a"), deploy("b"), deploy("c")]);
        let plan = compute_batches(&graph, &ExecutionStateMap::new()).unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(ids(&plan.batches[0]), vec!["a", "b", "c"]);
    }

    #[test]
    fn dependents_land_in_later_batches() {
        // a <- b <- d, plus independent c: [[a, c], [b], [d]].
        let graph = graph(vec![
            deploy("a"),
            deploy("b").after("a"),
            deploy("c"),
            deploy("d").after("b"),
        ]);
        let plan = compute_batches(&graph, &ExecutionStateMap::new()).unwrap();
        assert_eq!(plan.batches.len(), 3);
        assert_eq!(ids(&plan.batches[0]), vec!["a", "c"]);
        assert_eq!(ids(&plan.batches[1]), vec!["b"]);
        assert_eq!(ids(&plan.batches[2]), vec!["d"]);
    }

    #[test]
    fn ties_break_by_declaration_order() {
        // b is declared before its dependency's peer; within each level,
        // declaration order must hold regardless of leveling order.
        let graph = graph(vec![deploy("b").after("a"), deploy("a"), deploy("d").after("a")]);
        let plan = compute_batches(&graph, &ExecutionStateMap::new()).unwrap();
        assert_eq!(ids(&plan.batches[0]), vec!["a"]);
        assert_eq!(ids(&plan.batches[1]), vec!["b", "d"]);
    }

    #[test]
    fn prior_successes_are_skipped_and_satisfy_dependents() {
        let graph = graph(vec![deploy("a"), deploy("b").after("a")]);
        let mut states = ExecutionStateMap::new();
        states.insert(succeeded("a"));

        let plan = compute_batches(&graph, &states).unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(ids(&plan.batches[0]), vec!["b"]);
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn failed_dependency_blocks_transitively() {
        let graph = graph(vec![
            deploy("a"),
            deploy("b").after("a"),
            deploy("c").after("b"),
            deploy("d"),
        ]);
        let mut states = ExecutionStateMap::new();
        states.insert(failed("a"));

        let plan = compute_batches(&graph, &states).unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(ids(&plan.batches[0]), vec!["d"]);
        assert_eq!(
            plan.blocked,
            vec![
                BlockedFuture {
                    future_id: FutureId::from("b"),
                    waiting_on: FutureId::from("a"),
                },
                BlockedFuture {
                    future_id: FutureId::from("c"),
                    waiting_on: FutureId::from("b"),
                },
            ]
        );
    }

    #[test]
    fn cycle_is_rejected() {
        let graph = graph(vec![deploy("a").after("b"), deploy("b").after("a")]);
        let err = compute_batches(&graph, &ExecutionStateMap::new()).unwrap_err();
        match err {
            KilnError::DependencyCycle { futures } => {
                assert_eq!(futures.len(), 2);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn fully_deployed_graph_yields_empty_plan() {
        let graph = graph(vec![deploy("a"), deploy("b").after("a")]);
        let mut states = ExecutionStateMap::new();
        states.insert(succeeded("a"));
        states.insert(succeeded("b"));

        let plan = compute_batches(&graph, &states).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.scheduled_count(), 0);
    }
}
