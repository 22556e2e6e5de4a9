//! Reconciliation of edited graphs against journaled runs.

mod common;

use kiln_core::graph::{AddressExpr, Future, FutureParams};
use kiln_core::types::{Address, FutureId};
use kiln_core::{Journal, JournalConfig};
use kiln_executor::testing::{build_graph, deploy_future, ScriptedStrategy};
use kiln_executor::{Deployer, ExecutionStrategy};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn journal_in(dir: &Path) -> Journal {
    Journal::open(
        JournalConfig::default()
            .with_directory(dir)
            .with_sync(false),
    )
    .unwrap()
}

fn deployer_in(dir: &Path, strategy: Arc<ScriptedStrategy>, accounts: Vec<Address>) -> Deployer {
    Deployer::new(
        strategy as Arc<dyn ExecutionStrategy>,
        journal_in(dir),
    )
    .with_accounts(accounts)
}

fn token_with_supply(id: &str, supply: u64) -> Future {
    Future::new(
        id,
        FutureParams::NamedArtifactContractDeployment {
            contract_name: "Token".to_string(),
            args: vec![json!(supply)],
            value: 0,
            from: None,
        },
    )
}

#[tokio::test]
async fn changed_arguments_refuse_execution_with_one_failure() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let accounts = vec![Address::new([1; 20])];

    {
        let graph = build_graph(vec![token_with_supply("a", 1000)]);
        let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), accounts.clone());
        assert!(deployer.execute(&graph).await.unwrap().is_complete_success());
    }

    // Same future, different constructor argument.
    let edited = build_graph(vec![token_with_supply("a", 2000)]);
    let strategy = Arc::new(ScriptedStrategy::new());
    let deployer = deployer_in(dir.path(), Arc::clone(&strategy), accounts);
    let result = deployer.execute(&edited).await.unwrap();

    assert!(result.execution_refused());
    assert_eq!(result.reconciliation.failures.len(), 1);
    assert_eq!(
        result.reconciliation.failures[0].future_id,
        FutureId::from("a")
    );
    assert!(result.outcomes.is_empty());
    // Refusal happened before any on-chain action.
    assert!(strategy.simulations().is_empty());
    assert_eq!(strategy.submission_count(), 0);
}

#[tokio::test]
async fn removed_successful_future_is_reported_not_refused() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();

    {
        let graph = build_graph(vec![deploy_future("a"), deploy_future("b")]);
        let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
        assert!(deployer.execute(&graph).await.unwrap().is_complete_success());
    }

    let narrowed = build_graph(vec![deploy_future("b")]);
    let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
    let result = deployer.execute(&narrowed).await.unwrap();

    assert!(!result.execution_refused());
    assert_eq!(
        result.reconciliation.missing_executed_futures,
        vec![FutureId::from("a")]
    );
    assert!(!result.reconciliation.is_clean());
    // The surviving future's outcome is still reported.
    assert!(result.outcome(&FutureId::from("b")).unwrap().is_success());
}

#[tokio::test]
async fn changed_kind_refuses_execution() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();

    {
        let graph = build_graph(vec![deploy_future("a")]);
        let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
        assert!(deployer.execute(&graph).await.unwrap().is_complete_success());
    }

    let edited = build_graph(vec![Future::new(
        "a",
        FutureParams::SendData {
            to: AddressExpr::Account { index: 0 },
            data: "0x".to_string(),
            value: 0,
            from: None,
        },
    )]);
    let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
    let result = deployer.execute(&edited).await.unwrap();

    assert!(result.execution_refused());
    assert!(result
        .reconciliation
        .failures
        .iter()
        .any(|f| f.reason.contains("kind")));
}

#[tokio::test]
async fn dropped_dependency_refuses_execution() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let with_edge = build_graph(vec![
        deploy_future("a"),
        deploy_future("b"),
        token_with_supply("c", 500).after("a").after("b"),
    ]);
    {
        let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
        assert!(deployer.execute(&with_edge).await.unwrap().is_complete_success());
    }

    let without_edge = build_graph(vec![
        deploy_future("a"),
        deploy_future("b"),
        token_with_supply("c", 500).after("a"),
    ]);
    let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
    let result = deployer.execute(&without_edge).await.unwrap();

    assert!(result.execution_refused());
    assert_eq!(result.reconciliation.failures.len(), 1);
    assert!(result.reconciliation.failures[0].reason.contains("b"));
}

#[tokio::test]
async fn changed_accounts_refuse_execution() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let graph = build_graph(vec![deploy_future("a")]);

    {
        let deployer = deployer_in(
            dir.path(),
            Arc::new(ScriptedStrategy::new()),
            vec![Address::new([1; 20])],
        );
        assert!(deployer.execute(&graph).await.unwrap().is_complete_success());
    }

    let deployer = deployer_in(
        dir.path(),
        Arc::new(ScriptedStrategy::new()),
        vec![Address::new([2; 20])],
    );
    let result = deployer.execute(&graph).await.unwrap();

    assert!(result.execution_refused());
    assert!(result
        .reconciliation
        .failures
        .iter()
        .any(|f| f.reason.contains("account")));
}

#[tokio::test]
async fn changed_strategy_refuses_execution() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let graph = build_graph(vec![deploy_future("a")]);

    {
        let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::named("direct")), vec![]);
        assert!(deployer.execute(&graph).await.unwrap().is_complete_success());
    }

    let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::named("create2")), vec![]);
    let result = deployer.execute(&graph).await.unwrap();

    assert!(result.execution_refused());
    assert!(result
        .reconciliation
        .failures
        .iter()
        .any(|f| f.reason.contains("strategy")));
}

#[tokio::test]
async fn every_drifted_future_is_reported_at_once() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();

    {
        let graph = build_graph(vec![token_with_supply("a", 1), token_with_supply("b", 2)]);
        let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
        assert!(deployer.execute(&graph).await.unwrap().is_complete_success());
    }

    // Both futures drift; both must be reported, not just the first.
    let edited = build_graph(vec![token_with_supply("a", 10), token_with_supply("b", 20)]);
    let deployer = deployer_in(dir.path(), Arc::new(ScriptedStrategy::new()), vec![]);
    let result = deployer.execute(&edited).await.unwrap();

    assert!(result.execution_refused());
    let drifted: Vec<&str> = result
        .reconciliation
        .failures
        .iter()
        .map(|f| f.future_id.as_str())
        .collect();
    assert_eq!(drifted, vec!["a", "b"]);
}
