//! Transactional properties of the runner, checked against the in-memory store.

use db_exec::binder::ParameterMap;
use db_exec::catalog::{QueryCatalog, QueryDefinition};
use db_exec::db::{ColumnInfo, MockStore, QueryResult, Value};
use db_exec::error::DbExecError;
use db_exec::runner::{ExecutionRequest, StatementOutcome, TransactionOutcome, TransactionRunner};

const ACTIVATE_SQL: &str = "UPDATE users SET status=$1 WHERE user_id=$2";
const ACTIVATE_PREVIEW: &str = "SELECT * FROM users WHERE user_id=$1";
const CLOSE_SQL: &str = "DELETE FROM sessions WHERE user_id=$1";
const CLOSE_PREVIEW: &str = "SELECT * FROM sessions WHERE user_id=$1";

fn catalog() -> QueryCatalog {
    QueryCatalog::from_definitions(vec![
        QueryDefinition::new("activate_user", ACTIVATE_SQL)
            .with_params(["status", "user_id"])
            .with_max_rows(1),
        QueryDefinition::new("close_sessions", CLOSE_SQL)
            .with_params(["user_id"])
            .with_max_rows(5),
    ])
    .unwrap()
}

fn params(pairs: &[(&str, &str)]) -> ParameterMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn activate_params() -> ParameterMap {
    params(&[("status", "active"), ("user_id", "123")])
}

fn user_123() -> QueryResult {
    QueryResult::with_data(
        vec![
            ColumnInfo::new("user_id", "INT4"),
            ColumnInfo::new("status", "TEXT"),
        ],
        vec![vec![Value::Int(123), Value::from("pending")]],
    )
}

#[tokio::test]
async fn test_dry_run_never_persists() {
    let catalog = catalog();
    let store = MockStore::new()
        .with_result(ACTIVATE_PREVIEW, user_123())
        .with_rows_affected(ACTIVATE_SQL, 1)
        .with_rows_affected(CLOSE_SQL, 2);
    let request = ExecutionRequest::new(["activate_user", "close_sessions"], activate_params());

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    assert_eq!(report.outcome, TransactionOutcome::RolledBackDryRun);
    assert!(store.committed().is_empty());
    assert!(store
        .statements()
        .iter()
        .all(|s| s.sql.starts_with("SELECT")));
}

#[tokio::test]
async fn test_approved_applies_all_in_order() {
    let catalog = catalog();
    let store = MockStore::new()
        .with_rows_affected(ACTIVATE_SQL, 1)
        .with_rows_affected(CLOSE_SQL, 2);
    let request =
        ExecutionRequest::new(["activate_user", "close_sessions"], activate_params()).approved();

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    assert!(report.is_committed());
    let committed: Vec<_> = store.committed().into_iter().map(|s| s.sql).collect();
    assert_eq!(committed, vec![ACTIVATE_SQL, CLOSE_SQL]);
}

#[tokio::test]
async fn test_unknown_id_leaves_store_unchanged() {
    let catalog = catalog();

    for approve in [false, true] {
        let store = MockStore::new().with_rows_affected(ACTIVATE_SQL, 1);
        let mut request =
            ExecutionRequest::new(["activate_user", "missing_query"], activate_params());
        request.approve = approve;

        let report = TransactionRunner::new(&catalog)
            .run(&store, &request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TransactionOutcome::RolledBackOnError);
        assert!(matches!(report.error, Some(DbExecError::UnknownQuery(_))));
        assert!(store.committed().is_empty());
    }
}

#[tokio::test]
async fn test_preview_is_repeatable() {
    let catalog = catalog();
    let store = MockStore::new().with_result(ACTIVATE_PREVIEW, user_123());
    let request = ExecutionRequest::new(["activate_user"], activate_params());
    let runner = TransactionRunner::new(&catalog);

    let first = runner.run(&store, &request).await.unwrap();
    let second = runner.run(&store, &request).await.unwrap();

    assert_eq!(first.statements, second.statements);
    assert_eq!(store.rollback_count(), 2);
}

#[tokio::test]
async fn test_row_limit_boundary() {
    let catalog = catalog();

    let at_limit = MockStore::new().with_rows_affected(CLOSE_SQL, 5);
    let request = ExecutionRequest::new(["close_sessions"], activate_params()).approved();
    let report = TransactionRunner::new(&catalog)
        .run(&at_limit, &request)
        .await
        .unwrap();
    assert!(report.is_committed());

    let over_limit = MockStore::new()
        .with_rows_affected(ACTIVATE_SQL, 1)
        .with_rows_affected(CLOSE_SQL, 6);
    let request =
        ExecutionRequest::new(["activate_user", "close_sessions"], activate_params()).approved();
    let report = TransactionRunner::new(&catalog)
        .run(&over_limit, &request)
        .await
        .unwrap();

    assert!(matches!(
        report.error,
        Some(DbExecError::RowLimitExceeded {
            ref query_id,
            actual: 6,
            allowed: 5,
        }) if query_id == "close_sessions"
    ));
    assert!(over_limit.committed().is_empty());
}

#[tokio::test]
async fn test_extra_parameters_have_no_effect() {
    let catalog = catalog();
    let request = ExecutionRequest::new(["activate_user"], activate_params()).approved();

    let mut with_extra = activate_params();
    with_extra.insert("1; DROP TABLE users".to_string(), "x".to_string());
    with_extra.insert("role".to_string(), "admin".to_string());
    let extra_request = ExecutionRequest::new(["activate_user"], with_extra).approved();

    let plain_store = MockStore::new();
    let extra_store = MockStore::new();
    let runner = TransactionRunner::new(&catalog);
    runner.run(&plain_store, &request).await.unwrap();
    runner.run(&extra_store, &extra_request).await.unwrap();

    assert_eq!(plain_store.statements(), extra_store.statements());
}

#[tokio::test]
async fn test_activate_user_example() {
    let catalog = catalog();
    let store = MockStore::new()
        .with_result(ACTIVATE_PREVIEW, user_123())
        .with_rows_affected(ACTIVATE_SQL, 1);
    let runner = TransactionRunner::new(&catalog);

    let dry = ExecutionRequest::new(["activate_user"], activate_params());
    let report = runner.run(&store, &dry).await.unwrap();
    assert_eq!(
        report.statements[0].outcome,
        StatementOutcome::Previewed { result: user_123() }
    );
    assert!(store.committed().is_empty());

    let report = runner.run(&store, &dry.approved()).await.unwrap();
    assert_eq!(
        report.statements[0].outcome,
        StatementOutcome::Executed { rows_affected: 1 }
    );
    assert_eq!(report.outcome, TransactionOutcome::Committed);
    assert_eq!(store.committed()[0].args, vec!["active", "123"]);
}

#[tokio::test]
async fn test_preview_binds_only_kept_placeholders() {
    let catalog = catalog();
    let store = MockStore::new();
    let request = ExecutionRequest::new(["close_sessions"], params(&[("user_id", "7")]));

    TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    let sent = store.statements();
    assert_eq!(sent[0].sql, CLOSE_PREVIEW);
    assert_eq!(sent[0].args, vec!["7"]);
}
