//! Runner integration tests against PostgreSQL.
//!
//! Each test creates its own table and drops it afterwards.

use db_exec::binder::ParameterMap;
use db_exec::catalog::{QueryCatalog, QueryDefinition};
use db_exec::config::ConnectionConfig;
use db_exec::db::{PostgresStore, StatementStore, StoreTransaction, Value};
use db_exec::error::DbExecError;
use db_exec::runner::{ExecutionRequest, StatementOutcome, TransactionOutcome, TransactionRunner};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a pool for setup and inspection.
async fn get_test_pool() -> Option<PgPool> {
    let url = get_test_database_url()?;
    PgPoolOptions::new().max_connections(2).connect(&url).await.ok()
}

/// Creates `users(user_id int, status text)` with the given rows.
async fn create_users_table(pool: &PgPool, name: &str, rows: &[(i32, &str)]) -> String {
    let table = format!("dbexec_it_{name}_{}", std::process::id());
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(&format!(
        "CREATE TABLE {table} (user_id INT PRIMARY KEY, status TEXT NOT NULL)"
    ))
    .execute(pool)
    .await
    .unwrap();
    for (id, status) in rows {
        sqlx::query(&format!("INSERT INTO {table} VALUES ($1, $2)"))
            .bind(*id)
            .bind(*status)
            .execute(pool)
            .await
            .unwrap();
    }
    table
}

async fn drop_table(pool: &PgPool, table: &str) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(pool)
        .await
        .unwrap();
}

async fn status_of(pool: &PgPool, table: &str, user_id: i32) -> String {
    sqlx::query_scalar(&format!("SELECT status FROM {table} WHERE user_id = $1"))
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn row_count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT count(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn execute_all(pool: &PgPool, statements: &[String]) {
    for sql in statements {
        sqlx::query(sql).execute(pool).await.unwrap();
    }
}

fn rendered(row: &[Value]) -> Vec<String> {
    row.iter().map(Value::to_display_string).collect()
}

fn single_query(id: &str, sql: String, names: &[&str]) -> QueryCatalog {
    QueryCatalog::from_definitions(vec![
        QueryDefinition::new(id, sql).with_params(names.iter().copied())
    ])
    .unwrap()
}

fn params(pairs: &[(&str, &str)]) -> ParameterMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_connect_with_config() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let config = ConnectionConfig::from_connection_string(&url).unwrap();
    let store = PostgresStore::connect(&config).await.unwrap();
    let mut tx = store.begin().await.unwrap();
    let result = tx.fetch("SELECT 1 AS num", &[]).await.unwrap();

    assert_eq!(result.column_names(), vec!["num"]);
    assert_eq!(result.rows, vec![vec![Value::Int(1)]]);
    tx.rollback().await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_preview_then_approve() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let table = create_users_table(&pool, "activate", &[(123, "pending"), (124, "pending")]).await;

    let catalog = QueryCatalog::from_definitions(vec![QueryDefinition::new(
        "activate_user",
        format!("UPDATE {table} SET status=$1 WHERE user_id=$2"),
    )
    .with_params(["status", "user_id"])
    .with_max_rows(1)])
    .unwrap();
    let store = PostgresStore::from_pool(pool.clone());
    let runner = TransactionRunner::new(&catalog);
    let request = ExecutionRequest::new(
        ["activate_user"],
        params(&[("status", "active"), ("user_id", "123")]),
    );

    let report = runner.run(&store, &request).await.unwrap();
    assert_eq!(report.outcome, TransactionOutcome::RolledBackDryRun);
    let StatementOutcome::Previewed { result } = &report.statements[0].outcome else {
        panic!("Expected preview, got {:?}", report.statements[0].outcome);
    };
    assert_eq!(result.column_names(), vec!["user_id", "status"]);
    assert_eq!(
        result.rows,
        vec![vec![Value::Int(123), Value::String("pending".to_string())]]
    );
    assert_eq!(status_of(&pool, &table, 123).await, "pending");

    let report = runner.run(&store, &request.approved()).await.unwrap();
    assert!(report.is_committed());
    assert_eq!(
        report.statements[0].outcome,
        StatementOutcome::Executed { rows_affected: 1 }
    );
    assert_eq!(status_of(&pool, &table, 123).await, "active");
    assert_eq!(status_of(&pool, &table, 124).await, "pending");

    drop_table(&pool, &table).await;
}

#[tokio::test]
async fn test_row_limit_rolls_back_earlier_statements() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let table = create_users_table(&pool, "limit", &[(1, "a"), (2, "b"), (3, "c")]).await;

    let catalog = QueryCatalog::from_definitions(vec![
        QueryDefinition::new(
            "rename_one",
            format!("UPDATE {table} SET status='renamed' WHERE user_id=$1"),
        )
        .with_params(["user_id"])
        .with_max_rows(1),
        QueryDefinition::new("purge_all", format!("DELETE FROM {table}")).with_max_rows(2),
    ])
    .unwrap();
    let store = PostgresStore::from_pool(pool.clone());
    let request =
        ExecutionRequest::new(["rename_one", "purge_all"], params(&[("user_id", "1")])).approved();

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    assert_eq!(report.outcome, TransactionOutcome::RolledBackOnError);
    assert!(matches!(
        report.error,
        Some(DbExecError::RowLimitExceeded {
            actual: 3,
            allowed: 2,
            ..
        })
    ));
    assert_eq!(row_count(&pool, &table).await, 3);
    assert_eq!(status_of(&pool, &table, 1).await, "a");

    drop_table(&pool, &table).await;
}

#[tokio::test]
async fn test_typed_parameters() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let catalog = QueryCatalog::from_definitions(vec![QueryDefinition::new(
        "typed",
        "SELECT $1::int8 + 1 AS n, NOT $2::bool AS b, $3::numeric * 2 AS d, $4::date AS day",
    )
    .with_params(["n", "b", "d", "day"])])
    .unwrap();
    let store = PostgresStore::from_pool(pool);
    let request = ExecutionRequest::new(
        ["typed"],
        params(&[("n", "41"), ("b", "false"), ("d", "1.25"), ("day", "2024-03-09")]),
    );

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    let result = report.statements[0].outcome.result().unwrap();
    let rendered: Vec<String> = result.rows[0]
        .iter()
        .map(Value::to_display_string)
        .collect();
    assert_eq!(rendered, vec!["42", "true", "2.50", "2024-03-09"]);
}

#[tokio::test]
async fn test_unparseable_parameter_is_execution_error() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let catalog = QueryCatalog::from_definitions(vec![QueryDefinition::new(
        "by_id",
        "SELECT $1::int4 AS id",
    )
    .with_params(["id"])])
    .unwrap();
    let store = PostgresStore::from_pool(pool);
    let request = ExecutionRequest::new(["by_id"], params(&[("id", "abc")]));

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    match report.error {
        Some(DbExecError::Execution { query_id, message }) => {
            assert_eq!(query_id, "by_id");
            assert!(message.contains("$1"));
        }
        other => panic!("Expected Execution error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_enum_parameter_and_extended_columns() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let pid = std::process::id();
    let status_type = format!("dbexec_it_status_{pid}");
    let table = format!("dbexec_it_accounts_{pid}");
    execute_all(
        &pool,
        &[
            format!("DROP TABLE IF EXISTS {table}"),
            format!("DROP TYPE IF EXISTS {status_type}"),
            format!("CREATE TYPE {status_type} AS ENUM ('pending', 'active')"),
            format!(
                "CREATE TABLE {table} (id INT PRIMARY KEY, status {status_type} NOT NULL, \
                 ttl INTERVAL, addr INET, balance MONEY, tags TEXT[])"
            ),
            format!(
                "INSERT INTO {table} VALUES (1, 'pending', '1 day 2 hours', '192.168.0.10', \
                 12.5, ARRAY['a', 'b'])"
            ),
        ],
    )
    .await;

    let catalog = single_query(
        "activate",
        format!("UPDATE {table} SET status=$1 WHERE id=$2"),
        &["status", "id"],
    );
    let store = PostgresStore::from_pool(pool.clone());
    let runner = TransactionRunner::new(&catalog);
    let request = ExecutionRequest::new(["activate"], params(&[("status", "active"), ("id", "1")]));

    let report = runner.run(&store, &request).await.unwrap();
    let StatementOutcome::Previewed { result } = &report.statements[0].outcome else {
        panic!("Expected preview, got {:?}", report.statements[0].outcome);
    };
    assert_eq!(
        rendered(&result.rows[0]),
        vec!["1", "pending", "1 day 02:00:00", "192.168.0.10", "12.50", "{a,b}"]
    );

    let report = runner.run(&store, &request.approved()).await.unwrap();
    assert!(report.is_committed(), "{:?}", report.error);
    let status: String = sqlx::query_scalar(&format!("SELECT status::text FROM {table} WHERE id = 1"))
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "active");

    execute_all(
        &pool,
        &[
            format!("DROP TABLE IF EXISTS {table}"),
            format!("DROP TYPE IF EXISTS {status_type}"),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_money_and_oid_parameters() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let table = format!("dbexec_it_ledger_{}", std::process::id());
    execute_all(
        &pool,
        &[
            format!("DROP TABLE IF EXISTS {table}"),
            format!("CREATE TABLE {table} (ref OID PRIMARY KEY, balance MONEY NOT NULL)"),
            format!("INSERT INTO {table} VALUES (1234, 0), (1235, 0)"),
        ],
    )
    .await;

    let catalog = single_query(
        "set_balance",
        format!("UPDATE {table} SET balance=$1 WHERE ref=$2"),
        &["balance", "ref"],
    );
    let store = PostgresStore::from_pool(pool.clone());
    let request = ExecutionRequest::new(
        ["set_balance"],
        params(&[("balance", "12345678"), ("ref", "1234")]),
    )
    .approved();

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    assert!(report.is_committed(), "{:?}", report.error);
    assert_eq!(
        report.statements[0].outcome,
        StatementOutcome::Executed { rows_affected: 1 }
    );
    let stored: String = sqlx::query_scalar(&format!(
        "SELECT balance::numeric::text FROM {table} WHERE ref = 1234"
    ))
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stored, "12345678.00");

    drop_table(&pool, &table).await;
}

#[tokio::test]
async fn test_interval_parameter_delete_preview() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let table = format!("dbexec_it_sessions_{}", std::process::id());
    execute_all(
        &pool,
        &[
            format!("DROP TABLE IF EXISTS {table}"),
            format!("CREATE TABLE {table} (id INT PRIMARY KEY, ttl INTERVAL NOT NULL)"),
            format!("INSERT INTO {table} VALUES (1, '30 minutes'), (2, '2 hours')"),
        ],
    )
    .await;

    let catalog = single_query(
        "expire_long",
        format!("DELETE FROM {table} WHERE ttl > $1"),
        &["ttl"],
    );
    let store = PostgresStore::from_pool(pool.clone());
    let runner = TransactionRunner::new(&catalog);
    let request = ExecutionRequest::new(["expire_long"], params(&[("ttl", "1 hour")]));

    let report = runner.run(&store, &request).await.unwrap();
    assert_eq!(report.outcome, TransactionOutcome::RolledBackDryRun);
    assert_eq!(
        report.statements[0].sql,
        format!("SELECT * FROM {table} WHERE ttl > $1")
    );
    let result = report.statements[0].outcome.result().unwrap();
    assert_eq!(result.column_names(), vec!["id", "ttl"]);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(rendered(&result.rows[0]), vec!["2", "02:00:00"]);
    assert_eq!(row_count(&pool, &table).await, 2);

    let report = runner.run(&store, &request.approved()).await.unwrap();
    assert_eq!(
        report.statements[0].outcome,
        StatementOutcome::Executed { rows_affected: 1 }
    );
    assert_eq!(row_count(&pool, &table).await, 1);

    drop_table(&pool, &table).await;
}

#[tokio::test]
async fn test_insert_values_preview() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let table = create_users_table(&pool, "insert", &[]).await;

    let catalog = single_query(
        "add_user",
        format!("INSERT INTO {table} (user_id, status) VALUES ($2, $1)"),
        &["status", "user_id"],
    );
    let store = PostgresStore::from_pool(pool.clone());
    let request = ExecutionRequest::new(["add_user"], params(&[("status", "new"), ("user_id", "5")]));

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    assert_eq!(report.outcome, TransactionOutcome::RolledBackDryRun);
    assert_eq!(
        report.statements[0].sql,
        "SELECT * FROM (VALUES ($1, $2)) AS preview (user_id, status)"
    );
    let result = report.statements[0].outcome.result().unwrap();
    assert_eq!(result.column_names(), vec!["user_id", "status"]);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(rendered(&result.rows[0]), vec!["5", "new"]);
    assert_eq!(row_count(&pool, &table).await, 0);

    drop_table(&pool, &table).await;
}

#[tokio::test]
async fn test_unsupported_parameter_type_is_execution_error() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let catalog = single_query("by_mac", "SELECT $1::macaddr AS mac".to_string(), &["mac"]);
    let store = PostgresStore::from_pool(pool);
    let request = ExecutionRequest::new(["by_mac"], params(&[("mac", "08:00:2b:01:02:03")]));

    let report = TransactionRunner::new(&catalog)
        .run(&store, &request)
        .await
        .unwrap();

    assert_eq!(report.outcome, TransactionOutcome::RolledBackOnError);
    match report.error {
        Some(DbExecError::Execution { query_id, message }) => {
            assert_eq!(query_id, "by_mac");
            assert!(message.contains("$1"));
            assert!(message.contains("unsupported parameter type macaddr"));
        }
        other => panic!("Expected Execution error, got {:?}", other),
    }
}
