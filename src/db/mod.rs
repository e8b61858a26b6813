//! Backing-store abstraction.
//!
//! The runner only needs transaction begin, parameterized fetch/execute,
//! rows-affected reporting and commit/rollback. These are expressed as two
//! traits so any store offering them can back a request.

mod interval;
mod mock;
mod postgres;
mod types;

pub use mock::{MockStore, RecordedStatement};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use types::{ColumnInfo, QueryResult, Row, Value, TIMESTAMP_FORMAT};

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Creates a store for the given connection.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn StatementStore>> {
    let store = PostgresStore::connect(config).await?;
    Ok(Box::new(store))
}

/// A store that can open transactions.
#[async_trait]
pub trait StatementStore: Send + Sync {
    /// Opens a new transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Closes the store's connections.
    async fn close(&self) -> Result<()>;
}

/// One open transaction, exclusively owned by its caller.
///
/// Arguments are bound positionally to `$1…$n`. Statement failures are
/// reported as `DbExecError::Query`.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Runs a statement and reads its result set to completion.
    async fn fetch(&mut self, sql: &str, args: &[String]) -> Result<QueryResult>;

    /// Runs a statement and returns the engine-reported affected-row count.
    async fn execute(&mut self, sql: &str, args: &[String]) -> Result<u64>;

    /// Makes all effects of the transaction durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all effects of the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
