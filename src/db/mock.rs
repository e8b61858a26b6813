//! In-memory store for testing.
//!
//! Statements are not interpreted. Results and affected-row counts are
//! scripted per SQL string, and every executed statement is recorded as
//! pending until its transaction commits, so tests can check what a request
//! would have persisted.

use super::{QueryResult, StatementStore, StoreTransaction};
use crate::error::{DbExecError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A statement sent to the mock, with its bound arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub sql: String,
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    results: HashMap<String, QueryResult>,
    rows_affected: HashMap<String, u64>,
    failures: HashMap<String, String>,
    begin_failure: Option<String>,
    commit_failure: Option<String>,

    /// Every statement sent, in order, committed or not.
    seen: Vec<RecordedStatement>,
    /// Mutating statements from committed transactions.
    committed: Vec<RecordedStatement>,
    commits: usize,
    rollbacks: usize,
}

/// A scripted store that tracks committed versus discarded effects.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<MockState>>,
}

impl MockStore {
    /// Creates a mock where every fetch returns no rows and every execute affects 0 rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the result set returned when `sql` is fetched.
    pub fn with_result(self, sql: impl Into<String>, result: QueryResult) -> Self {
        self.lock().results.insert(sql.into(), result);
        self
    }

    /// Scripts the affected-row count returned when `sql` is executed.
    pub fn with_rows_affected(self, sql: impl Into<String>, rows: u64) -> Self {
        self.lock().rows_affected.insert(sql.into(), rows);
        self
    }

    /// Makes any fetch or execute of `sql` fail with `message`.
    pub fn with_failure(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.lock().failures.insert(sql.into(), message.into());
        self
    }

    /// Makes `begin` fail.
    pub fn failing_begin(self, message: impl Into<String>) -> Self {
        self.lock().begin_failure = Some(message.into());
        self
    }

    /// Makes `commit` fail.
    pub fn failing_commit(self, message: impl Into<String>) -> Self {
        self.lock().commit_failure = Some(message.into());
        self
    }

    /// Mutating statements that were committed.
    pub fn committed(&self) -> Vec<RecordedStatement> {
        self.lock().committed.clone()
    }

    /// Every statement sent to the store.
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.lock().seen.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    pub fn rollback_count(&self) -> usize {
        self.lock().rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StatementStore for MockStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        if let Some(message) = &self.lock().begin_failure {
            return Err(DbExecError::transaction(message.clone()));
        }
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Transaction handle handed out by [`MockStore`].
struct MockTransaction {
    state: Arc<Mutex<MockState>>,
    pending: Vec<RecordedStatement>,
}

impl MockTransaction {
    fn record(&self, sql: &str, args: &[String]) -> Result<RecordedStatement> {
        let statement = RecordedStatement {
            sql: sql.to_string(),
            args: args.to_vec(),
        };
        let mut state = lock(&self.state);
        state.seen.push(statement.clone());
        match state.failures.get(sql) {
            Some(message) => Err(DbExecError::query(message.clone())),
            None => Ok(statement),
        }
    }
}

#[async_trait]
impl StoreTransaction for MockTransaction {
    async fn fetch(&mut self, sql: &str, args: &[String]) -> Result<QueryResult> {
        self.record(sql, args)?;
        Ok(lock(&self.state)
            .results
            .get(sql)
            .cloned()
            .unwrap_or_default())
    }

    async fn execute(&mut self, sql: &str, args: &[String]) -> Result<u64> {
        let statement = self.record(sql, args)?;
        self.pending.push(statement);
        Ok(lock(&self.state)
            .rows_affected
            .get(sql)
            .copied()
            .unwrap_or(0))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(message) = state.commit_failure.clone() {
            state.rollbacks += 1;
            return Err(DbExecError::transaction(message));
        }
        state.committed.extend(self.pending.iter().cloned());
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        lock(&self.state).rollbacks += 1;
        Ok(())
    }
}
