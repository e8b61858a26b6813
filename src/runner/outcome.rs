//! Request and outcome types for the transaction runner.

use crate::binder::ParameterMap;
use crate::db::QueryResult;
use crate::error::DbExecError;
use serde::Serialize;
use std::fmt;

/// One invocation: the queries to run, their parameters and the approve flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Query IDs in execution order.
    pub query_ids: Vec<String>,

    /// Parameter values by name, shared by every query in the request.
    pub params: ParameterMap,

    /// Whether mutating statements may run for real and be committed.
    pub approve: bool,
}

impl ExecutionRequest {
    /// Creates a dry-run request.
    pub fn new<I, S>(query_ids: I, params: ParameterMap) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query_ids: query_ids.into_iter().map(Into::into).collect(),
            params,
            approve: false,
        }
    }

    /// Marks the request as approved.
    pub fn approved(mut self) -> Self {
        self.approve = true;
        self
    }

    /// Splits a comma-separated ID list, trimming entries and dropping empty ones.
    pub fn parse_ids(input: &str) -> Vec<String> {
        input
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    }
}

/// What happened to a single statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StatementOutcome {
    /// A mutating statement ran; holds the engine-reported affected-row count.
    Executed { rows_affected: u64 },

    /// A read-only statement ran; holds its result rows.
    Fetched { result: QueryResult },

    /// A mutating statement was previewed; holds the rows it would affect.
    Previewed { result: QueryResult },

    /// The statement aborted the request.
    Failed { reason: String },
}

impl StatementOutcome {
    /// Result rows, for fetched and previewed statements.
    pub fn result(&self) -> Option<&QueryResult> {
        match self {
            Self::Fetched { result } | Self::Previewed { result } => Some(result),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Report for one statement of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementReport {
    pub query_id: String,

    /// The SQL that was sent: the definition's statement, or its preview.
    pub sql: String,

    #[serde(flatten)]
    pub outcome: StatementOutcome,
}

impl StatementReport {
    pub fn new(query_id: impl Into<String>, sql: impl Into<String>, outcome: StatementOutcome) -> Self {
        Self {
            query_id: query_id.into(),
            sql: sql.into(),
            outcome,
        }
    }
}

/// How the request's transaction ended. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Committed,
    RolledBackDryRun,
    RolledBackOnError,
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::RolledBackDryRun => write!(f, "rolled back (dry run)"),
            Self::RolledBackOnError => write!(f, "rolled back on error"),
        }
    }
}

/// Everything a request produced.
#[derive(Debug)]
pub struct ExecutionReport {
    /// One entry per statement attempted, in order. Statements after a
    /// failure are not attempted and have no entry.
    pub statements: Vec<StatementReport>,

    pub outcome: TransactionOutcome,

    /// The error that rolled the request back, if any.
    pub error: Option<DbExecError>,
}

impl ExecutionReport {
    /// True when the request committed or finished its dry run.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_committed(&self) -> bool {
        self.outcome == TransactionOutcome::Committed
    }
}
