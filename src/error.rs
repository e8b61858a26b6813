//! Error types for dbexec.
//!
//! Every failure that can abort a request is a variant here, carrying the
//! query ID (and for row-limit violations both counts) so a caller can
//! diagnose it without re-running.

use std::path::Path;
use thiserror::Error;

/// Main error type for dbexec operations.
#[derive(Error, Debug)]
pub enum DbExecError {
    /// Query definitions could not be read or deserialized.
    #[error("Failed to load query definitions from {path}: {message}")]
    Load { path: String, message: String },

    /// A requested query ID is not in the catalog.
    #[error("Unknown query ID: {0}")]
    UnknownQuery(String),

    /// An allow-listed parameter was not supplied.
    #[error("Missing parameter '{name}' for query {query_id}")]
    MissingParameter { query_id: String, name: String },

    /// A mutating statement could not be turned into a preview.
    #[error("Preview failed for {query_id}: {reason}")]
    PreviewTranslation { query_id: String, reason: String },

    /// The backing store rejected a statement.
    #[error("Execution error for {query_id}: {message}")]
    Execution { query_id: String, message: String },

    /// A statement touched more rows than its definition allows.
    #[error("Exceeded row limit for {query_id}: {actual} > {allowed}")]
    RowLimitExceeded {
        query_id: String,
        actual: u64,
        allowed: u64,
    },

    /// A query flagged `requires_approval` has no preview form and was run without approval.
    #[error("Query {0} requires approval; rerun with --approve")]
    ApprovalRequired(String),

    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction begin/commit errors.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Statement errors reported by the store before they are tied to a query ID.
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration errors (bad flags, malformed parameters, missing connection string).
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbExecError {
    /// Creates a load error for the given source path.
    pub fn load(path: &Path, msg: impl Into<String>) -> Self {
        Self::Load {
            path: path.display().to_string(),
            message: msg.into(),
        }
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Attributes a store-level failure to the query that caused it.
    pub fn for_query(self, query_id: &str) -> Self {
        match self {
            Self::Query(message) => Self::Execution {
                query_id: query_id.to_string(),
                message,
            },
            other => other,
        }
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Load { .. } => "Load Error",
            Self::UnknownQuery(_) => "Unknown Query",
            Self::MissingParameter { .. } => "Missing Parameter",
            Self::PreviewTranslation { .. } => "Preview Error",
            Self::Execution { .. } => "Execution Error",
            Self::RowLimitExceeded { .. } => "Row Limit Exceeded",
            Self::ApprovalRequired(_) => "Approval Required",
            Self::Connection(_) => "Connection Error",
            Self::Transaction(_) => "Transaction Error",
            Self::Query(_) => "Query Error",
            Self::Config(_) => "Configuration Error",
        }
    }
}

/// Result type alias using DbExecError.
pub type Result<T> = std::result::Result<T, DbExecError>;
