//! Statement classification and preview translation.
//!
//! Decides whether a statement is read-only and, for mutating statements,
//! derives a `SELECT` that reports the rows the statement would touch. The
//! runner only talks to the [`PreviewTranslator`] trait; [`KeywordTranslator`]
//! works on sqlparser tokens without building a syntax tree.

mod keyword;

pub use keyword::KeywordTranslator;

use std::fmt;
use thiserror::Error;

/// Whether running a statement can change stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementAccess {
    /// Safe to execute directly in any mode (SELECT, SHOW, plain EXPLAIN).
    ReadOnly,
    /// Must be previewed unless the request is approved.
    Mutating,
}

impl fmt::Display for StatementAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::Mutating => write!(f, "mutating"),
        }
    }
}

/// The leading statement keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Show,
    Values,
    Table,
    Explain,
    With,
    Insert,
    Update,
    Delete,
    Merge,
    Truncate,
    Drop,
    Alter,
    Create,
    Grant,
    Revoke,
    /// Some other leading keyword, kept for error messages.
    Other(String),
    /// No leading keyword could be found.
    Unknown,
}

impl StatementType {
    /// Maps a leading keyword (any case) to a statement type.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_uppercase().as_str() {
            "SELECT" => Self::Select,
            "SHOW" => Self::Show,
            "VALUES" => Self::Values,
            "TABLE" => Self::Table,
            "EXPLAIN" => Self::Explain,
            "WITH" => Self::With,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "TRUNCATE" => Self::Truncate,
            "DROP" => Self::Drop,
            "ALTER" => Self::Alter,
            "CREATE" => Self::Create,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Show => write!(f, "SHOW"),
            Self::Values => write!(f, "VALUES"),
            Self::Table => write!(f, "TABLE"),
            Self::Explain => write!(f, "EXPLAIN"),
            Self::With => write!(f, "WITH (CTE)"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Merge => write!(f, "MERGE"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Drop => write!(f, "DROP"),
            Self::Alter => write!(f, "ALTER"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Other(keyword) => write!(f, "{keyword}"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Result of classifying a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub access: StatementAccess,
    pub statement_type: StatementType,
}

impl Classification {
    pub fn new(access: StatementAccess, statement_type: StatementType) -> Self {
        Self {
            access,
            statement_type,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.access == StatementAccess::ReadOnly
    }
}

/// A non-mutating stand-in for a mutating statement.
///
/// The preview only references the placeholders that survive in the kept
/// clauses, renumbered from `$1`. `parameter_positions[i]` is the zero-based
/// index of the original argument that binds to the preview's `$(i + 1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewStatement {
    pub sql: String,
    pub parameter_positions: Vec<usize>,
}

impl PreviewStatement {
    /// Picks the preview's arguments out of the statement's full argument list.
    pub fn select_args(&self, args: &[String]) -> Result<Vec<String>, PreviewError> {
        self.parameter_positions
            .iter()
            .map(|&pos| {
                args.get(pos)
                    .cloned()
                    .ok_or(PreviewError::UnboundPlaceholder(pos + 1))
            })
            .collect()
    }
}

/// Why a statement could not be previewed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreviewError {
    #[error("{0} statements have no preview form")]
    Unsupported(StatementType),

    #[error("could not isolate the target table of the {0} statement")]
    MissingTarget(StatementType),

    #[error("{clause} clauses in {statement} statements are not supported in preview")]
    UnsupportedClause {
        statement: StatementType,
        clause: String,
    },

    #[error("multiple statements cannot be previewed")]
    MultipleStatements,

    #[error("unterminated {0}")]
    Unterminated(&'static str),

    #[error("cannot tokenize statement: {0}")]
    Tokenize(String),

    #[error("placeholder ${0} has no bound parameter")]
    UnboundPlaceholder(usize),

    #[error("empty statement")]
    Empty,
}

/// Classifies statements and derives previews for mutating ones.
pub trait PreviewTranslator: Send + Sync {
    /// Classifies a statement by its leading keyword.
    fn classify(&self, sql: &str) -> Classification;

    /// Derives a non-mutating preview of a mutating statement.
    fn translate(&self, sql: &str) -> Result<PreviewStatement, PreviewError>;
}
