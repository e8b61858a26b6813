//! Query definition records as they appear in the definitions file.

use serde::{Deserialize, Serialize};

/// A named, pre-approved SQL statement.
///
/// `allowed_params` is ordered: the n-th name binds to placeholder `$n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// Unique key the caller uses to request this query.
    pub id: String,

    /// Free-text description shown by `--list`.
    #[serde(default)]
    pub description: String,

    /// Statement template with positional placeholders `$1…$n`.
    pub sql: String,

    /// Only ever run in preview form unless the request is approved.
    #[serde(default)]
    pub requires_approval: bool,

    /// Upper bound on rows an approved mutating run may touch. 0 means unlimited.
    #[serde(default)]
    pub max_rows_affected: u64,

    /// Parameter names in binding order.
    #[serde(default)]
    pub allowed_params: Vec<String>,
}

impl QueryDefinition {
    /// Creates a definition with no parameters, no row limit and no approval requirement.
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            sql: sql.into(),
            requires_approval: false,
            max_rows_affected: 0,
            allowed_params: Vec::new(),
        }
    }

    /// Sets the allow-listed parameters, in binding order.
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the row ceiling.
    pub fn with_max_rows(mut self, max_rows_affected: u64) -> Self {
        self.max_rows_affected = max_rows_affected;
        self
    }

    /// Marks the definition as requiring approval.
    pub fn approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns true if a row ceiling applies.
    pub fn has_row_limit(&self) -> bool {
        self.max_rows_affected > 0
    }
}

/// TOML has no top-level arrays, so definitions live under `[[queries]]`.
#[derive(Debug, Deserialize)]
pub(super) struct TomlDefinitions {
    #[serde(default)]
    pub queries: Vec<QueryDefinition>,
}
