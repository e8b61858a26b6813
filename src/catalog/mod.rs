//! Query catalog.
//!
//! Holds the named query definitions loaded once at startup. The catalog is
//! immutable after construction and is passed by reference to whatever runs
//! queries, so concurrent readers need no coordination.

mod definition;

pub use definition::QueryDefinition;

use crate::error::{DbExecError, Result};
use definition::TomlDefinitions;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filename used when no definitions path is configured.
pub const DEFAULT_DEFINITIONS_PATH: &str = "queries.yaml";

/// Serialization format of a definitions file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
    Toml,
}

impl DefinitionFormat {
    /// Picks the format from the file extension. Anything unrecognized is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

/// Immutable mapping from query ID to definition.
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    queries: BTreeMap<String, QueryDefinition>,
    source: Option<PathBuf>,
}

impl QueryCatalog {
    /// Loads and validates definitions from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DbExecError::load(path, format!("failed to read file: {e}")))?;

        let mut catalog = Self::parse(&content, DefinitionFormat::from_path(path))
            .map_err(|e| match e {
                DbExecError::Load { message, .. } => DbExecError::load(path, message),
                other => other,
            })?;
        catalog.source = Some(path.to_path_buf());

        debug!(
            "Loaded {} query definitions from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Parses definitions from a string in the given format.
    pub fn parse(content: &str, format: DefinitionFormat) -> Result<Self> {
        let definitions: Vec<QueryDefinition> = match format {
            DefinitionFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| DbExecError::load(Path::new("<yaml>"), e.to_string()))?,
            DefinitionFormat::Json => serde_json::from_str(content)
                .map_err(|e| DbExecError::load(Path::new("<json>"), e.to_string()))?,
            DefinitionFormat::Toml => toml::from_str::<TomlDefinitions>(content)
                .map_err(|e| DbExecError::load(Path::new("<toml>"), e.to_string()))?
                .queries,
        };

        Self::from_definitions(definitions)
    }

    /// Builds a catalog from already-deserialized definitions.
    pub fn from_definitions(definitions: Vec<QueryDefinition>) -> Result<Self> {
        let mut queries = BTreeMap::new();

        for definition in definitions {
            validate(&definition)?;
            let id = definition.id.clone();
            if queries.insert(id.clone(), definition).is_some() {
                return Err(invalid(format!("duplicate query id '{id}'")));
            }
        }

        Ok(Self {
            queries,
            source: None,
        })
    }

    /// Returns the definition for `id`.
    pub fn lookup(&self, id: &str) -> Result<&QueryDefinition> {
        self.queries
            .get(id)
            .ok_or_else(|| DbExecError::UnknownQuery(id.to_string()))
    }

    /// Returns true if `id` is defined.
    pub fn contains(&self, id: &str) -> bool {
        self.queries.contains_key(id)
    }

    /// Iterates definitions in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &QueryDefinition> {
        self.queries.values()
    }

    /// Returns all IDs in order.
    pub fn ids(&self) -> Vec<&str> {
        self.queries.keys().map(String::as_str).collect()
    }

    /// Path the catalog was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn validate(definition: &QueryDefinition) -> Result<()> {
    if definition.id.trim().is_empty() {
        return Err(invalid("query definition with empty id"));
    }
    // IDs are requested as a comma-separated list
    if definition.id.contains(|c: char| c == ',' || c.is_whitespace()) {
        return Err(invalid(format!(
            "query id '{}' must not contain commas or whitespace",
            definition.id
        )));
    }
    if definition.sql.trim().is_empty() {
        return Err(invalid(format!("query '{}' has empty sql", definition.id)));
    }

    let mut seen = HashSet::new();
    for name in &definition.allowed_params {
        if !seen.insert(name.as_str()) {
            return Err(invalid(format!(
                "query '{}' lists parameter '{name}' more than once",
                definition.id
            )));
        }
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> DbExecError {
    DbExecError::load(Path::new("<definitions>"), msg)
}
