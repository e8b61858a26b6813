//! Output formatting for execution reports and catalog listings.
//!
//! Provides two formats: plain text and JSON.

use crate::catalog::QueryCatalog;
use crate::db::QueryResult;
use crate::runner::{ExecutionReport, StatementOutcome, StatementReport, TransactionOutcome};
use serde::Serialize;
use std::fmt::Write as _;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// A single JSON document.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {s}. Expected: text or json")),
        }
    }
}

/// JSON output structure.
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    statements: &'a [StatementReport],
    outcome: TransactionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonError>,
}

#[derive(Debug, Serialize)]
struct JsonError {
    category: &'static str,
    message: String,
}

/// Formats reports in the configured format.
pub struct ReportWriter {
    format: OutputFormat,
}

impl ReportWriter {
    /// Creates a new output formatter.
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats an execution report.
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Text => format_report_text(report),
            OutputFormat::Json => {
                let output = JsonReport {
                    statements: &report.statements,
                    outcome: report.outcome,
                    error: report.error.as_ref().map(|e| JsonError {
                        category: e.category(),
                        message: e.to_string(),
                    }),
                };
                to_json(&output)
            }
        }
    }

    /// Formats the catalog listing.
    pub fn format_catalog(&self, catalog: &QueryCatalog) -> String {
        match self.format {
            OutputFormat::Text => format_catalog_text(catalog),
            OutputFormat::Json => to_json(&catalog.iter().collect::<Vec<_>>()),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    let mut json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"Failed to serialize: {}\"}}", e));
    json.push('\n');
    json
}

fn format_report_text(report: &ExecutionReport) -> String {
    let mut out = String::new();

    for statement in &report.statements {
        let id = &statement.query_id;
        match &statement.outcome {
            StatementOutcome::Executed { rows_affected } => {
                let _ = writeln!(out, "[EXECUTED] QueryID={id} RowsAffected={rows_affected}");
            }
            StatementOutcome::Fetched { result } => {
                let _ = writeln!(out, "[EXECUTED] QueryID={id}");
                write_rows(&mut out, result);
            }
            StatementOutcome::Previewed { result } => {
                let _ = writeln!(out, "[PREVIEW] QueryID={id}");
                let _ = writeln!(out, "SQL: {}", statement.sql);
                write_rows(&mut out, result);
            }
            StatementOutcome::Failed { reason } => {
                let _ = writeln!(out, "[FAILED] QueryID={id} Error: {reason}");
            }
        }
    }

    let _ = writeln!(out, "Transaction {}", report.outcome);
    out
}

/// One block per row, one `  column: value` line per column.
fn write_rows(out: &mut String, result: &QueryResult) {
    for (index, row) in result.rows.iter().enumerate() {
        let _ = writeln!(out, "Row {}:", index + 1);
        for (column, value) in result.columns.iter().zip(row) {
            let _ = writeln!(out, "  {}: {}", column.name, value);
        }
    }
    let _ = writeln!(out, "Total rows: {}", result.row_count);
}

fn format_catalog_text(catalog: &QueryCatalog) -> String {
    if catalog.is_empty() {
        return "No queries defined.\n".to_string();
    }

    let mut out = String::new();
    for def in catalog.iter() {
        let mut flags = Vec::new();
        if def.requires_approval {
            flags.push("approval required".to_string());
        }
        if def.has_row_limit() {
            flags.push(format!("max rows: {}", def.max_rows_affected));
        }

        let _ = write!(out, "{}", def.id);
        if !flags.is_empty() {
            let _ = write!(out, " [{}]", flags.join(", "));
        }
        out.push('\n');

        if !def.description.is_empty() {
            let _ = writeln!(out, "    {}", def.description);
        }
        if !def.allowed_params.is_empty() {
            let _ = writeln!(out, "    params: {}", def.allowed_params.join(", "));
        }
    }
    out
}
