//! Transaction runner.
//!
//! Runs the queries of one request, in order, inside a single transaction.
//! Read-only statements always execute. Mutating statements are previewed
//! unless the request is approved, in which case they execute under their
//! row limit. The transaction commits only when the request is approved and
//! every statement succeeded; otherwise it rolls back.

mod outcome;
mod transaction;

pub use outcome::{
    ExecutionReport, ExecutionRequest, StatementOutcome, StatementReport, TransactionOutcome,
};
pub use transaction::TransactionGuard;

use crate::binder::bind_parameters;
use crate::catalog::QueryCatalog;
use crate::db::{StatementStore, StoreTransaction};
use crate::error::{DbExecError, Result};
use crate::preview::{KeywordTranslator, PreviewError, PreviewTranslator};
use tracing::{debug, info, warn};

static KEYWORD_TRANSLATOR: KeywordTranslator = KeywordTranslator;

/// Sequences a request's statements against one transaction.
pub struct TransactionRunner<'a> {
    catalog: &'a QueryCatalog,
    translator: &'a dyn PreviewTranslator,
}

impl<'a> TransactionRunner<'a> {
    /// Creates a runner using the keyword-based preview translator.
    pub fn new(catalog: &'a QueryCatalog) -> Self {
        Self {
            catalog,
            translator: &KEYWORD_TRANSLATOR,
        }
    }

    /// Replaces the preview translator.
    pub fn with_translator(mut self, translator: &'a dyn PreviewTranslator) -> Self {
        self.translator = translator;
        self
    }

    /// Runs the request.
    ///
    /// Statement failures do not make this return `Err`: they roll the
    /// transaction back and are carried in the report. `Err` means no
    /// transaction could be started (or the request was empty).
    pub async fn run(
        &self,
        store: &dyn StatementStore,
        request: &ExecutionRequest,
    ) -> Result<ExecutionReport> {
        if request.query_ids.is_empty() {
            return Err(DbExecError::config("no query IDs given"));
        }

        let mut guard = TransactionGuard::new(store.begin().await?);
        debug!(
            "Transaction opened for {} statement(s), approve={}",
            request.query_ids.len(),
            request.approve
        );

        let mut statements = Vec::with_capacity(request.query_ids.len());
        let mut failure = None;

        for query_id in &request.query_ids {
            let result = match guard.transaction() {
                Ok(tx) => self.run_statement(tx, query_id, request).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(report) => statements.push(report),
                Err(e) => {
                    let sql = self
                        .catalog
                        .lookup(query_id)
                        .map(|def| def.sql.clone())
                        .unwrap_or_default();
                    statements.push(StatementReport::new(
                        query_id.as_str(),
                        sql,
                        StatementOutcome::Failed {
                            reason: e.to_string(),
                        },
                    ));
                    failure = Some(e);
                    break;
                }
            }
        }

        let (outcome, error) = match failure {
            Some(e) => {
                warn!("Rolling back: {e}");
                rollback(&mut guard).await;
                (TransactionOutcome::RolledBackOnError, Some(e))
            }
            None if request.approve => match guard.commit().await {
                Ok(()) => (TransactionOutcome::Committed, None),
                Err(e) => {
                    warn!("Commit failed: {e}");
                    (TransactionOutcome::RolledBackOnError, Some(e))
                }
            },
            None => {
                rollback(&mut guard).await;
                (TransactionOutcome::RolledBackDryRun, None)
            }
        };

        info!("Transaction {outcome}");
        Ok(ExecutionReport {
            statements,
            outcome,
            error,
        })
    }

    async fn run_statement(
        &self,
        tx: &mut dyn StoreTransaction,
        query_id: &str,
        request: &ExecutionRequest,
    ) -> Result<StatementReport> {
        let definition = self.catalog.lookup(query_id)?;
        let args = bind_parameters(definition, &request.params)?;
        let classification = self.translator.classify(&definition.sql);

        debug!(
            "Running {query_id} ({}, {})",
            classification.statement_type, classification.access
        );

        if classification.is_read_only() {
            if definition.requires_approval && !request.approve {
                return Err(DbExecError::ApprovalRequired(query_id.to_string()));
            }
            let result = tx
                .fetch(&definition.sql, &args)
                .await
                .map_err(|e| e.for_query(query_id))?;
            return Ok(StatementReport::new(
                query_id,
                definition.sql.as_str(),
                StatementOutcome::Fetched { result },
            ));
        }

        if !request.approve {
            let preview_error = |e: PreviewError| DbExecError::PreviewTranslation {
                query_id: query_id.to_string(),
                reason: e.to_string(),
            };
            let preview = self
                .translator
                .translate(&definition.sql)
                .map_err(preview_error)?;
            let preview_args = preview.select_args(&args).map_err(preview_error)?;

            debug!("Previewing {query_id} as: {}", preview.sql);
            let result = tx
                .fetch(&preview.sql, &preview_args)
                .await
                .map_err(|e| e.for_query(query_id))?;
            return Ok(StatementReport::new(
                query_id,
                preview.sql,
                StatementOutcome::Previewed { result },
            ));
        }

        let rows_affected = tx
            .execute(&definition.sql, &args)
            .await
            .map_err(|e| e.for_query(query_id))?;
        debug!("{query_id} affected {rows_affected} row(s)");

        if definition.has_row_limit() && rows_affected > definition.max_rows_affected {
            return Err(DbExecError::RowLimitExceeded {
                query_id: query_id.to_string(),
                actual: rows_affected,
                allowed: definition.max_rows_affected,
            });
        }

        Ok(StatementReport::new(
            query_id,
            definition.sql.as_str(),
            StatementOutcome::Executed { rows_affected },
        ))
    }
}

/// Rolls back, logging instead of failing: the outcome is already decided
/// and the store discards an unfinished transaction on its own.
async fn rollback(guard: &mut TransactionGuard) {
    if let Err(e) = guard.rollback().await {
        warn!("Rollback failed: {e}");
    }
}
