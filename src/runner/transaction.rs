//! Ownership of the request's single open transaction.

use crate::db::StoreTransaction;
use crate::error::{DbExecError, Result};
use tracing::debug;

/// Holds the open transaction until it is committed or rolled back.
///
/// Once either has happened the guard is finished: further rollbacks are
/// no-ops and further statements are refused.
pub struct TransactionGuard {
    tx: Option<Box<dyn StoreTransaction>>,
}

impl TransactionGuard {
    pub fn new(tx: Box<dyn StoreTransaction>) -> Self {
        Self { tx: Some(tx) }
    }

    /// The open transaction.
    pub fn transaction(&mut self) -> Result<&mut (dyn StoreTransaction + 'static)> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| DbExecError::transaction("transaction already finished"))
    }

    pub fn is_finished(&self) -> bool {
        self.tx.is_none()
    }

    /// Commits the transaction. Fails if it is already finished.
    pub async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().await,
            None => Err(DbExecError::transaction("transaction already finished")),
        }
    }

    /// Rolls the transaction back. Safe to call any number of times.
    pub async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            debug!("Transaction dropped while open; the store discards its effects");
        }
    }
}
