//! Batch coordinator
//!
//! Applies a list of stall-record actions one transaction at a time. Entries
//! are isolated: a failing entry is reported and the rest still apply. All
//! movement logs of one batch share a single batch transaction id.

use crate::{
    ledger::{LedgerOutcome, StockLedger},
    store::StockStore,
    types::{Actor, MovementType},
    Error, Result,
};
use uuid::Uuid;

/// One action within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Set a stall record's quantity
    SetQuantity { item_id: String, new_quantity: i64 },
    /// Delete a stall record
    Delete { item_id: String },
}

impl BatchOperation {
    /// The record this action targets
    pub fn item_id(&self) -> &str {
        match self {
            BatchOperation::SetQuantity { item_id, .. } => item_id,
            BatchOperation::Delete { item_id } => item_id,
        }
    }
}

/// Outcome of one batch entry
#[derive(Debug)]
pub struct BatchEntryResult {
    /// Record the entry targeted
    pub item_id: String,

    /// Committed outcome, or the error that rejected this entry
    pub outcome: std::result::Result<LedgerOutcome, Error>,
}

/// Per-entry outcomes of one batch, in submission order
#[derive(Debug)]
pub struct BatchReport {
    /// Transaction id shared by every log entry the batch produced
    pub batch_transaction_id: String,

    /// One result per submitted entry
    pub entries: Vec<BatchEntryResult>,
}

impl BatchReport {
    /// Number of entries that committed
    pub fn applied(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_ok()).count()
    }

    /// Number of entries that were rejected
    pub fn failed(&self) -> usize {
        self.entries.len() - self.applied()
    }
}

impl<S: StockStore> StockLedger<S> {
    /// Apply a batch of stall-record actions.
    ///
    /// Each entry is its own atomic transaction. Entry failures are captured
    /// in the report; only an empty batch is rejected outright.
    pub async fn apply_batch(
        &self,
        operations: &[BatchOperation],
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<BatchReport> {
        if operations.is_empty() {
            return Err(Error::InvalidArgument("Batch is empty".to_string()));
        }

        let batch_transaction_id = Uuid::now_v7().to_string();
        let mut entries = Vec::with_capacity(operations.len());

        for operation in operations {
            let item_id = operation.item_id().to_string();
            let result = match operation {
                BatchOperation::SetQuantity { item_id, new_quantity } => {
                    self.engine()
                        .set_quantity(item_id, *new_quantity, MovementType::BatchStallUpdateSet)
                        .await
                }
                BatchOperation::Delete { item_id } => {
                    self.engine().delete_stall_item(item_id).await
                }
            };

            let outcome = match result {
                Ok(mut receipt) => {
                    // Group the batch's logs under one transaction id
                    receipt.related_transaction_id = batch_transaction_id.clone();
                    Ok(self.audit_receipt(receipt, actor, notes))
                }
                Err(e) => {
                    tracing::warn!(
                        batch_transaction_id = %batch_transaction_id,
                        item_id = %item_id,
                        error = %e,
                        "Batch entry rejected"
                    );
                    Err(e)
                }
            };
            entries.push(BatchEntryResult { item_id, outcome });
        }

        tracing::info!(
            batch_transaction_id = %batch_transaction_id,
            total = entries.len(),
            failed = entries.iter().filter(|e| e.outcome.is_err()).count(),
            "Batch applied"
        );
        Ok(BatchReport {
            batch_transaction_id,
            entries,
        })
    }
}
