//! Audit log writer
//!
//! Turns the receipt of a committed operation into append-only
//! [`StockMovementLog`] entries and persists them. Entry ids are UUIDv7 and
//! timestamps are assigned here at append time, never taken from the caller.
//!
//! Log appends happen after the quantity commit, so a crash in between can
//! leave a committed quantity change without its log entries. The facade
//! surfaces that as a non-fatal `audit_error` rather than failing the
//! operation (see [`LedgerOutcome`](crate::ledger::LedgerOutcome)).

use crate::{
    store::StockStore,
    types::{Actor, MovementReceipt, OperationReceipt, StockMovementLog},
    Error, Result,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Validates and appends movement log entries
pub struct AuditWriter<S: StockStore> {
    store: Arc<S>,
}

impl<S: StockStore> std::fmt::Debug for AuditWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditWriter").finish()
    }
}

impl<S: StockStore> AuditWriter<S> {
    /// Create a writer over an explicit store client
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Build and append one log entry per movement leg of `receipt`.
    ///
    /// Returns the entries as appended. Fails with `InvalidLogEntry` before
    /// touching the store if any entry is incomplete or its arithmetic does
    /// not hold.
    pub fn append_for_receipt(
        &self,
        receipt: &OperationReceipt,
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<Vec<StockMovementLog>> {
        let entries: Vec<StockMovementLog> = receipt
            .movements
            .iter()
            .map(|movement| build_entry(movement, &receipt.related_transaction_id, actor, notes))
            .collect();

        for entry in &entries {
            validate_entry(entry)?;
        }

        self.store.append_movement_logs(&entries)?;
        tracing::debug!(
            related_transaction_id = %receipt.related_transaction_id,
            entries = entries.len(),
            "Appended movement logs"
        );
        Ok(entries)
    }
}

fn build_entry(
    movement: &MovementReceipt,
    related_transaction_id: &str,
    actor: &Actor,
    notes: Option<&str>,
) -> StockMovementLog {
    StockMovementLog {
        id: Uuid::now_v7().to_string(),
        stock_item_id: movement.item_id.clone(),
        movement_type: movement.movement_type,
        quantity_before: movement.quantity_before,
        quantity_after: movement.quantity_after,
        quantity_change: movement.quantity_change(),
        user_id: actor.uid.clone(),
        user_name: actor.display_name.clone(),
        timestamp: Utc::now(),
        site_id: movement.site_id.clone(),
        stall_id: movement.stall_id.clone(),
        notes: notes
            .map(String::from)
            .unwrap_or_else(|| default_notes(movement)),
        related_transaction_id: related_transaction_id.to_string(),
        linked_stock_item_id: movement.linked_item_id.clone(),
        master_stock_item_id_for_context: movement.master_item_id_for_context.clone(),
    }
}

fn default_notes(movement: &MovementReceipt) -> String {
    let delta = movement.quantity_change();
    match &movement.linked_item_id {
        Some(linked) => format!(
            "{}: {} -> {} ({:+}), paired with {}",
            movement.movement_type,
            movement.quantity_before,
            movement.quantity_after,
            delta,
            linked
        ),
        None => format!(
            "{}: {} -> {} ({:+})",
            movement.movement_type, movement.quantity_before, movement.quantity_after, delta
        ),
    }
}

fn validate_entry(entry: &StockMovementLog) -> Result<()> {
    if entry.stock_item_id.is_empty() {
        return Err(Error::InvalidLogEntry("missing stock_item_id".to_string()));
    }
    if entry.site_id.is_empty() {
        return Err(Error::InvalidLogEntry("missing site_id".to_string()));
    }
    if entry.user_id.is_empty() {
        return Err(Error::InvalidLogEntry("missing user_id".to_string()));
    }
    if entry.related_transaction_id.is_empty() {
        return Err(Error::InvalidLogEntry(
            "missing related_transaction_id".to_string(),
        ));
    }
    if !entry.arithmetic_holds() {
        return Err(Error::InvalidLogEntry(format!(
            "inconsistent arithmetic for {}: {} -> {} with change {}",
            entry.stock_item_id, entry.quantity_before, entry.quantity_after, entry.quantity_change
        )));
    }
    Ok(())
}
