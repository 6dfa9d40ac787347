//! Ledger transaction engine
//!
//! Every public operation is one atomic snapshot/commit round trip against
//! the store, retried a bounded number of times when a concurrent writer
//! aborts the commit. Operations validate invariants against the snapshot,
//! stage equal-and-opposite quantity moves where two records are involved,
//! and return an [`OperationReceipt`] describing every touched record.
//!
//! The engine never writes movement logs; the caller appends them after the
//! commit (see [`StockLedger`](crate::StockLedger)).
//!
//! No idempotency key accompanies retried operations: a caller-level retry
//! after an ambiguous failure can double-apply a quantity change. Callers
//! needing exactly-once semantics must deduplicate at a higher level.

use crate::{
    config::{DeletePolicy, RetryConfig},
    metrics::Metrics,
    store::{StockStore, StockWriteSet},
    types::{
        derived_stall_item_id, MovementReceipt, MovementType, OperationReceipt, SaleTransaction,
        StockItem,
    },
    Error, Result,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

/// The set of atomic stock-mutation operations
pub struct TransactionEngine<S: StockStore> {
    store: Arc<S>,
    retry: RetryConfig,
    delete_policy: DeletePolicy,
    metrics: Metrics,
}

impl<S: StockStore> std::fmt::Debug for TransactionEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("retry", &self.retry)
            .field("delete_policy", &self.delete_policy)
            .finish()
    }
}

impl<S: StockStore> TransactionEngine<S> {
    /// Create an engine over an explicit store client
    pub fn new(
        store: Arc<S>,
        retry: RetryConfig,
        delete_policy: DeletePolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            retry,
            delete_policy,
            metrics,
        }
    }

    /// Set a record's quantity directly
    ///
    /// Fails with `NotFound` if the record no longer exists and
    /// `InvalidArgument` if `new_quantity < 0`.
    pub async fn update_direct(
        &self,
        item_id: &str,
        new_quantity: i64,
    ) -> Result<OperationReceipt> {
        self.set_quantity(item_id, new_quantity, MovementType::DirectMasterUpdate)
            .await
    }

    /// Quantity set with a caller-chosen movement kind (batch actions use
    /// `BATCH_STALL_UPDATE_SET`)
    pub(crate) async fn set_quantity(
        &self,
        item_id: &str,
        new_quantity: i64,
        movement_type: MovementType,
    ) -> Result<OperationReceipt> {
        if new_quantity < 0 {
            return Err(Error::InvalidArgument(format!(
                "Quantity must be non-negative, got {}",
                new_quantity
            )));
        }

        self.run_txn("set_quantity", || {
            let snapshot = self.store.snapshot(&[item_id])?;
            let item = snapshot
                .item(item_id)
                .ok_or_else(|| Error::NotFound(item_id.to_string()))?;

            let before = item.quantity;
            let mut updated = item.clone();
            updated.quantity = new_quantity;
            updated.last_updated = Utc::now();

            let receipt = OperationReceipt {
                related_transaction_id: Uuid::now_v7().to_string(),
                movements: vec![MovementReceipt {
                    item_id: updated.id.clone(),
                    site_id: updated.site_id.clone(),
                    stall_id: updated.stall_id.clone(),
                    movement_type,
                    quantity_before: before,
                    quantity_after: new_quantity,
                    linked_item_id: None,
                    master_item_id_for_context: None,
                }],
            };

            let mut writes = StockWriteSet::default();
            writes.put(updated);
            self.store.commit(&snapshot, writes)?;
            Ok(receipt)
        })
        .await
    }

    /// Move quantity from a master record to a stall record, creating the
    /// stall record lazily on first allocation
    pub async fn allocate(
        &self,
        master_id: &str,
        destination_stall_id: &str,
        quantity: i64,
    ) -> Result<OperationReceipt> {
        ensure_positive(quantity)?;
        let stall_item_id = derived_stall_item_id(master_id, destination_stall_id);

        self.run_txn("allocate", || {
            let snapshot = self.store.snapshot(&[master_id, &stall_item_id])?;
            let master = snapshot
                .item(master_id)
                .ok_or_else(|| Error::NotFound(master_id.to_string()))?;
            if !master.is_master() {
                return Err(Error::InvalidArgument(format!(
                    "{} is a stall record, allocation source must be a master record",
                    master_id
                )));
            }
            ensure_available(master, quantity)?;

            let mut stall_item = match snapshot.item(&stall_item_id) {
                Some(existing) => existing.clone(),
                None => spawn_stall_record(
                    master,
                    &stall_item_id,
                    destination_stall_id,
                    Some(master_id),
                ),
            };

            let master_before = master.quantity;
            let stall_before = stall_item.quantity;

            let now = Utc::now();
            let mut master = master.clone();
            master.quantity -= quantity;
            master.last_updated = now;
            stall_item.quantity += quantity;
            stall_item.last_updated = now;

            let receipt = OperationReceipt {
                related_transaction_id: Uuid::now_v7().to_string(),
                movements: vec![
                    MovementReceipt {
                        item_id: master.id.clone(),
                        site_id: master.site_id.clone(),
                        stall_id: None,
                        movement_type: MovementType::AllocateToStall,
                        quantity_before: master_before,
                        quantity_after: master.quantity,
                        linked_item_id: Some(stall_item.id.clone()),
                        master_item_id_for_context: None,
                    },
                    MovementReceipt {
                        item_id: stall_item.id.clone(),
                        site_id: stall_item.site_id.clone(),
                        stall_id: stall_item.stall_id.clone(),
                        movement_type: MovementType::ReceiveAllocation,
                        quantity_before: stall_before,
                        quantity_after: stall_item.quantity,
                        linked_item_id: Some(master.id.clone()),
                        master_item_id_for_context: Some(master.id.clone()),
                    },
                ],
            };

            let mut writes = StockWriteSet::default();
            writes.put(master);
            writes.put(stall_item);
            self.store.commit(&snapshot, writes)?;
            Ok(receipt)
        })
        .await
    }

    /// Move quantity from a stall record back to its linked master
    pub async fn return_to_master(
        &self,
        stall_item_id: &str,
        quantity: i64,
    ) -> Result<OperationReceipt> {
        ensure_positive(quantity)?;

        self.run_txn("return_to_master", || {
            // Point read to discover the linked master key; the snapshot
            // below re-reads both records with version guards.
            let probe = self
                .store
                .get_stock_item(stall_item_id)?
                .ok_or_else(|| Error::NotFound(stall_item_id.to_string()))?;
            ensure_stall_record(&probe)?;
            let master_id = probe
                .original_master_item_id
                .clone()
                .ok_or_else(|| Error::NotLinked(stall_item_id.to_string()))?;

            let snapshot = self.store.snapshot(&[stall_item_id, &master_id])?;
            let stall = snapshot
                .item(stall_item_id)
                .ok_or_else(|| Error::NotFound(stall_item_id.to_string()))?;
            let master = snapshot
                .item(&master_id)
                .ok_or_else(|| Error::NotFound(master_id.clone()))?;
            ensure_available(stall, quantity)?;

            let stall_before = stall.quantity;
            let master_before = master.quantity;

            let now = Utc::now();
            let mut stall = stall.clone();
            let mut master = master.clone();
            stall.quantity -= quantity;
            stall.last_updated = now;
            master.quantity += quantity;
            master.last_updated = now;

            let receipt = OperationReceipt {
                related_transaction_id: Uuid::now_v7().to_string(),
                movements: vec![
                    MovementReceipt {
                        item_id: stall.id.clone(),
                        site_id: stall.site_id.clone(),
                        stall_id: stall.stall_id.clone(),
                        movement_type: MovementType::ReturnToMaster,
                        quantity_before: stall_before,
                        quantity_after: stall.quantity,
                        linked_item_id: Some(master.id.clone()),
                        master_item_id_for_context: Some(master.id.clone()),
                    },
                    MovementReceipt {
                        item_id: master.id.clone(),
                        site_id: master.site_id.clone(),
                        stall_id: None,
                        movement_type: MovementType::ReceiveReturnFromStall,
                        quantity_before: master_before,
                        quantity_after: master.quantity,
                        linked_item_id: Some(stall.id.clone()),
                        master_item_id_for_context: None,
                    },
                ],
            };

            let mut writes = StockWriteSet::default();
            writes.put(stall);
            writes.put(master);
            self.store.commit(&snapshot, writes)?;
            Ok(receipt)
        })
        .await
    }

    /// Move quantity between two stall records, creating the destination
    /// lazily. Physical relocation: the master record is never touched.
    pub async fn transfer_between_stalls(
        &self,
        source_item_id: &str,
        destination_stall_id: &str,
        quantity: i64,
    ) -> Result<OperationReceipt> {
        ensure_positive(quantity)?;

        self.run_txn("transfer_between_stalls", || {
            let probe = self
                .store
                .get_stock_item(source_item_id)?
                .ok_or_else(|| Error::NotFound(source_item_id.to_string()))?;
            ensure_stall_record(&probe)?;
            if probe.stall_id.as_deref() == Some(destination_stall_id) {
                return Err(Error::InvalidArgument(
                    "Source and destination stalls are identical".to_string(),
                ));
            }

            let destination_id = self.resolve_transfer_destination(&probe, destination_stall_id)?;

            let snapshot = self.store.snapshot(&[source_item_id, &destination_id])?;
            let source = snapshot
                .item(source_item_id)
                .ok_or_else(|| Error::NotFound(source_item_id.to_string()))?;
            ensure_available(source, quantity)?;

            let mut destination = match snapshot.item(&destination_id) {
                Some(existing) => existing.clone(),
                None => spawn_stall_record(
                    source,
                    &destination_id,
                    destination_stall_id,
                    source.original_master_item_id.as_deref(),
                ),
            };

            let source_before = source.quantity;
            let destination_before = destination.quantity;

            let now = Utc::now();
            let mut source = source.clone();
            source.quantity -= quantity;
            source.last_updated = now;
            destination.quantity += quantity;
            destination.last_updated = now;

            let master_ctx = source.original_master_item_id.clone();
            let receipt = OperationReceipt {
                related_transaction_id: Uuid::now_v7().to_string(),
                movements: vec![
                    MovementReceipt {
                        item_id: source.id.clone(),
                        site_id: source.site_id.clone(),
                        stall_id: source.stall_id.clone(),
                        movement_type: MovementType::TransferOutFromStall,
                        quantity_before: source_before,
                        quantity_after: source.quantity,
                        linked_item_id: Some(destination.id.clone()),
                        master_item_id_for_context: master_ctx.clone(),
                    },
                    MovementReceipt {
                        item_id: destination.id.clone(),
                        site_id: destination.site_id.clone(),
                        stall_id: destination.stall_id.clone(),
                        movement_type: MovementType::TransferInToStall,
                        quantity_before: destination_before,
                        quantity_after: destination.quantity,
                        linked_item_id: Some(source.id.clone()),
                        master_item_id_for_context: master_ctx,
                    },
                ],
            };

            let mut writes = StockWriteSet::default();
            writes.put(source);
            writes.put(destination);
            self.store.commit(&snapshot, writes)?;
            Ok(receipt)
        })
        .await
    }

    /// Deduct sold quantity from a stall record; when the record is linked,
    /// the master is decremented by the same quantity in the same transaction
    pub async fn deduct_for_sale(
        &self,
        stall_item_id: &str,
        quantity: i64,
        related_transaction_id: &str,
    ) -> Result<OperationReceipt> {
        self.deduct_inner(stall_item_id, quantity, related_transaction_id, None)
            .await
    }

    /// Sale-recorder variant: the deduction and the sale document commit in
    /// one atomic unit
    pub(crate) async fn deduct_with_sale_record(
        &self,
        stall_item_id: &str,
        quantity: i64,
        sale: &SaleTransaction,
    ) -> Result<OperationReceipt> {
        self.deduct_inner(stall_item_id, quantity, &sale.id, Some(sale))
            .await
    }

    async fn deduct_inner(
        &self,
        stall_item_id: &str,
        quantity: i64,
        related_transaction_id: &str,
        sale: Option<&SaleTransaction>,
    ) -> Result<OperationReceipt> {
        ensure_positive(quantity)?;

        self.run_txn("deduct_for_sale", || {
            let probe = self
                .store
                .get_stock_item(stall_item_id)?
                .ok_or_else(|| Error::NotFound(stall_item_id.to_string()))?;
            ensure_stall_record(&probe)?;

            let master_id = probe.original_master_item_id.clone();
            let mut keys = vec![stall_item_id];
            if let Some(master_id) = &master_id {
                keys.push(master_id.as_str());
            }

            let snapshot = self.store.snapshot(&keys)?;
            let stall = snapshot
                .item(stall_item_id)
                .ok_or_else(|| Error::NotFound(stall_item_id.to_string()))?;
            ensure_available(stall, quantity)?;

            let now = Utc::now();
            let stall_before = stall.quantity;
            let mut stall = stall.clone();
            stall.quantity -= quantity;
            stall.last_updated = now;

            let mut movements = vec![MovementReceipt {
                item_id: stall.id.clone(),
                site_id: stall.site_id.clone(),
                stall_id: stall.stall_id.clone(),
                movement_type: MovementType::SaleFromStall,
                quantity_before: stall_before,
                quantity_after: stall.quantity,
                linked_item_id: master_id.clone(),
                master_item_id_for_context: master_id.clone(),
            }];

            let mut writes = StockWriteSet::default();

            if let Some(master_id) = &master_id {
                let master = snapshot
                    .item(master_id)
                    .ok_or_else(|| Error::NotFound(master_id.clone()))?;
                ensure_available(master, quantity)?;

                let master_before = master.quantity;
                let mut master = master.clone();
                master.quantity -= quantity;
                master.last_updated = now;

                movements.push(MovementReceipt {
                    item_id: master.id.clone(),
                    site_id: master.site_id.clone(),
                    stall_id: None,
                    movement_type: MovementType::SaleAffectsMaster,
                    quantity_before: master_before,
                    quantity_after: master.quantity,
                    linked_item_id: Some(stall.id.clone()),
                    master_item_id_for_context: None,
                });
                writes.put(master);
            }

            writes.put(stall);

            let receipt = OperationReceipt {
                related_transaction_id: related_transaction_id.to_string(),
                movements,
            };

            match sale {
                Some(sale) => self.store.commit_with_sale(&snapshot, writes, sale)?,
                None => self.store.commit(&snapshot, writes)?,
            }
            Ok(receipt)
        })
        .await
    }

    /// Delete a stall record, reconciling remaining quantity per the
    /// configured [`DeletePolicy`]
    pub async fn delete_stall_item(&self, stall_item_id: &str) -> Result<OperationReceipt> {
        self.run_txn("delete_stall_item", || {
            let probe = self
                .store
                .get_stock_item(stall_item_id)?
                .ok_or_else(|| Error::NotFound(stall_item_id.to_string()))?;
            ensure_stall_record(&probe)?;

            let master_id = probe.original_master_item_id.clone();
            let mut keys = vec![stall_item_id];
            if let Some(master_id) = &master_id {
                keys.push(master_id.as_str());
            }

            let snapshot = self.store.snapshot(&keys)?;
            let stall = snapshot
                .item(stall_item_id)
                .ok_or_else(|| Error::NotFound(stall_item_id.to_string()))?;
            let remaining = stall.quantity;

            if remaining > 0 && self.delete_policy == DeletePolicy::RequireEmpty {
                return Err(Error::InvalidState(format!(
                    "Cannot delete {}: quantity {} must be zeroed out first",
                    stall_item_id, remaining
                )));
            }

            let now = Utc::now();
            let mut movements = Vec::new();
            let mut writes = StockWriteSet::default();

            if remaining > 0 {
                if let Some(master_id) = &master_id {
                    let master = snapshot
                        .item(master_id)
                        .ok_or_else(|| Error::NotFound(master_id.clone()))?;
                    let master_before = master.quantity;
                    let mut master = master.clone();
                    master.quantity += remaining;
                    master.last_updated = now;

                    movements.push(MovementReceipt {
                        item_id: master.id.clone(),
                        site_id: master.site_id.clone(),
                        stall_id: None,
                        movement_type: MovementType::ReceiveReturnFromStall,
                        quantity_before: master_before,
                        quantity_after: master.quantity,
                        linked_item_id: Some(stall.id.clone()),
                        master_item_id_for_context: None,
                    });
                    writes.put(master);
                }
                // Unlinked remainder has no master to receive it; the delete
                // leg below records the write-off.
            }

            movements.push(MovementReceipt {
                item_id: stall.id.clone(),
                site_id: stall.site_id.clone(),
                stall_id: stall.stall_id.clone(),
                movement_type: MovementType::BatchStallDelete,
                quantity_before: remaining,
                quantity_after: 0,
                linked_item_id: master_id.clone(),
                master_item_id_for_context: master_id.clone(),
            });
            writes.delete(stall_item_id);

            let receipt = OperationReceipt {
                related_transaction_id: Uuid::now_v7().to_string(),
                movements,
            };
            self.store.commit(&snapshot, writes)?;
            Ok(receipt)
        })
        .await
    }

    /// Destination record id for a transfer: linked records descend from
    /// their master, standalone records match by name within the destination
    /// stall, else a fresh record derived from the source is created.
    fn resolve_transfer_destination(
        &self,
        source: &StockItem,
        destination_stall_id: &str,
    ) -> Result<String> {
        if let Some(master_id) = &source.original_master_item_id {
            return Ok(derived_stall_item_id(master_id, destination_stall_id));
        }

        let siblings = self
            .store
            .list_stall_items(&source.site_id, destination_stall_id)?;
        if let Some(existing) = siblings.iter().find(|i| i.name == source.name) {
            return Ok(existing.id.clone());
        }

        Ok(derived_stall_item_id(&source.id, destination_stall_id))
    }

    /// Bounded retry around one transaction attempt
    async fn run_txn(
        &self,
        op: &'static str,
        attempt_txn: impl Fn() -> Result<OperationReceipt>,
    ) -> Result<OperationReceipt> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = attempt_txn();
            self.metrics
                .record_commit_duration(started.elapsed().as_secs_f64());

            match result {
                Ok(receipt) => {
                    self.metrics.record_operation(receipt.movements.len());
                    tracing::debug!(
                        op,
                        related_transaction_id = %receipt.related_transaction_id,
                        legs = receipt.movements.len(),
                        "Transaction committed"
                    );
                    return Ok(receipt);
                }
                Err(e) => {
                    if matches!(e, Error::Conflict(_)) {
                        self.metrics.record_conflict_retry();
                    }
                    if matches!(e, Error::InsufficientStock { .. }) {
                        self.metrics.record_insufficient_stock();
                    }
                    if e.is_retryable() && attempt < self.retry.max_attempts {
                        tracing::debug!(op, attempt, error = %e, "Retrying transaction");
                        sleep(Duration::from_millis(self.retry.backoff_ms * attempt as u64))
                            .await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn ensure_positive(quantity: i64) -> Result<()> {
    if quantity <= 0 {
        return Err(Error::InvalidArgument(format!(
            "Quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}

fn ensure_available(item: &StockItem, requested: i64) -> Result<()> {
    if item.quantity < requested {
        return Err(Error::InsufficientStock {
            item_id: item.id.clone(),
            requested,
            available: item.quantity,
        });
    }
    Ok(())
}

fn ensure_stall_record(item: &StockItem) -> Result<()> {
    if item.is_master() {
        return Err(Error::InvalidArgument(format!(
            "{} is a master record, operation requires a stall record",
            item.id
        )));
    }
    Ok(())
}

/// New stall record inheriting descriptive fields from `template`
fn spawn_stall_record(
    template: &StockItem,
    id: &str,
    stall_id: &str,
    original_master_item_id: Option<&str>,
) -> StockItem {
    StockItem {
        id: id.to_string(),
        site_id: template.site_id.clone(),
        stall_id: Some(stall_id.to_string()),
        original_master_item_id: original_master_item_id.map(String::from),
        quantity: 0,
        low_stock_threshold: template.low_stock_threshold,
        unit: template.unit.clone(),
        name: template.name.clone(),
        category: template.category.clone(),
        price: template.price,
        cost_price: template.cost_price,
        last_updated: Utc::now(),
    }
}
