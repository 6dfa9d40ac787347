//! Stock ledger facade
//!
//! [`StockLedger`] is the crate entry point: it owns the store client, the
//! transaction engine and the audit writer, and exposes one method per
//! ledger operation. Every mutation follows the same shape: commit the
//! quantity change atomically, then append the matching movement logs.
//!
//! A failed log append does not roll back the committed quantity change.
//! The outcome carries the audit error so callers can alert on it while the
//! inventory state stays authoritative.

use crate::{
    audit::AuditWriter,
    config::Config,
    engine::TransactionEngine,
    metrics::Metrics,
    store::StockStore,
    storage::Storage,
    types::{Actor, OperationReceipt, SaleTransaction, StockItem, StockMovementLog},
    Result,
};
use std::sync::Arc;

/// Result of one ledger operation: the committed quantity changes plus the
/// movement logs written for them
#[derive(Debug)]
pub struct LedgerOutcome {
    /// Committed quantity changes
    pub receipt: OperationReceipt,

    /// Movement logs appended for the receipt; empty when the append failed
    pub logs: Vec<StockMovementLog>,

    /// Set when the quantity change committed but the log append failed
    pub audit_error: Option<crate::Error>,
}

impl LedgerOutcome {
    /// Whether movement logs were written for every leg
    pub fn fully_audited(&self) -> bool {
        self.audit_error.is_none()
    }
}

/// The ledger service: transaction engine plus audit writer over one store
pub struct StockLedger<S: StockStore> {
    store: Arc<S>,
    engine: TransactionEngine<S>,
    audit: AuditWriter<S>,
    metrics: Metrics,
}

impl<S: StockStore> std::fmt::Debug for StockLedger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockLedger")
            .field("engine", &self.engine)
            .finish()
    }
}

impl StockLedger<Storage> {
    /// Open a ledger over a RocksDB store at `config.data_dir`
    pub fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(Storage::open(config)?);
        Self::with_store(store, config)
    }
}

impl<S: StockStore> StockLedger<S> {
    /// Build a ledger over an explicit store client
    pub fn with_store(store: Arc<S>, config: &Config) -> Result<Self> {
        let metrics = Metrics::new().map_err(|e| crate::Error::Config(e.to_string()))?;
        let engine = TransactionEngine::new(
            store.clone(),
            config.retry.clone(),
            config.delete_policy,
            metrics.clone(),
        );
        let audit = AuditWriter::new(store.clone());
        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Stock ledger initialized"
        );
        Ok(Self {
            store,
            engine,
            audit,
            metrics,
        })
    }

    pub(crate) fn engine(&self) -> &TransactionEngine<S> {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn store_for_tests(&self) -> &Arc<S> {
        &self.store
    }

    pub(crate) fn audit_receipt(
        &self,
        receipt: OperationReceipt,
        actor: &Actor,
        notes: Option<&str>,
    ) -> LedgerOutcome {
        match self.audit.append_for_receipt(&receipt, actor, notes) {
            Ok(logs) => LedgerOutcome {
                receipt,
                logs,
                audit_error: None,
            },
            Err(e) => {
                self.metrics.record_audit_failure();
                tracing::warn!(
                    related_transaction_id = %receipt.related_transaction_id,
                    error = %e,
                    "Movement committed but log append failed"
                );
                LedgerOutcome {
                    receipt,
                    logs: Vec::new(),
                    audit_error: Some(e),
                }
            }
        }
    }

    /// Set a record's quantity directly
    pub async fn update_direct(
        &self,
        item_id: &str,
        new_quantity: i64,
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<LedgerOutcome> {
        let receipt = self.engine.update_direct(item_id, new_quantity).await?;
        Ok(self.audit_receipt(receipt, actor, notes))
    }

    /// Move quantity from a master record to a stall record
    pub async fn allocate(
        &self,
        master_id: &str,
        destination_stall_id: &str,
        quantity: i64,
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<LedgerOutcome> {
        let receipt = self
            .engine
            .allocate(master_id, destination_stall_id, quantity)
            .await?;
        Ok(self.audit_receipt(receipt, actor, notes))
    }

    /// Move quantity from a stall record back to its linked master
    pub async fn return_to_master(
        &self,
        stall_item_id: &str,
        quantity: i64,
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<LedgerOutcome> {
        let receipt = self.engine.return_to_master(stall_item_id, quantity).await?;
        Ok(self.audit_receipt(receipt, actor, notes))
    }

    /// Move quantity between two stalls without touching the master
    pub async fn transfer_between_stalls(
        &self,
        source_item_id: &str,
        destination_stall_id: &str,
        quantity: i64,
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<LedgerOutcome> {
        let receipt = self
            .engine
            .transfer_between_stalls(source_item_id, destination_stall_id, quantity)
            .await?;
        Ok(self.audit_receipt(receipt, actor, notes))
    }

    /// Deduct sold quantity from a stall record (and its linked master)
    pub async fn deduct_for_sale(
        &self,
        stall_item_id: &str,
        quantity: i64,
        related_transaction_id: &str,
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<LedgerOutcome> {
        let receipt = self
            .engine
            .deduct_for_sale(stall_item_id, quantity, related_transaction_id)
            .await?;
        Ok(self.audit_receipt(receipt, actor, notes))
    }

    /// Delete a stall record, reconciling any remaining quantity
    pub async fn delete_stall_item(
        &self,
        stall_item_id: &str,
        actor: &Actor,
        notes: Option<&str>,
    ) -> Result<LedgerOutcome> {
        let receipt = self.engine.delete_stall_item(stall_item_id).await?;
        Ok(self.audit_receipt(receipt, actor, notes))
    }

    /// Fetch a stock record by id
    pub fn get_stock_item(&self, item_id: &str) -> Result<Option<StockItem>> {
        self.store.get_stock_item(item_id)
    }

    /// All records for a site, masters and stall records alike
    pub fn list_site_items(&self, site_id: &str) -> Result<Vec<StockItem>> {
        self.store.list_site_items(site_id)
    }

    /// All records scoped to one stall
    pub fn list_stall_items(&self, site_id: &str, stall_id: &str) -> Result<Vec<StockItem>> {
        self.store.list_stall_items(site_id, stall_id)
    }

    /// Site records at or below their low-stock threshold
    pub fn low_stock_items(&self, site_id: &str) -> Result<Vec<StockItem>> {
        let mut items = self.store.list_site_items(site_id)?;
        items.retain(StockItem::is_low_stock);
        Ok(items)
    }

    /// Movement history for one record, oldest first
    pub fn movement_logs_for_item(&self, item_id: &str) -> Result<Vec<StockMovementLog>> {
        self.store.movement_logs_for_item(item_id)
    }

    /// Fetch a recorded sale by id
    pub fn get_sale(&self, sale_id: &str) -> Result<Option<SaleTransaction>> {
        self.store.get_sale(sale_id)
    }

    /// Metrics registry for scrape endpoints
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StockWriteSet;
    use crate::types::MovementType;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_ledger() -> (StockLedger<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (StockLedger::open(&config).unwrap(), temp_dir)
    }

    fn actor() -> Actor {
        Actor::new("u-1", "Asha", "asha@example.com")
    }

    fn seed_master<S: StockStore>(ledger: &StockLedger<S>, id: &str, quantity: i64) {
        let snapshot = ledger.store.snapshot(&[id]).unwrap();
        let mut writes = StockWriteSet::default();
        writes.put(StockItem {
            id: id.to_string(),
            site_id: "site-1".to_string(),
            stall_id: None,
            original_master_item_id: None,
            quantity,
            low_stock_threshold: 10,
            unit: "kg".to_string(),
            name: "Rice".to_string(),
            category: "Grains".to_string(),
            price: Decimal::new(2500, 2),
            cost_price: Decimal::new(1800, 2),
            last_updated: Utc::now(),
        });
        ledger.store.commit(&snapshot, writes).unwrap();
    }

    #[tokio::test]
    async fn test_operation_writes_matching_logs() {
        let (ledger, _temp) = test_ledger();
        seed_master(&ledger, "m-1", 100);

        let outcome = ledger
            .allocate("m-1", "stall-a", 30, &actor(), None)
            .await
            .unwrap();
        assert!(outcome.fully_audited());
        assert_eq!(outcome.logs.len(), 2);

        // Both legs share the operation's transaction id and balance out
        let txn_id = &outcome.receipt.related_transaction_id;
        assert!(outcome.logs.iter().all(|l| &l.related_transaction_id == txn_id));
        let net: i64 = outcome.logs.iter().map(|l| l.quantity_change).sum();
        assert_eq!(net, 0);

        let history = ledger.movement_logs_for_item("m-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].movement_type, MovementType::AllocateToStall);
        assert_eq!(history[0].user_name, "Asha");
    }

    #[tokio::test]
    async fn test_caller_notes_flow_through() {
        let (ledger, _temp) = test_ledger();
        seed_master(&ledger, "m-1", 100);

        let outcome = ledger
            .update_direct("m-1", 80, &actor(), Some("monthly stocktake"))
            .await
            .unwrap();
        assert_eq!(outcome.logs[0].notes, "monthly stocktake");
        assert_eq!(outcome.logs[0].movement_type, MovementType::DirectMasterUpdate);
    }

    #[tokio::test]
    async fn test_low_stock_listing() {
        let (ledger, _temp) = test_ledger();
        seed_master(&ledger, "m-1", 100);
        seed_master(&ledger, "m-2", 5);

        let low = ledger.low_stock_items("site-1").unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, "m-2");
    }

    /// Store double whose log appends always fail
    struct AuditFailStore {
        inner: Storage,
    }

    impl StockStore for AuditFailStore {
        fn snapshot(&self, ids: &[&str]) -> crate::Result<crate::store::StockSnapshot> {
            self.inner.snapshot(ids)
        }

        fn commit(
            &self,
            snapshot: &crate::store::StockSnapshot,
            writes: StockWriteSet,
        ) -> crate::Result<()> {
            self.inner.commit(snapshot, writes)
        }

        fn commit_with_sale(
            &self,
            snapshot: &crate::store::StockSnapshot,
            writes: StockWriteSet,
            sale: &SaleTransaction,
        ) -> crate::Result<()> {
            self.inner.commit_with_sale(snapshot, writes, sale)
        }

        fn get_stock_item(&self, id: &str) -> crate::Result<Option<StockItem>> {
            self.inner.get_stock_item(id)
        }

        fn list_site_items(&self, site_id: &str) -> crate::Result<Vec<StockItem>> {
            self.inner.list_site_items(site_id)
        }

        fn list_stall_items(
            &self,
            site_id: &str,
            stall_id: &str,
        ) -> crate::Result<Vec<StockItem>> {
            self.inner.list_stall_items(site_id, stall_id)
        }

        fn append_movement_logs(&self, _entries: &[StockMovementLog]) -> crate::Result<()> {
            Err(crate::Error::Unavailable("log store down".to_string()))
        }

        fn movement_logs_for_item(
            &self,
            item_id: &str,
        ) -> crate::Result<Vec<StockMovementLog>> {
            self.inner.movement_logs_for_item(item_id)
        }

        fn get_sale(&self, sale_id: &str) -> crate::Result<Option<SaleTransaction>> {
            self.inner.get_sale(sale_id)
        }
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_undo_commit() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let store = Arc::new(AuditFailStore {
            inner: Storage::open(&config).unwrap(),
        });
        let ledger = StockLedger::with_store(store, &config).unwrap();
        seed_master(&ledger, "m-1", 100);

        let outcome = ledger
            .update_direct("m-1", 40, &actor(), None)
            .await
            .unwrap();
        assert!(!outcome.fully_audited());
        assert!(matches!(
            outcome.audit_error,
            Some(crate::Error::Unavailable(_))
        ));
        assert!(outcome.logs.is_empty());

        // The committed quantity change stands
        assert_eq!(ledger.get_stock_item("m-1").unwrap().unwrap().quantity, 40);
        assert_eq!(ledger.metrics().audit_failures_total.get(), 1);
    }

    #[tokio::test]
    async fn test_failed_operation_writes_no_logs() {
        let (ledger, _temp) = test_ledger();
        seed_master(&ledger, "m-1", 10);

        ledger
            .allocate("m-1", "stall-a", 50, &actor(), None)
            .await
            .unwrap_err();
        assert!(ledger.movement_logs_for_item("m-1").unwrap().is_empty());
    }
}
