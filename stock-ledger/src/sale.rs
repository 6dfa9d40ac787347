//! Sale recorder
//!
//! Records a completed sale and deducts the sold quantities. The sale
//! document commits atomically with the first line's deduction, so a
//! recorded sale always implies at least one applied deduction. Later lines
//! deduct in their own transactions; their failures are reported per line
//! and do not unwind the sale.

use crate::{
    ledger::{LedgerOutcome, StockLedger},
    store::StockStore,
    types::{Actor, SaleLineItem, SaleTransaction},
    Error, Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

/// One requested sale line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleLineRequest {
    /// Stall stock record being sold from
    pub item_id: String,

    /// Units sold
    pub quantity: i64,
}

/// Per-line deduction result
#[derive(Debug)]
pub struct SaleLineOutcome {
    /// Record the line deducted from
    pub item_id: String,

    /// Committed deduction, or the error that rejected this line
    pub outcome: std::result::Result<LedgerOutcome, Error>,
}

/// Result of recording a sale
#[derive(Debug)]
pub struct SaleOutcome {
    /// The persisted sale document
    pub sale: SaleTransaction,

    /// One result per line, in sale order
    pub lines: Vec<SaleLineOutcome>,
}

impl SaleOutcome {
    /// Whether every line's deduction committed
    pub fn fully_applied(&self) -> bool {
        self.lines.iter().all(|l| l.outcome.is_ok())
    }
}

impl<S: StockStore> StockLedger<S> {
    /// Record a sale rung up at `stall_id` and deduct the sold quantities.
    ///
    /// All lines must reference existing stall records scoped to `stall_id`;
    /// the whole sale is rejected before any mutation otherwise. A first-line
    /// deduction failure also rejects the sale. Failures on later lines are
    /// reported in the outcome while the sale stands.
    pub async fn record_sale(
        &self,
        site_id: &str,
        stall_id: &str,
        lines: &[SaleLineRequest],
        staff: &Actor,
    ) -> Result<SaleOutcome> {
        if lines.is_empty() {
            return Err(Error::InvalidArgument("Sale has no lines".to_string()));
        }

        // Snapshot names and prices up front; the sale document is fixed
        // before the first deduction commits it.
        let mut sale_items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity <= 0 {
                return Err(Error::InvalidArgument(format!(
                    "Sale quantity must be positive, got {} for {}",
                    line.quantity, line.item_id
                )));
            }
            let item = self
                .get_stock_item(&line.item_id)?
                .ok_or_else(|| Error::NotFound(line.item_id.clone()))?;
            if item.site_id != site_id || item.stall_id.as_deref() != Some(stall_id) {
                return Err(Error::InvalidArgument(format!(
                    "{} is not a stall record of {}/{}",
                    line.item_id, site_id, stall_id
                )));
            }
            let total_price = item.price * Decimal::from(line.quantity);
            sale_items.push(SaleLineItem {
                item_id: line.item_id.clone(),
                name: item.name,
                quantity: line.quantity,
                price_per_unit: item.price,
                total_price,
            });
        }

        let sale = SaleTransaction {
            id: Uuid::now_v7().to_string(),
            total_amount: sale_items.iter().map(|i| i.total_price).sum(),
            items: sale_items,
            staff_id: staff.uid.clone(),
            site_id: site_id.to_string(),
            stall_id: stall_id.to_string(),
            transaction_date: Utc::now(),
            is_deleted: false,
        };

        let notes = format!("Sale {}", sale.id);
        let mut outcomes = Vec::with_capacity(lines.len());

        // First line commits atomically with the sale document
        let first = &lines[0];
        let receipt = self
            .engine()
            .deduct_with_sale_record(&first.item_id, first.quantity, &sale)
            .await?;
        outcomes.push(SaleLineOutcome {
            item_id: first.item_id.clone(),
            outcome: Ok(self.audit_receipt(receipt, staff, Some(&notes))),
        });

        for line in &lines[1..] {
            let outcome = match self
                .engine()
                .deduct_for_sale(&line.item_id, line.quantity, &sale.id)
                .await
            {
                Ok(receipt) => Ok(self.audit_receipt(receipt, staff, Some(&notes))),
                Err(e) => {
                    tracing::warn!(
                        sale_id = %sale.id,
                        item_id = %line.item_id,
                        error = %e,
                        "Sale line deduction failed, sale stands"
                    );
                    Err(e)
                }
            };
            outcomes.push(SaleLineOutcome {
                item_id: line.item_id.clone(),
                outcome,
            });
        }

        tracing::info!(
            sale_id = %sale.id,
            total = %sale.total_amount,
            lines = outcomes.len(),
            failed = outcomes.iter().filter(|l| l.outcome.is_err()).count(),
            "Sale recorded"
        );
        Ok(SaleOutcome {
            sale,
            lines: outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{derived_stall_item_id, MovementType, StockItem};
    use crate::Storage;
    use tempfile::TempDir;

    async fn ledger_with_stalls() -> (StockLedger<Storage>, String, String, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = StockLedger::open(&config).unwrap();

        seed_master(&ledger, "m-1", "Rice", 100);
        seed_master(&ledger, "m-2", "Flour", 50);
        ledger
            .allocate("m-1", "stall-a", 20, &actor(), None)
            .await
            .unwrap();
        ledger
            .allocate("m-2", "stall-a", 10, &actor(), None)
            .await
            .unwrap();

        let rice = derived_stall_item_id("m-1", "stall-a");
        let flour = derived_stall_item_id("m-2", "stall-a");
        (ledger, rice, flour, temp_dir)
    }

    fn seed_master(ledger: &StockLedger<Storage>, id: &str, name: &str, quantity: i64) {
        use crate::store::StockWriteSet;

        let store = ledger.store_for_tests();
        let snapshot = store.snapshot(&[id]).unwrap();
        let mut writes = StockWriteSet::default();
        writes.put(StockItem {
            id: id.to_string(),
            site_id: "site-1".to_string(),
            stall_id: None,
            original_master_item_id: None,
            quantity,
            low_stock_threshold: 5,
            unit: "kg".to_string(),
            name: name.to_string(),
            category: "Grains".to_string(),
            price: Decimal::new(2500, 2),
            cost_price: Decimal::new(1800, 2),
            last_updated: Utc::now(),
        });
        store.commit(&snapshot, writes).unwrap();
    }

    fn actor() -> Actor {
        Actor::new("u-1", "Asha", "asha@example.com")
    }

    #[tokio::test]
    async fn test_sale_deducts_stall_and_master() {
        let (ledger, rice, _flour, _temp) = ledger_with_stalls().await;

        let outcome = ledger
            .record_sale(
                "site-1",
                "stall-a",
                &[SaleLineRequest {
                    item_id: rice.clone(),
                    quantity: 5,
                }],
                &actor(),
            )
            .await
            .unwrap();

        assert!(outcome.fully_applied());
        assert_eq!(outcome.sale.items.len(), 1);
        assert_eq!(outcome.sale.items[0].name, "Rice");
        assert_eq!(outcome.sale.total_amount, Decimal::new(12500, 2));

        assert_eq!(ledger.get_stock_item(&rice).unwrap().unwrap().quantity, 15);
        assert_eq!(ledger.get_stock_item("m-1").unwrap().unwrap().quantity, 75);

        // Sale document persisted and linked from the movement logs
        let stored = ledger.get_sale(&outcome.sale.id).unwrap().unwrap();
        assert_eq!(stored.total_amount, outcome.sale.total_amount);
        let logs = ledger.movement_logs_for_item(&rice).unwrap();
        let sale_log = logs
            .iter()
            .find(|l| l.movement_type == MovementType::SaleFromStall)
            .unwrap();
        assert_eq!(sale_log.related_transaction_id, outcome.sale.id);
        let master_logs = ledger.movement_logs_for_item("m-1").unwrap();
        assert!(master_logs
            .iter()
            .any(|l| l.movement_type == MovementType::SaleAffectsMaster));
    }

    #[tokio::test]
    async fn test_first_line_failure_records_no_sale() {
        let (ledger, rice, _flour, _temp) = ledger_with_stalls().await;

        let err = ledger
            .record_sale(
                "site-1",
                "stall-a",
                &[SaleLineRequest {
                    item_id: rice.clone(),
                    quantity: 200,
                }],
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientStock { .. }));

        assert_eq!(ledger.get_stock_item(&rice).unwrap().unwrap().quantity, 20);
        assert!(ledger.movement_logs_for_item(&rice).unwrap().iter().all(
            |l| l.movement_type != MovementType::SaleFromStall
        ));
    }

    #[tokio::test]
    async fn test_later_line_failure_leaves_sale_standing() {
        let (ledger, rice, flour, _temp) = ledger_with_stalls().await;

        let outcome = ledger
            .record_sale(
                "site-1",
                "stall-a",
                &[
                    SaleLineRequest {
                        item_id: rice.clone(),
                        quantity: 5,
                    },
                    SaleLineRequest {
                        item_id: flour.clone(),
                        quantity: 99,
                    },
                ],
                &actor(),
            )
            .await
            .unwrap();

        assert!(!outcome.fully_applied());
        assert!(outcome.lines[0].outcome.is_ok());
        assert!(matches!(
            outcome.lines[1].outcome,
            Err(Error::InsufficientStock { .. })
        ));

        // First line applied, second untouched, sale document persisted
        assert_eq!(ledger.get_stock_item(&rice).unwrap().unwrap().quantity, 15);
        assert_eq!(ledger.get_stock_item(&flour).unwrap().unwrap().quantity, 10);
        assert!(ledger.get_sale(&outcome.sale.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sale_rejects_foreign_stall_line() {
        let (ledger, rice, _flour, _temp) = ledger_with_stalls().await;

        let err = ledger
            .record_sale(
                "site-1",
                "stall-b",
                &[SaleLineRequest {
                    item_id: rice,
                    quantity: 1,
                }],
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
