//! Core types for the stock ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Namespace for deterministic stall-record ids.
///
/// A stall record allocated from master `m` at stall `s` always gets the id
/// `uuid_v5(NS, "m/s")`, so two concurrent lazy creations target the same key
/// and the store's conflict detection serializes them.
const STALL_ITEM_NAMESPACE: Uuid = Uuid::from_u128(0x8f7a_6c50_2f0b_4b3e_9c39_5a1d_2e8b_4f10);

/// Deterministic id for the stall record descended from `lineage_id` at `stall_id`.
///
/// `lineage_id` is the master record id for linked records, or the source
/// record id when a standalone item is transferred to a new stall.
pub fn derived_stall_item_id(lineage_id: &str, stall_id: &str) -> String {
    Uuid::new_v5(
        &STALL_ITEM_NAMESPACE,
        format!("{}/{}", lineage_id, stall_id).as_bytes(),
    )
    .to_string()
}

/// A quantity-bearing inventory record.
///
/// A *master* record is site-scoped (`stall_id == None`); a *stall* record is
/// location-scoped and optionally linked back to the master it was allocated
/// from via `original_master_item_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    /// Opaque record id (store-assigned, or derived for stall records)
    pub id: String,

    /// Site this record belongs to
    pub site_id: String,

    /// Stall this record is scoped to; `None` marks a master record
    pub stall_id: Option<String>,

    /// Master record this stall record was allocated from, if any
    pub original_master_item_id: Option<String>,

    /// On-hand quantity; never persisted negative
    pub quantity: i64,

    /// Threshold at or below which the record counts as low stock
    pub low_stock_threshold: i64,

    /// Unit of measure ("kg", "pcs", ...)
    pub unit: String,

    /// Display name
    pub name: String,

    /// Category label
    pub category: String,

    /// Selling price per unit
    pub price: Decimal,

    /// Cost price per unit
    pub cost_price: Decimal,

    /// Set on every mutation
    pub last_updated: DateTime<Utc>,
}

impl StockItem {
    /// Whether this is a site-wide master record
    pub fn is_master(&self) -> bool {
        self.stall_id.is_none()
    }

    /// Whether this stall record is linked to a master record
    pub fn is_linked(&self) -> bool {
        self.original_master_item_id.is_some()
    }

    /// Whether the record is at or below its low-stock threshold
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.low_stock_threshold
    }
}

/// Movement kind, one per quantity-change leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Direct quantity set on a master record
    DirectMasterUpdate,
    /// Master decrement for an allocation
    AllocateToStall,
    /// Stall increment for an allocation
    ReceiveAllocation,
    /// Stall decrement for a return
    ReturnToMaster,
    /// Master increment for a return
    ReceiveReturnFromStall,
    /// Source-stall decrement for a transfer
    TransferOutFromStall,
    /// Destination-stall increment for a transfer
    TransferInToStall,
    /// Stall decrement for a sale
    SaleFromStall,
    /// Linked-master decrement mirroring a stall sale
    SaleAffectsMaster,
    /// Quantity set applied through a batch action
    BatchStallUpdateSet,
    /// Stall record removal (single or batch)
    BatchStallDelete,
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MovementType::DirectMasterUpdate => "DIRECT_MASTER_UPDATE",
            MovementType::AllocateToStall => "ALLOCATE_TO_STALL",
            MovementType::ReceiveAllocation => "RECEIVE_ALLOCATION",
            MovementType::ReturnToMaster => "RETURN_TO_MASTER",
            MovementType::ReceiveReturnFromStall => "RECEIVE_RETURN_FROM_STALL",
            MovementType::TransferOutFromStall => "TRANSFER_OUT_FROM_STALL",
            MovementType::TransferInToStall => "TRANSFER_IN_TO_STALL",
            MovementType::SaleFromStall => "SALE_FROM_STALL",
            MovementType::SaleAffectsMaster => "SALE_AFFECTS_MASTER",
            MovementType::BatchStallUpdateSet => "BATCH_STALL_UPDATE_SET",
            MovementType::BatchStallDelete => "BATCH_STALL_DELETE",
        };
        write!(f, "{}", s)
    }
}

/// Append-only audit fact, one per quantity change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovementLog {
    /// Log entry id (UUIDv7 for time-ordering)
    pub id: String,

    /// The record whose quantity changed
    pub stock_item_id: String,

    /// Movement kind
    pub movement_type: MovementType,

    /// Quantity before the change
    pub quantity_before: i64,

    /// Quantity after the change
    pub quantity_after: i64,

    /// Signed delta; must equal `quantity_after - quantity_before`
    pub quantity_change: i64,

    /// Actor id
    pub user_id: String,

    /// Actor display name
    pub user_name: String,

    /// Server-observed append time
    pub timestamp: DateTime<Utc>,

    /// Site the record belongs to
    pub site_id: String,

    /// Stall the record is scoped to, if any
    pub stall_id: Option<String>,

    /// Free text
    pub notes: String,

    /// Shared by all entries produced from one logical operation
    pub related_transaction_id: String,

    /// Paired record in a two-record operation
    pub linked_stock_item_id: Option<String>,

    /// Master record providing context for stall-side legs
    pub master_stock_item_id_for_context: Option<String>,
}

impl StockMovementLog {
    /// Whether the before/after/delta arithmetic is consistent
    pub fn arithmetic_holds(&self) -> bool {
        self.quantity_after - self.quantity_before == self.quantity_change
    }
}

/// One sold line within a sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLineItem {
    /// Stall stock record sold from
    pub item_id: String,

    /// Name snapshot at time of sale
    pub name: String,

    /// Units sold
    pub quantity: i64,

    /// Unit price snapshot
    pub price_per_unit: Decimal,

    /// Line total
    pub total_price: Decimal,
}

/// Immutable record of a completed sale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleTransaction {
    /// Sale id (UUIDv7)
    pub id: String,

    /// Ordered line items
    pub items: Vec<SaleLineItem>,

    /// Sum of line totals
    pub total_amount: Decimal,

    /// Staff member who rang up the sale
    pub staff_id: String,

    /// Site the sale happened at
    pub site_id: String,

    /// Stall the sale happened at
    pub stall_id: String,

    /// Completion time
    pub transaction_date: DateTime<Utc>,

    /// Soft-delete flag; deletion is a separate compensating flow
    pub is_deleted: bool,
}

/// Authenticated actor identity supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user id
    pub uid: String,

    /// Display name recorded on movement logs
    pub display_name: String,

    /// Email, carried for operator tooling
    pub email: String,
}

impl Actor {
    /// Create a new actor identity
    pub fn new(
        uid: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            email: email.into(),
        }
    }
}

/// One record's quantity change within a committed operation
#[derive(Debug, Clone)]
pub struct MovementReceipt {
    /// Record that changed
    pub item_id: String,

    /// Site of the record
    pub site_id: String,

    /// Stall of the record, if any
    pub stall_id: Option<String>,

    /// Movement kind of this leg
    pub movement_type: MovementType,

    /// Quantity before the commit
    pub quantity_before: i64,

    /// Quantity after the commit
    pub quantity_after: i64,

    /// Paired record in a two-record operation
    pub linked_item_id: Option<String>,

    /// Master record providing context, when relevant
    pub master_item_id_for_context: Option<String>,
}

impl MovementReceipt {
    /// Signed delta of this leg
    pub fn quantity_change(&self) -> i64 {
        self.quantity_after - self.quantity_before
    }
}

/// Result of one committed engine operation, sufficient to build matching logs
#[derive(Debug, Clone)]
pub struct OperationReceipt {
    /// Shared id linking all legs of this logical operation
    pub related_transaction_id: String,

    /// One receipt per touched record
    pub movements: Vec<MovementReceipt>,
}

impl OperationReceipt {
    /// Receipt for `item_id`, if that record was touched
    pub fn movement_for(&self, item_id: &str) -> Option<&MovementReceipt> {
        self.movements.iter().find(|m| m.item_id == item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_item() -> StockItem {
        StockItem {
            id: "m-1".to_string(),
            site_id: "site-1".to_string(),
            stall_id: None,
            original_master_item_id: None,
            quantity: 100,
            low_stock_threshold: 10,
            unit: "kg".to_string(),
            name: "Rice".to_string(),
            category: "Grains".to_string(),
            price: Decimal::new(2500, 2),
            cost_price: Decimal::new(1800, 2),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_master_and_link_flags() {
        let master = master_item();
        assert!(master.is_master());
        assert!(!master.is_linked());

        let mut stall = master;
        stall.stall_id = Some("stall-a".to_string());
        stall.original_master_item_id = Some("m-1".to_string());
        assert!(!stall.is_master());
        assert!(stall.is_linked());
    }

    #[test]
    fn test_low_stock_threshold_is_inclusive() {
        let mut item = master_item();
        item.quantity = 10;
        assert!(item.is_low_stock());
        item.quantity = 11;
        assert!(!item.is_low_stock());
    }

    #[test]
    fn test_derived_stall_item_id_is_deterministic() {
        let a = derived_stall_item_id("m-1", "stall-a");
        let b = derived_stall_item_id("m-1", "stall-a");
        assert_eq!(a, b);
        assert_ne!(a, derived_stall_item_id("m-1", "stall-b"));
        assert_ne!(a, derived_stall_item_id("m-2", "stall-a"));
    }

    #[test]
    fn test_movement_type_wire_names() {
        let json = serde_json::to_string(&MovementType::SaleAffectsMaster).unwrap();
        assert_eq!(json, "\"SALE_AFFECTS_MASTER\"");
        assert_eq!(
            MovementType::BatchStallUpdateSet.to_string(),
            "BATCH_STALL_UPDATE_SET"
        );
    }

    #[test]
    fn test_log_arithmetic() {
        let log = StockMovementLog {
            id: Uuid::now_v7().to_string(),
            stock_item_id: "m-1".to_string(),
            movement_type: MovementType::DirectMasterUpdate,
            quantity_before: 100,
            quantity_after: 70,
            quantity_change: -30,
            user_id: "u-1".to_string(),
            user_name: "Asha".to_string(),
            timestamp: Utc::now(),
            site_id: "site-1".to_string(),
            stall_id: None,
            notes: String::new(),
            related_transaction_id: Uuid::now_v7().to_string(),
            linked_stock_item_id: None,
            master_stock_item_id_for_context: None,
        };
        assert!(log.arithmetic_holds());

        let mut bad = log;
        bad.quantity_change = -20;
        assert!(!bad.arithmetic_holds());
    }
}
