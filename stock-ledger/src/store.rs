//! Document-store client seam
//!
//! The engine never talks to a database directly; it goes through the
//! [`StockStore`] trait, which models the store's atomic read-modify-write
//! primitive as an explicit two-phase snapshot/commit pair:
//!
//! 1. [`StockStore::snapshot`] reads a bounded set of stock-record keys and
//!    remembers the version each one was at (absent keys are recorded at
//!    version 0).
//! 2. [`StockStore::commit`] applies a write set conditionally: if any
//!    snapshotted key's version has moved since the read, nothing is written
//!    and the commit fails with [`Error::Conflict`](crate::Error::Conflict),
//!    and the caller retries the whole operation.
//!
//! Movement logs and sales are append-only and need no versioning.

use crate::types::{SaleTransaction, StockItem, StockMovementLog};
use crate::Result;
use std::collections::HashMap;

/// A versioned read of one stock-record key
#[derive(Debug, Clone)]
pub struct VersionedItem {
    /// Version observed at read time; 0 means the key was absent
    pub version: u64,

    /// The record, if present
    pub item: Option<StockItem>,
}

/// Versioned point-in-time read of a bounded key set
#[derive(Debug, Clone, Default)]
pub struct StockSnapshot {
    entries: HashMap<String, VersionedItem>,
}

impl StockSnapshot {
    /// Build a snapshot from versioned entries
    pub fn new(entries: HashMap<String, VersionedItem>) -> Self {
        Self { entries }
    }

    /// The record at `id`, if it existed at read time
    pub fn item(&self, id: &str) -> Option<&StockItem> {
        self.entries.get(id).and_then(|e| e.item.as_ref())
    }

    /// Version observed for `id`; 0 for absent keys, `None` for keys outside the snapshot
    pub fn version(&self, id: &str) -> Option<u64> {
        self.entries.get(id).map(|e| e.version)
    }

    /// Whether `id` is covered by this snapshot
    pub fn covers(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Iterate over the snapshotted keys and versions
    pub fn entries(&self) -> impl Iterator<Item = (&String, &VersionedItem)> {
        self.entries.iter()
    }
}

/// Writes staged by one engine operation
#[derive(Debug, Clone, Default)]
pub struct StockWriteSet {
    /// Records to create or overwrite
    pub puts: Vec<StockItem>,

    /// Record ids to delete
    pub deletes: Vec<String>,
}

impl StockWriteSet {
    /// Stage a create/overwrite
    pub fn put(&mut self, item: StockItem) {
        self.puts.push(item);
    }

    /// Stage a delete
    pub fn delete(&mut self, id: impl Into<String>) {
        self.deletes.push(id.into());
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// Client boundary to the document store
///
/// Implemented by the RocksDB-backed [`Storage`](crate::Storage); tests may
/// substitute doubles, e.g. to inject commit conflicts.
pub trait StockStore: Send + Sync + 'static {
    /// Versioned read of a bounded set of stock-record keys
    fn snapshot(&self, ids: &[&str]) -> Result<StockSnapshot>;

    /// Conditionally apply `writes`; fails with `Conflict` if any snapshotted
    /// key changed since the read. Every write key must be covered by the
    /// snapshot.
    fn commit(&self, snapshot: &StockSnapshot, writes: StockWriteSet) -> Result<()>;

    /// Like [`StockStore::commit`], additionally persisting `sale` in the
    /// same atomic unit
    fn commit_with_sale(
        &self,
        snapshot: &StockSnapshot,
        writes: StockWriteSet,
        sale: &SaleTransaction,
    ) -> Result<()>;

    /// Point read of one stock record
    fn get_stock_item(&self, id: &str) -> Result<Option<StockItem>>;

    /// All stock records for a site (masters and stall records)
    fn list_site_items(&self, site_id: &str) -> Result<Vec<StockItem>>;

    /// All stock records scoped to one stall
    fn list_stall_items(&self, site_id: &str, stall_id: &str) -> Result<Vec<StockItem>>;

    /// Append movement log entries; entries are never updated or deleted
    fn append_movement_logs(&self, entries: &[StockMovementLog]) -> Result<()>;

    /// Movement logs for one record, oldest first
    fn movement_logs_for_item(&self, item_id: &str) -> Result<Vec<StockMovementLog>>;

    /// Point read of one sale
    fn get_sale(&self, sale_id: &str) -> Result<Option<SaleTransaction>>;
}
