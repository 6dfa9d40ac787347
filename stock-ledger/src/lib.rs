//! Stock Ledger & Transfer Engine
//!
//! Quantity-tracked inventory for a multi-stall market site: site-wide
//! *master* records, per-stall records optionally linked back to the master
//! they were allocated from, and an append-only movement log recording every
//! quantity change.
//!
//! # Architecture
//!
//! - **Atomic transactions**: Every operation is one snapshot/commit round
//!   trip with optimistic conflict detection and bounded retry
//! - **Dual-write semantics**: Allocations, returns and linked sales move
//!   quantity between two records in a single commit
//! - **Append-only audit**: One movement log entry per quantity-change leg,
//!   all legs of an operation sharing a transaction id
//!
//! # Invariants
//!
//! - Quantities are never persisted negative
//! - Allocations, returns and transfers conserve total quantity
//! - Transfers between stalls never touch the master record; sales from a
//!   linked stall deduct the master by the same amount

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod audit;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod sale;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use batch::{BatchOperation, BatchReport};
pub use config::{Config, DeletePolicy};
pub use error::{Error, Result};
pub use ledger::{LedgerOutcome, StockLedger};
pub use sale::{SaleLineRequest, SaleOutcome};
pub use storage::Storage;
pub use store::StockStore;
pub use types::{
    derived_stall_item_id, Actor, MovementType, SaleTransaction, StockItem, StockMovementLog,
};
