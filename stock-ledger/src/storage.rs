//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `stock_items` - Versioned stock records (key: item id)
//! - `movement_logs` - Append-only audit log (key: log id, UUIDv7)
//! - `sales` - Append-only sale records (key: sale id)
//! - `indices` - Secondary indices for collection queries
//!
//! Stock records carry a version counter; [`Storage::commit`] re-reads every
//! snapshotted key under the commit lock and aborts with `Conflict` when a
//! version has moved, which gives the snapshot/commit pair of [`StockStore`]
//! serializable semantics per record set.

use crate::{
    config::Config,
    error::{Error, Result},
    store::{StockSnapshot, StockStore, StockWriteSet, VersionedItem},
    types::{SaleTransaction, StockItem, StockMovementLog},
};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Column family names
const CF_STOCK_ITEMS: &str = "stock_items";
const CF_MOVEMENT_LOGS: &str = "movement_logs";
const CF_SALES: &str = "sales";
const CF_INDICES: &str = "indices";

/// Stock record with its optimistic-concurrency version counter
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionedDoc {
    version: u64,
    item: StockItem,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,

    /// Serializes version checks against batch writes
    commit_lock: Mutex<()>,
}

impl Storage {
    /// Open or create the database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STOCK_ITEMS, Self::cf_options_stock_items()),
            ColumnFamilyDescriptor::new(CF_MOVEMENT_LOGS, Self::cf_options_movement_logs()),
            ColumnFamilyDescriptor::new(CF_SALES, Self::cf_options_sales()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened stock-ledger RocksDB");

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_stock_items() -> Options {
        let mut opts = Options::default();
        // Frequently read and rewritten, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_movement_logs() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_sales() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Index key helpers

    fn index_key_site_item(site_id: &str, item_id: &str) -> Vec<u8> {
        format!("si|{}|{}", site_id, item_id).into_bytes()
    }

    fn index_key_stall_item(site_id: &str, stall_id: &str, item_id: &str) -> Vec<u8> {
        format!("st|{}|{}|{}", site_id, stall_id, item_id).into_bytes()
    }

    fn index_key_item_log(item_id: &str, log_id: &str) -> Vec<u8> {
        format!("lg|{}|{}", item_id, log_id).into_bytes()
    }

    fn read_versioned(&self, id: &str) -> Result<Option<VersionedDoc>> {
        let cf = self.cf_handle(CF_STOCK_ITEMS)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Ids found under an index prefix (the suffix after the prefix)
    fn scan_index_ids(&self, prefix: &[u8]) -> Result<Vec<String>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let suffix = &key[prefix.len()..];
            ids.push(
                String::from_utf8(suffix.to_vec())
                    .map_err(|_| Error::Storage("Non-UTF8 index key".to_string()))?,
            );
        }
        Ok(ids)
    }

    fn stage_item_put(&self, batch: &mut WriteBatch, version: u64, item: &StockItem) -> Result<()> {
        let cf_items = self.cf_handle(CF_STOCK_ITEMS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let doc = VersionedDoc {
            version,
            item: item.clone(),
        };
        batch.put_cf(&cf_items, item.id.as_bytes(), bincode::serialize(&doc)?);

        batch.put_cf(&cf_indices, Self::index_key_site_item(&item.site_id, &item.id), b"");
        if let Some(stall_id) = &item.stall_id {
            batch.put_cf(
                &cf_indices,
                Self::index_key_stall_item(&item.site_id, stall_id, &item.id),
                b"",
            );
        }
        Ok(())
    }

    fn stage_item_delete(&self, batch: &mut WriteBatch, item: &StockItem) -> Result<()> {
        let cf_items = self.cf_handle(CF_STOCK_ITEMS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        batch.delete_cf(&cf_items, item.id.as_bytes());
        batch.delete_cf(&cf_indices, Self::index_key_site_item(&item.site_id, &item.id));
        if let Some(stall_id) = &item.stall_id {
            batch.delete_cf(
                &cf_indices,
                Self::index_key_stall_item(&item.site_id, stall_id, &item.id),
            );
        }
        Ok(())
    }

    /// Version-check every snapshotted key, then apply the batch atomically.
    fn commit_inner(
        &self,
        snapshot: &StockSnapshot,
        writes: StockWriteSet,
        sale: Option<&SaleTransaction>,
    ) -> Result<()> {
        for item in &writes.puts {
            if !snapshot.covers(&item.id) {
                return Err(Error::Storage(format!(
                    "Write to {} outside transaction scope",
                    item.id
                )));
            }
        }
        for id in &writes.deletes {
            if !snapshot.covers(id) {
                return Err(Error::Storage(format!(
                    "Delete of {} outside transaction scope",
                    id
                )));
            }
        }

        let _guard = self.commit_lock.lock();

        for (id, entry) in snapshot.entries() {
            let current = self.read_versioned(id)?.map(|d| d.version).unwrap_or(0);
            if current != entry.version {
                tracing::debug!(item_id = %id, read = entry.version, current, "Commit conflict");
                return Err(Error::Conflict(id.clone()));
            }
        }

        let mut batch = WriteBatch::default();

        for item in &writes.puts {
            // covers() was checked above; absent keys snapshot at version 0
            let version = snapshot.version(&item.id).unwrap_or(0) + 1;
            self.stage_item_put(&mut batch, version, item)?;
        }

        for id in &writes.deletes {
            if let Some(item) = snapshot.item(id) {
                self.stage_item_delete(&mut batch, item)?;
            }
        }

        if let Some(sale) = sale {
            let cf_sales = self.cf_handle(CF_SALES)?;
            batch.put_cf(&cf_sales, sale.id.as_bytes(), bincode::serialize(sale)?);
        }

        self.db.write(batch)?;
        Ok(())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .finish()
    }
}

impl StockStore for Storage {
    fn snapshot(&self, ids: &[&str]) -> Result<StockSnapshot> {
        let mut entries = HashMap::with_capacity(ids.len());
        for id in ids {
            let entry = match self.read_versioned(id)? {
                Some(doc) => VersionedItem {
                    version: doc.version,
                    item: Some(doc.item),
                },
                None => VersionedItem {
                    version: 0,
                    item: None,
                },
            };
            entries.insert((*id).to_string(), entry);
        }
        Ok(StockSnapshot::new(entries))
    }

    fn commit(&self, snapshot: &StockSnapshot, writes: StockWriteSet) -> Result<()> {
        self.commit_inner(snapshot, writes, None)
    }

    fn commit_with_sale(
        &self,
        snapshot: &StockSnapshot,
        writes: StockWriteSet,
        sale: &SaleTransaction,
    ) -> Result<()> {
        self.commit_inner(snapshot, writes, Some(sale))
    }

    fn get_stock_item(&self, id: &str) -> Result<Option<StockItem>> {
        Ok(self.read_versioned(id)?.map(|d| d.item))
    }

    fn list_site_items(&self, site_id: &str) -> Result<Vec<StockItem>> {
        let prefix = format!("si|{}|", site_id).into_bytes();
        let mut items = Vec::new();
        for id in self.scan_index_ids(&prefix)? {
            // Index entries and item rows are written in one batch, so a hit
            // without a row means the id contained a separator; skip.
            if let Some(item) = self.get_stock_item(&id)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn list_stall_items(&self, site_id: &str, stall_id: &str) -> Result<Vec<StockItem>> {
        let prefix = format!("st|{}|{}|", site_id, stall_id).into_bytes();
        let mut items = Vec::new();
        for id in self.scan_index_ids(&prefix)? {
            if let Some(item) = self.get_stock_item(&id)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn append_movement_logs(&self, entries: &[StockMovementLog]) -> Result<()> {
        let cf_logs = self.cf_handle(CF_MOVEMENT_LOGS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        for entry in entries {
            batch.put_cf(&cf_logs, entry.id.as_bytes(), bincode::serialize(entry)?);
            batch.put_cf(
                &cf_indices,
                Self::index_key_item_log(&entry.stock_item_id, &entry.id),
                b"",
            );
        }
        self.db.write(batch)?;

        tracing::debug!(count = entries.len(), "Movement logs appended");
        Ok(())
    }

    fn movement_logs_for_item(&self, item_id: &str) -> Result<Vec<StockMovementLog>> {
        let cf_logs = self.cf_handle(CF_MOVEMENT_LOGS)?;
        let prefix = format!("lg|{}|", item_id).into_bytes();

        let mut logs = Vec::new();
        for log_id in self.scan_index_ids(&prefix)? {
            let value = self
                .db
                .get_cf(&cf_logs, log_id.as_bytes())?
                .ok_or_else(|| Error::Storage(format!("Dangling log index: {}", log_id)))?;
            logs.push(bincode::deserialize(&value)?);
        }
        Ok(logs)
    }

    fn get_sale(&self, sale_id: &str) -> Result<Option<SaleTransaction>> {
        let cf = self.cf_handle(CF_SALES)?;
        match self.db.get_cf(&cf, sale_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}
