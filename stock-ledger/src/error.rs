//! Error types for the stock ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stock ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request (negative quantity, identical source/destination, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Stock record missing
    #[error("Stock item not found: {0}")]
    NotFound(String),

    /// Operation requires a master link that is absent
    #[error("Stock item {0} is not linked to a master record")]
    NotLinked(String),

    /// Mutation would drive a quantity negative
    #[error("Insufficient stock on {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Record that lacks quantity
        item_id: String,
        /// Quantity the operation asked for
        requested: i64,
        /// Quantity currently on the record
        available: i64,
    },

    /// Record is in a state the operation does not permit
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transaction aborted by a concurrent writer; safe to retry whole operation
    #[error("Transaction conflict on {0}")]
    Conflict(String),

    /// Store unreachable; safe to retry with backoff
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Audit log rejected an entry
    #[error("Invalid movement log: {0}")]
    InvalidLogEntry(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the whole operation is safe and may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::Unavailable(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Conflict("item-1".to_string()).is_retryable());
        assert!(Error::Unavailable("connection refused".to_string()).is_retryable());
        assert!(!Error::NotFound("item-1".to_string()).is_retryable());
        assert!(!Error::InsufficientStock {
            item_id: "item-1".to_string(),
            requested: 10,
            available: 5,
        }
        .is_retryable());
    }

    #[test]
    fn test_insufficient_stock_message_names_quantities() {
        let err = Error::InsufficientStock {
            item_id: "item-1".to_string(),
            requested: 10,
            available: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("item-1"));
        assert!(msg.contains("10"));
        assert!(msg.contains('5'));
    }
}
