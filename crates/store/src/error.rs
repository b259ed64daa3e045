use common::Version;
use domain::{InventoryError, InventoryKey};
use thiserror::Error;

/// Errors that can occur when interacting with the inventory repository.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version did not match the version the caller loaded.
    #[error("Concurrency conflict for item {key}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        key: InventoryKey,
        expected: Version,
        actual: Version,
    },

    /// No item is stored under the key.
    #[error("Inventory item not found: {0}")]
    NotFound(InventoryKey),

    /// The item could not be created.
    #[error(transparent)]
    Domain(#[from] InventoryError),
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StoreError>;
