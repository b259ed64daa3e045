//! Inventory item aggregate and related types.

mod aggregate;
mod batch;
mod events;
mod lock;
mod transaction;
mod value_objects;

pub use aggregate::InventoryItem;
pub use batch::{Batch, BatchInfo};
pub use events::{
    BatchesConsumedData, InventoryCostChangedData, InventoryEvent, StockAdjustedData,
    StockBelowThresholdData, StockDecreasedData, StockDeductedData, StockIncreasedData,
    StockLockExpiredData, StockLockedData, StockThresholdsChangedData, StockUnlockedData,
};
pub use lock::{LockStatus, StockLock};
pub use transaction::{
    InventoryTransaction, MOVING_AVERAGE, TransactionBuilder, TransactionType,
    transactions_from_events,
};
pub use value_objects::{COST_SCALE, InventoryKey, round_cost};

use common::{BatchId, LockId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InventoryError {
    #[error("Inventory item ID is required")]
    InvalidItem,

    /// Warehouse ID is required.
    #[error("Warehouse ID is required")]
    InvalidWarehouse,

    /// Product ID is required.
    #[error("Product ID is required")]
    InvalidProduct,

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Invalid unit cost: {0} (must not be negative)")]
    InvalidCost(Decimal),

    /// Source type and source ID must both be present.
    #[error("Source type and source ID are required")]
    InvalidSource,

    #[error("A reason is required")]
    InvalidReason,

    /// Not enough available stock for the request.
    #[error("Insufficient stock: {available} available, {requested} requested")]
    InsufficientStock {
        available: Decimal,
        requested: Decimal,
    },

    /// No active lock with this ID.
    #[error("Lock not found: {0}")]
    LockNotFound(LockId),

    /// Recounts are refused while stock is reserved.
    #[error("Cannot adjust stock while locks are active")]
    HasLockedStock,

    #[error("Division by zero while averaging unit cost")]
    DivisionByZero,

    /// A quantity or value would exceed what a `Decimal` can hold.
    #[error("Quantity or value out of range")]
    QuantityOverflow,

    /// Specified batch selection needs at least one request.
    #[error("Specified batch strategy requires batch deduction requests")]
    NoBatchRequests,

    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    /// A batch no longer holds what a selection planned to take from it.
    #[error("Batch {batch_id} holds {actual}, expected at least {expected}")]
    DeductionMismatch {
        batch_id: BatchId,
        expected: Decimal,
        actual: Decimal,
    },
}

impl InventoryError {
    /// Returns a stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::InvalidItem => "INVALID_INVENTORY_ITEM",
            InventoryError::InvalidWarehouse => "INVALID_WAREHOUSE",
            InventoryError::InvalidProduct => "INVALID_PRODUCT",
            InventoryError::InvalidQuantity(_) => "INVALID_QUANTITY",
            InventoryError::InvalidCost(_) => "INVALID_COST",
            InventoryError::InvalidSource => "INVALID_SOURCE",
            InventoryError::InvalidReason => "INVALID_REASON",
            InventoryError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            InventoryError::LockNotFound(_) => "LOCK_NOT_FOUND",
            InventoryError::HasLockedStock => "HAS_LOCKED_STOCK",
            InventoryError::DivisionByZero => "DIVISION_BY_ZERO",
            InventoryError::QuantityOverflow => "QUANTITY_OVERFLOW",
            InventoryError::NoBatchRequests => "NO_BATCH_REQUESTS",
            InventoryError::BatchNotFound(_) => "BATCH_NOT_FOUND",
            InventoryError::DeductionMismatch { .. } => "DEDUCTION_MISMATCH",
        }
    }
}
