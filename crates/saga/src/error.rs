//! Allocation error types.

use common::CorrelationId;
use domain::InventoryKey;
use rust_decimal::Decimal;
use store::StoreError;
use thiserror::Error;

use crate::CompensationResult;

/// Errors that reject an allocation or release request as a whole.
///
/// Per-line lock failures are not errors; they are reported in the result.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Allocation request has no lines.
    #[error("At least one item is required for allocation")]
    EmptyRequest,

    #[error("Source type is required")]
    MissingSourceType,

    #[error("Source ID is required")]
    MissingSourceId,

    /// A line names an item that was not supplied.
    #[error("Inventory item for line {index} ({key}) was not supplied")]
    UnknownItem { index: usize, key: InventoryKey },

    #[error("Quantity at line {index} must be positive, got {quantity}")]
    InvalidLineQuantity { index: usize, quantity: Decimal },

    /// The requested quantities add up past what a `Decimal` can hold.
    #[error("Total requested quantity is out of range")]
    QuantityOverflow,

    /// Lock expiry would fall outside the supported calendar.
    #[error("Lock duration is out of range")]
    LockDurationOutOfRange,

    /// Release request has no items.
    #[error("At least one item is required for release")]
    NoItemsToRelease,

    /// Repository error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Saving stopped part-way. Locks already saved for this allocation were
    /// released again; `rolled_back` lists each of those releases.
    #[error("Allocation {correlation_id} was not persisted: {source}")]
    NotPersisted {
        correlation_id: CorrelationId,
        rolled_back: Vec<CompensationResult>,
        source: StoreError,
    },
}

impl AllocationError {
    /// Returns a stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            AllocationError::EmptyRequest | AllocationError::NoItemsToRelease => "INVALID_REQUEST",
            AllocationError::MissingSourceType => "INVALID_SOURCE_TYPE",
            AllocationError::MissingSourceId => "INVALID_SOURCE_ID",
            AllocationError::UnknownItem { .. } => "INVALID_ITEM",
            AllocationError::InvalidLineQuantity { .. } => "INVALID_QUANTITY",
            AllocationError::QuantityOverflow => "QUANTITY_OVERFLOW",
            AllocationError::LockDurationOutOfRange => "INVALID_LOCK_DURATION",
            AllocationError::Store(source) | AllocationError::NotPersisted { source, .. } => {
                store_code(source)
            }
        }
    }
}

fn store_code(error: &StoreError) -> &'static str {
    match error {
        StoreError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
        StoreError::NotFound(_) => "NOT_FOUND",
        StoreError::Domain(e) => e.code(),
    }
}

/// Convenience type alias for allocation results.
pub type Result<T> = std::result::Result<T, AllocationError>;
