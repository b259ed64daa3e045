//! Allocation, preview and release outcomes.

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId, LockId};
use domain::{Aggregate, InventoryError, InventoryItem, InventoryKey, StockLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AllocationEvent, AllocationLine, AllocationState};

/// Outcome of one allocation line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationLineResult {
    /// Position of the line in the request.
    pub index: usize,
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub quantity: Decimal,
    pub lock_id: Option<LockId>,
    pub expire_at: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(skip)]
    pub error: Option<InventoryError>,
    pub error_message: Option<String>,
}

impl AllocationLineResult {
    pub(crate) fn locked(
        index: usize,
        item: &InventoryItem,
        line: &AllocationLine,
        lock: &StockLock,
    ) -> Self {
        Self {
            index,
            item_id: item.id(),
            key: line.key,
            quantity: line.quantity,
            lock_id: Some(lock.id()),
            expire_at: Some(lock.expire_at()),
            success: true,
            error: None,
            error_message: None,
        }
    }

    pub(crate) fn failed(
        index: usize,
        item: &InventoryItem,
        line: &AllocationLine,
        error: InventoryError,
    ) -> Self {
        Self {
            index,
            item_id: item.id(),
            key: line.key,
            quantity: line.quantity,
            lock_id: None,
            expire_at: None,
            success: false,
            error_message: Some(error.to_string()),
            error: Some(error),
        }
    }
}

/// Outcome of rolling back one lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationResult {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub lock_id: LockId,
    pub success: bool,
    #[serde(skip)]
    pub error: Option<InventoryError>,
    pub error_message: Option<String>,
}

/// Outcome of a multi-line allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    pub correlation_id: CorrelationId,
    pub source_type: String,
    pub source_id: String,
    pub state: AllocationState,
    pub lines: Vec<AllocationLineResult>,
    pub total_requested: Decimal,
    /// Quantity locked during the allocation pass, before any rollback.
    pub total_allocated: Decimal,
    /// Every line is locked.
    pub success: bool,
    /// At least one line locked and at least one failed.
    pub partial_success: bool,
    /// Locks taken during a partial allocation were rolled back.
    pub compensated: bool,
    pub compensation_results: Vec<CompensationResult>,
    /// Request positions of the lines that could not be locked.
    pub failed_lines: Vec<usize>,
    pub expire_at: DateTime<Utc>,
    pub events: Vec<AllocationEvent>,
}

impl AllocationResult {
    /// Returns the lines that hold a lock.
    pub fn successful_lines(&self) -> impl Iterator<Item = &AllocationLineResult> {
        self.lines.iter().filter(|line| line.success)
    }

    /// Returns the lock IDs still held by this allocation.
    pub fn held_locks(&self) -> Vec<LockId> {
        if !self.success {
            return Vec::new();
        }
        self.lines.iter().filter_map(|line| line.lock_id).collect()
    }
}

/// Availability of one line without locking anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewLine {
    pub index: usize,
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub requested_quantity: Decimal,
    pub available_quantity: Decimal,
    pub can_fulfill: bool,
    /// Requested minus available; zero when the line can be fulfilled.
    pub shortage_quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPreview {
    pub source_type: String,
    pub source_id: String,
    pub lines: Vec<PreviewLine>,
    pub total_requested: Decimal,
    /// Sum of each line's available quantity; an item named on several lines
    /// counts once per line.
    pub total_available: Decimal,
    pub can_fulfill_all: bool,
    pub shortage_lines: Vec<usize>,
}

/// Outcome of releasing one lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseLineResult {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub lock_id: LockId,
    pub quantity: Decimal,
    pub success: bool,
    #[serde(skip)]
    pub error: Option<InventoryError>,
    pub error_message: Option<String>,
}

/// Outcome of releasing every lock a source document holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResult {
    pub correlation_id: CorrelationId,
    pub source_type: String,
    pub source_id: String,
    pub lines: Vec<ReleaseLineResult>,
    pub total_released: Decimal,
    /// Every matching lock was released.
    pub success: bool,
    pub events: Vec<AllocationEvent>,
}
