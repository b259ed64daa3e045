//! Inventory domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, LockId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::outbound::BatchDeduction;

use super::{Batch, InventoryItem, InventoryKey, StockLock};

/// Events that can occur on an inventory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    /// Stock was received.
    StockIncreased(StockIncreasedData),

    /// The weighted-average unit cost changed.
    InventoryCostChanged(InventoryCostChangedData),

    /// Available stock was reserved under a lock.
    StockLocked(StockLockedData),

    /// A lock was released and its quantity returned to available stock.
    StockUnlocked(StockUnlockedData),

    /// A lock outlived its expiry and is about to be released.
    StockLockExpired(StockLockExpiredData),

    /// A lock was fulfilled and its quantity left the warehouse.
    StockDeducted(StockDeductedData),

    /// Available stock was removed directly.
    StockDecreased(StockDecreasedData),

    /// Available stock was set by a physical recount.
    StockAdjusted(StockAdjustedData),

    /// Total stock fell under the configured minimum.
    StockBelowThreshold(StockBelowThresholdData),

    /// Minimum or maximum quantity changed.
    StockThresholdsChanged(StockThresholdsChangedData),

    /// Batch quantities were drawn down by an outbound selection.
    BatchesConsumed(BatchesConsumedData),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::StockIncreased(_) => "StockIncreased",
            InventoryEvent::InventoryCostChanged(_) => "InventoryCostChanged",
            InventoryEvent::StockLocked(_) => "StockLocked",
            InventoryEvent::StockUnlocked(_) => "StockUnlocked",
            InventoryEvent::StockLockExpired(_) => "StockLockExpired",
            InventoryEvent::StockDeducted(_) => "StockDeducted",
            InventoryEvent::StockDecreased(_) => "StockDecreased",
            InventoryEvent::StockAdjusted(_) => "StockAdjusted",
            InventoryEvent::StockBelowThreshold(_) => "StockBelowThreshold",
            InventoryEvent::StockThresholdsChanged(_) => "StockThresholdsChanged",
            InventoryEvent::BatchesConsumed(_) => "BatchesConsumed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::StockIncreased(data) => data.occurred_at,
            InventoryEvent::InventoryCostChanged(data) => data.occurred_at,
            InventoryEvent::StockLocked(data) => data.occurred_at,
            InventoryEvent::StockUnlocked(data) => data.occurred_at,
            InventoryEvent::StockLockExpired(data) => data.occurred_at,
            InventoryEvent::StockDeducted(data) => data.occurred_at,
            InventoryEvent::StockDecreased(data) => data.occurred_at,
            InventoryEvent::StockAdjusted(data) => data.occurred_at,
            InventoryEvent::StockBelowThreshold(data) => data.occurred_at,
            InventoryEvent::StockThresholdsChanged(data) => data.occurred_at,
            InventoryEvent::BatchesConsumed(data) => data.occurred_at,
        }
    }
}

impl InventoryEvent {
    /// Returns the key of the item that emitted the event.
    pub fn key(&self) -> InventoryKey {
        match self {
            InventoryEvent::StockIncreased(data) => data.key,
            InventoryEvent::InventoryCostChanged(data) => data.key,
            InventoryEvent::StockLocked(data) => data.key,
            InventoryEvent::StockUnlocked(data) => data.key,
            InventoryEvent::StockLockExpired(data) => data.key,
            InventoryEvent::StockDeducted(data) => data.key,
            InventoryEvent::StockDecreased(data) => data.key,
            InventoryEvent::StockAdjusted(data) => data.key,
            InventoryEvent::StockBelowThreshold(data) => data.key,
            InventoryEvent::StockThresholdsChanged(data) => data.key,
            InventoryEvent::BatchesConsumed(data) => data.key,
        }
    }
}

/// Data for StockIncreased event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockIncreasedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,

    /// Quantity received.
    pub quantity: Decimal,

    /// Unit cost of the received goods.
    pub unit_cost: Decimal,

    /// Batch created for the receipt, if batch metadata was supplied.
    pub batch: Option<Batch>,

    pub occurred_at: DateTime<Utc>,
}

/// Data for InventoryCostChanged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCostChangedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub old_cost: Decimal,
    pub new_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockLocked event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLockedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub lock_id: LockId,
    pub quantity: Decimal,
    pub source_type: String,
    pub source_id: String,
    pub expire_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockUnlocked event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUnlockedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub lock_id: LockId,
    pub quantity: Decimal,
    pub source_type: String,
    pub source_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockLockExpired event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLockExpiredData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub lock_id: LockId,
    pub quantity: Decimal,
    pub source_type: String,
    pub source_id: String,

    /// The lock's expiry instant.
    pub expired_at: DateTime<Utc>,

    /// Instant the sweep evaluated the lock against.
    pub reference: DateTime<Utc>,

    pub occurred_at: DateTime<Utc>,
}

/// Data for StockDeducted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDeductedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub lock_id: LockId,
    pub quantity: Decimal,
    pub source_type: String,
    pub source_id: String,

    /// Item unit cost at the time of deduction.
    pub unit_cost: Decimal,

    pub occurred_at: DateTime<Utc>,
}

/// Data for StockDecreased event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDecreasedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub source_type: String,
    pub source_id: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockAdjusted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAdjustedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub old_quantity: Decimal,
    pub new_quantity: Decimal,

    /// `new_quantity - old_quantity`.
    pub difference: Decimal,

    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockBelowThreshold event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockBelowThresholdData {
    pub item_id: AggregateId,
    pub key: InventoryKey,

    /// Total (available + locked) after the triggering change.
    pub current_quantity: Decimal,

    pub min_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockThresholdsChanged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockThresholdsChangedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Data for BatchesConsumed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchesConsumedData {
    pub item_id: AggregateId,
    pub key: InventoryKey,
    pub deductions: Vec<BatchDeduction>,
    pub total_deducted: Decimal,
    pub total_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

// Convenience constructors for events
impl InventoryEvent {
    /// Creates a StockIncreased event.
    pub fn stock_increased(
        item: &InventoryItem,
        quantity: Decimal,
        unit_cost: Decimal,
        batch: Option<Batch>,
    ) -> Self {
        InventoryEvent::StockIncreased(StockIncreasedData {
            item_id: item.id(),
            key: item.key(),
            quantity,
            unit_cost,
            batch,
            occurred_at: Utc::now(),
        })
    }

    /// Creates an InventoryCostChanged event.
    pub fn cost_changed(item: &InventoryItem, old_cost: Decimal, new_cost: Decimal) -> Self {
        InventoryEvent::InventoryCostChanged(InventoryCostChangedData {
            item_id: item.id(),
            key: item.key(),
            old_cost,
            new_cost,
            occurred_at: Utc::now(),
        })
    }

    /// Creates a StockLocked event for a freshly created lock.
    pub fn stock_locked(item: &InventoryItem, lock: &StockLock) -> Self {
        InventoryEvent::StockLocked(StockLockedData {
            item_id: item.id(),
            key: item.key(),
            lock_id: lock.id(),
            quantity: lock.quantity(),
            source_type: lock.source_type().to_string(),
            source_id: lock.source_id().to_string(),
            expire_at: lock.expire_at(),
            occurred_at: lock.created_at(),
        })
    }

    /// Creates a StockUnlocked event.
    pub fn stock_unlocked(item: &InventoryItem, lock: &StockLock) -> Self {
        InventoryEvent::StockUnlocked(StockUnlockedData {
            item_id: item.id(),
            key: item.key(),
            lock_id: lock.id(),
            quantity: lock.quantity(),
            source_type: lock.source_type().to_string(),
            source_id: lock.source_id().to_string(),
            occurred_at: Utc::now(),
        })
    }

    /// Creates a StockLockExpired event.
    pub fn lock_expired(item: &InventoryItem, lock: &StockLock, reference: DateTime<Utc>) -> Self {
        InventoryEvent::StockLockExpired(StockLockExpiredData {
            item_id: item.id(),
            key: item.key(),
            lock_id: lock.id(),
            quantity: lock.quantity(),
            source_type: lock.source_type().to_string(),
            source_id: lock.source_id().to_string(),
            expired_at: lock.expire_at(),
            reference,
            occurred_at: Utc::now(),
        })
    }

    /// Creates a StockDeducted event.
    pub fn stock_deducted(item: &InventoryItem, lock: &StockLock) -> Self {
        InventoryEvent::StockDeducted(StockDeductedData {
            item_id: item.id(),
            key: item.key(),
            lock_id: lock.id(),
            quantity: lock.quantity(),
            source_type: lock.source_type().to_string(),
            source_id: lock.source_id().to_string(),
            unit_cost: item.unit_cost(),
            occurred_at: Utc::now(),
        })
    }

    /// Creates a StockDecreased event.
    pub fn stock_decreased(
        item: &InventoryItem,
        quantity: Decimal,
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        InventoryEvent::StockDecreased(StockDecreasedData {
            item_id: item.id(),
            key: item.key(),
            quantity,
            unit_cost: item.unit_cost(),
            source_type: source_type.into(),
            source_id: source_id.into(),
            reason: reason.into(),
            occurred_at: Utc::now(),
        })
    }

    /// Creates a StockAdjusted event.
    pub fn stock_adjusted(
        item: &InventoryItem,
        new_quantity: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        let old_quantity = item.available_quantity();
        InventoryEvent::StockAdjusted(StockAdjustedData {
            item_id: item.id(),
            key: item.key(),
            old_quantity,
            new_quantity,
            difference: new_quantity - old_quantity,
            reason: reason.into(),
            occurred_at: Utc::now(),
        })
    }

    /// Creates a StockBelowThreshold event.
    pub fn below_threshold(item: &InventoryItem, current_quantity: Decimal) -> Self {
        InventoryEvent::StockBelowThreshold(StockBelowThresholdData {
            item_id: item.id(),
            key: item.key(),
            current_quantity,
            min_quantity: item.min_quantity(),
            occurred_at: Utc::now(),
        })
    }

    /// Creates a StockThresholdsChanged event.
    pub fn thresholds_changed(
        item: &InventoryItem,
        min_quantity: Decimal,
        max_quantity: Decimal,
    ) -> Self {
        InventoryEvent::StockThresholdsChanged(StockThresholdsChangedData {
            item_id: item.id(),
            key: item.key(),
            min_quantity,
            max_quantity,
            occurred_at: Utc::now(),
        })
    }

    /// Creates a BatchesConsumed event.
    pub fn batches_consumed(item: &InventoryItem, deductions: Vec<BatchDeduction>) -> Self {
        let total_deducted = deductions
            .iter()
            .map(|d| d.deducted_quantity)
            .fold(Decimal::ZERO, Decimal::saturating_add);
        let total_cost = deductions
            .iter()
            .map(|d| d.total_cost)
            .fold(Decimal::ZERO, Decimal::saturating_add);
        InventoryEvent::BatchesConsumed(BatchesConsumedData {
            item_id: item.id(),
            key: item.key(),
            deductions,
            total_deducted,
            total_cost,
            occurred_at: Utc::now(),
        })
    }
}
