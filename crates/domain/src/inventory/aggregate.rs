//! Inventory item aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, LockId, ProductId, Version, WarehouseId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::outbound::{self, BatchOutboundResult};

use super::{
    Batch, BatchInfo, InventoryError, InventoryEvent, InventoryKey, StockLock, round_cost,
    events::{StockDeductedData, StockLockedData, StockUnlockedData},
};

/// Inventory item aggregate root.
///
/// Tracks one product in one warehouse: the available and locked quantity
/// ledger, the moving weighted-average unit cost, the batches the stock was
/// received in and the locks reserving it.
///
/// Every mutator validates first and changes nothing on error. On success it
/// applies its events, bumps the version once and queues the events for
/// [`take_events`](Self::take_events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Surrogate identifier.
    id: AggregateId,

    /// Warehouse-product pair this item tracks.
    key: InventoryKey,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    available_quantity: Decimal,
    locked_quantity: Decimal,

    /// Moving weighted-average unit cost.
    unit_cost: Decimal,

    min_quantity: Decimal,
    max_quantity: Decimal,

    batches: Vec<Batch>,
    locks: Vec<StockLock>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    /// Events recorded since the last [`take_events`](Self::take_events).
    #[serde(skip)]
    pending_events: Vec<InventoryEvent>,
}

impl Aggregate for InventoryItem {
    type Event = InventoryEvent;
    type Error = InventoryError;

    fn aggregate_type() -> &'static str {
        "InventoryItem"
    }

    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        self.updated_at = event.occurred_at();
        match event {
            InventoryEvent::StockIncreased(data) => {
                self.available_quantity = self.available_quantity.saturating_add(data.quantity);
                if let Some(batch) = data.batch {
                    self.batches.push(batch);
                }
            }
            InventoryEvent::InventoryCostChanged(data) => {
                self.unit_cost = data.new_cost;
            }
            InventoryEvent::StockLocked(data) => self.apply_stock_locked(data),
            InventoryEvent::StockUnlocked(data) => self.apply_stock_unlocked(data),
            InventoryEvent::StockLockExpired(_) => {
                // Release happens in the StockUnlocked that follows
            }
            InventoryEvent::StockDeducted(data) => self.apply_stock_deducted(data),
            InventoryEvent::StockDecreased(data) => {
                self.available_quantity -= data.quantity;
            }
            InventoryEvent::StockAdjusted(data) => {
                self.available_quantity = data.new_quantity;
            }
            InventoryEvent::StockBelowThreshold(_) => {}
            InventoryEvent::StockThresholdsChanged(data) => {
                self.min_quantity = data.min_quantity;
                self.max_quantity = data.max_quantity;
            }
            InventoryEvent::BatchesConsumed(data) => {
                for deduction in data.deductions {
                    let batch = self.batches.iter_mut().find(|b| b.id() == deduction.batch_id);
                    if let Some(batch) = batch {
                        batch.deduct(deduction.deducted_quantity);
                    }
                }
            }
        }
    }
}

impl InventoryItem {
    /// Creates an empty item for a warehouse-product pair.
    pub fn new(warehouse_id: WarehouseId, product_id: ProductId) -> Result<Self, InventoryError> {
        Self::from_key(InventoryKey::new(warehouse_id, product_id))
    }

    /// Creates an empty item for a key.
    pub fn from_key(key: InventoryKey) -> Result<Self, InventoryError> {
        if key.warehouse_id.is_nil() {
            return Err(InventoryError::InvalidWarehouse);
        }
        if key.product_id.is_nil() {
            return Err(InventoryError::InvalidProduct);
        }

        let now = Utc::now();
        Ok(Self {
            id: AggregateId::new(),
            key,
            version: Version::initial(),
            available_quantity: Decimal::ZERO,
            locked_quantity: Decimal::ZERO,
            unit_cost: Decimal::ZERO,
            min_quantity: Decimal::ZERO,
            max_quantity: Decimal::ZERO,
            batches: Vec::new(),
            locks: Vec::new(),
            created_at: now,
            updated_at: now,
            pending_events: Vec::new(),
        })
    }
}

// Query methods
impl InventoryItem {
    pub fn key(&self) -> InventoryKey {
        self.key
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.key.warehouse_id
    }

    pub fn product_id(&self) -> ProductId {
        self.key.product_id
    }

    pub fn available_quantity(&self) -> Decimal {
        self.available_quantity
    }

    pub fn locked_quantity(&self) -> Decimal {
        self.locked_quantity
    }

    /// Returns available plus locked quantity.
    pub fn total_quantity(&self) -> Decimal {
        self.available_quantity + self.locked_quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn min_quantity(&self) -> Decimal {
        self.min_quantity
    }

    pub fn max_quantity(&self) -> Decimal {
        self.max_quantity
    }

    /// Returns the value of all stock on hand at the current unit cost,
    /// saturating at `Decimal::MAX`.
    pub fn total_value(&self) -> Decimal {
        self.total_quantity().saturating_mul(self.unit_cost)
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Returns every lock ever taken, including released and consumed ones.
    pub fn locks(&self) -> &[StockLock] {
        &self.locks
    }

    /// Returns locks that are neither released nor consumed.
    pub fn active_locks(&self) -> impl Iterator<Item = &StockLock> {
        self.locks.iter().filter(|lock| lock.is_active())
    }

    /// Returns a lock by ID regardless of its status.
    pub fn find_lock(&self, lock_id: LockId) -> Option<&StockLock> {
        self.locks.iter().find(|lock| lock.id() == lock_id)
    }

    /// Returns true if `quantity` could be locked right now.
    pub fn can_fulfill(&self, quantity: Decimal) -> bool {
        self.available_quantity >= quantity
    }

    pub fn has_available_stock(&self) -> bool {
        self.available_quantity > Decimal::ZERO
    }

    /// Returns true if a minimum is set and total stock is under it.
    pub fn is_below_minimum(&self) -> bool {
        self.min_quantity > Decimal::ZERO && self.total_quantity() < self.min_quantity
    }

    /// Returns true if a maximum is set and total stock is over it.
    pub fn is_above_maximum(&self) -> bool {
        self.max_quantity > Decimal::ZERO && self.total_quantity() > self.max_quantity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns events recorded since the last drain.
    pub fn pending_events(&self) -> &[InventoryEvent] {
        &self.pending_events
    }

    /// Drains the recorded events.
    pub fn take_events(&mut self) -> Vec<InventoryEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Returns active locks whose expiry is strictly before `reference`.
    pub fn expired_locks_at(&self, reference: DateTime<Utc>) -> Vec<&StockLock> {
        self.active_locks()
            .filter(|lock| lock.is_expired_at(reference))
            .collect()
    }

    /// Returns active locks that have expired as of now.
    pub fn expired_locks(&self) -> Vec<&StockLock> {
        self.expired_locks_at(Utc::now())
    }
}

// Command methods
impl InventoryItem {
    /// Receives stock, folding its cost into the weighted-average unit cost.
    ///
    /// A batch is created when `batch` metadata is supplied. Fails with
    /// [`InventoryError::QuantityOverflow`] when the new total quantity or
    /// stock value is not representable.
    pub fn increase_stock(
        &mut self,
        quantity: Decimal,
        unit_cost: Decimal,
        batch: Option<BatchInfo>,
    ) -> Result<(), InventoryError> {
        if quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        if unit_cost < Decimal::ZERO {
            return Err(InventoryError::InvalidCost(unit_cost));
        }

        let old_quantity = self.total_quantity();
        let new_quantity = old_quantity
            .checked_add(quantity)
            .ok_or(InventoryError::QuantityOverflow)?;
        let received_value = quantity
            .checked_mul(unit_cost)
            .ok_or(InventoryError::QuantityOverflow)?;
        let new_cost = if old_quantity.is_zero() {
            unit_cost
        } else {
            let total_value = old_quantity
                .checked_mul(self.unit_cost)
                .and_then(|value| value.checked_add(received_value))
                .ok_or(InventoryError::QuantityOverflow)?;
            let average = total_value
                .checked_div(new_quantity)
                .ok_or(InventoryError::DivisionByZero)?;
            round_cost(average)
        };

        let batch = batch.map(|info| Batch::new(info, quantity, unit_cost, Utc::now()));
        let mut events = vec![InventoryEvent::stock_increased(
            self, quantity, unit_cost, batch,
        )];
        if new_cost != self.unit_cost {
            events.push(InventoryEvent::cost_changed(self, self.unit_cost, new_cost));
        }

        self.record(events);
        Ok(())
    }

    /// Reserves available stock for a source document until `expire_at`.
    pub fn lock_stock(
        &mut self,
        quantity: Decimal,
        source_type: &str,
        source_id: &str,
        expire_at: DateTime<Utc>,
    ) -> Result<StockLock, InventoryError> {
        if quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        self.ensure_available(quantity)?;
        ensure_source(source_type, source_id)?;

        let lock = StockLock::new(
            LockId::new(),
            quantity,
            source_type,
            source_id,
            expire_at,
            Utc::now(),
        );
        let event = InventoryEvent::stock_locked(self, &lock);
        self.record(vec![event]);
        Ok(lock)
    }

    /// Releases an active lock back to available stock.
    pub fn unlock_stock(&mut self, lock_id: LockId) -> Result<(), InventoryError> {
        let event = InventoryEvent::stock_unlocked(self, self.active_lock(lock_id)?);
        self.record(vec![event]);
        Ok(())
    }

    /// Ships the whole quantity held by an active lock.
    pub fn deduct_stock(&mut self, lock_id: LockId) -> Result<(), InventoryError> {
        let lock = self.active_lock(lock_id)?;
        let remaining = self.total_quantity() - lock.quantity();

        let mut events = vec![InventoryEvent::stock_deducted(self, lock)];
        events.extend(self.threshold_event(remaining));

        self.record(events);
        Ok(())
    }

    /// Removes available stock directly, without a lock.
    pub fn decrease_stock(
        &mut self,
        quantity: Decimal,
        source_type: &str,
        source_id: &str,
        reason: &str,
    ) -> Result<(), InventoryError> {
        if quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        self.ensure_available(quantity)?;
        ensure_source(source_type, source_id)?;

        let remaining = self.total_quantity() - quantity;
        let mut events = vec![InventoryEvent::stock_decreased(
            self,
            quantity,
            source_type,
            source_id,
            reason,
        )];
        events.extend(self.threshold_event(remaining));

        self.record(events);
        Ok(())
    }

    /// Sets available stock to a physically counted quantity.
    pub fn adjust_stock(&mut self, actual: Decimal, reason: &str) -> Result<(), InventoryError> {
        if actual < Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(actual));
        }
        if reason.trim().is_empty() {
            return Err(InventoryError::InvalidReason);
        }
        if self.active_locks().next().is_some() {
            return Err(InventoryError::HasLockedStock);
        }

        let resulting_total = actual
            .checked_add(self.locked_quantity)
            .ok_or(InventoryError::QuantityOverflow)?;
        let mut events = vec![InventoryEvent::stock_adjusted(self, actual, reason)];
        events.extend(self.threshold_event(resulting_total));

        self.record(events);
        Ok(())
    }

    pub fn set_min_quantity(&mut self, quantity: Decimal) -> Result<(), InventoryError> {
        if quantity < Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        let event = InventoryEvent::thresholds_changed(self, quantity, self.max_quantity);
        self.record(vec![event]);
        Ok(())
    }

    pub fn set_max_quantity(&mut self, quantity: Decimal) -> Result<(), InventoryError> {
        if quantity < Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        let event = InventoryEvent::thresholds_changed(self, self.min_quantity, quantity);
        self.record(vec![event]);
        Ok(())
    }

    /// Draws a batch selection down from this item's batches.
    ///
    /// The quantity ledger is untouched; pair this with
    /// [`deduct_stock`](Self::deduct_stock) or
    /// [`decrease_stock`](Self::decrease_stock).
    pub fn consume_batches(&mut self, result: &BatchOutboundResult) -> Result<(), InventoryError> {
        if result.deductions.is_empty() {
            return Ok(());
        }
        outbound::verify_deductions(&self.batches, result)?;

        let event = InventoryEvent::batches_consumed(self, result.deductions.clone());
        self.record(vec![event]);
        Ok(())
    }

    /// Releases every active lock that expired strictly before `reference`.
    ///
    /// All locks are judged against the same instant and released in one
    /// change, so a sweep bumps the version at most once. Returns how many
    /// were released.
    pub fn release_expired_locks_at(&mut self, reference: DateTime<Utc>) -> usize {
        let events: Vec<InventoryEvent> = self
            .expired_locks_at(reference)
            .into_iter()
            .flat_map(|lock| {
                [
                    InventoryEvent::lock_expired(self, lock, reference),
                    InventoryEvent::stock_unlocked(self, lock),
                ]
            })
            .collect();
        if events.is_empty() {
            return 0;
        }

        let released = events.len() / 2;
        self.record(events);
        tracing::debug!(
            item = %self.key,
            released,
            %reference,
            "Released expired stock locks"
        );
        released
    }

    /// Releases every active lock that has expired as of now.
    pub fn release_expired_locks(&mut self) -> usize {
        self.release_expired_locks_at(Utc::now())
    }
}

// Helpers
impl InventoryItem {
    fn record(&mut self, events: Vec<InventoryEvent>) {
        self.apply_events(events.iter().cloned());
        self.version = self.version.next();
        self.pending_events.extend(events);
    }

    fn active_lock(&self, lock_id: LockId) -> Result<&StockLock, InventoryError> {
        self.active_locks()
            .find(|lock| lock.id() == lock_id)
            .ok_or(InventoryError::LockNotFound(lock_id))
    }

    fn ensure_available(&self, quantity: Decimal) -> Result<(), InventoryError> {
        if self.available_quantity < quantity {
            return Err(InventoryError::InsufficientStock {
                available: self.available_quantity,
                requested: quantity,
            });
        }
        Ok(())
    }

    fn threshold_event(&self, resulting_total: Decimal) -> Option<InventoryEvent> {
        (self.min_quantity > Decimal::ZERO && resulting_total < self.min_quantity)
            .then(|| InventoryEvent::below_threshold(self, resulting_total))
    }

    fn apply_stock_locked(&mut self, data: StockLockedData) {
        self.available_quantity -= data.quantity;
        self.locked_quantity = self.locked_quantity.saturating_add(data.quantity);
        self.locks.push(StockLock::new(
            data.lock_id,
            data.quantity,
            data.source_type,
            data.source_id,
            data.expire_at,
            data.occurred_at,
        ));
    }

    fn apply_stock_unlocked(&mut self, data: StockUnlockedData) {
        if let Some(lock) = self.locks.iter_mut().find(|l| l.id() == data.lock_id) {
            lock.release(data.occurred_at);
            self.locked_quantity -= data.quantity;
            self.available_quantity = self.available_quantity.saturating_add(data.quantity);
        }
    }

    fn apply_stock_deducted(&mut self, data: StockDeductedData) {
        if let Some(lock) = self.locks.iter_mut().find(|l| l.id() == data.lock_id) {
            lock.consume(data.occurred_at);
            self.locked_quantity -= data.quantity;
        }
    }
}

fn ensure_source(source_type: &str, source_id: &str) -> Result<(), InventoryError> {
    if source_type.trim().is_empty() || source_id.trim().is_empty() {
        return Err(InventoryError::InvalidSource);
    }
    Ok(())
}
