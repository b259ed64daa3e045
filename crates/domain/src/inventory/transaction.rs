//! Inventory transactions: one immutable record per stock movement.
//!
//! A transaction carries a positive quantity; its [`TransactionType`] gives
//! the direction. Transactions are derived from an item's events with
//! [`transactions_from_events`] and never change afterwards.

use chrono::{DateTime, Utc};
use common::{AggregateId, BatchId, LockId, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{InventoryError, InventoryEvent, InventoryKey};

/// Cost method recorded on movements valued at the moving-average cost.
pub const MOVING_AVERAGE: &str = "MOVING_AVERAGE";

/// Source type recorded on receipts.
const STOCK_RECEIPT: &str = "STOCK_RECEIPT";

/// Source type recorded on recounts.
const MANUAL_ADJUSTMENT: &str = "MANUAL_ADJUSTMENT";

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Inbound,
    Outbound,
    AdjustmentIncrease,
    AdjustmentDecrease,
    TransferIn,
    TransferOut,
    Return,
    Lock,
    Unlock,
}

impl TransactionType {
    pub fn all() -> [TransactionType; 9] {
        [
            Self::Inbound,
            Self::Outbound,
            Self::AdjustmentIncrease,
            Self::AdjustmentDecrease,
            Self::TransferIn,
            Self::TransferOut,
            Self::Return,
            Self::Lock,
            Self::Unlock,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Inbound => "INBOUND",
            TransactionType::Outbound => "OUTBOUND",
            TransactionType::AdjustmentIncrease => "ADJUSTMENT_INCREASE",
            TransactionType::AdjustmentDecrease => "ADJUSTMENT_DECREASE",
            TransactionType::TransferIn => "TRANSFER_IN",
            TransactionType::TransferOut => "TRANSFER_OUT",
            TransactionType::Return => "RETURN",
            TransactionType::Lock => "LOCK",
            TransactionType::Unlock => "UNLOCK",
        }
    }

    /// Returns true if the movement adds to available stock.
    pub fn is_increase(&self) -> bool {
        matches!(
            self,
            TransactionType::Inbound
                | TransactionType::AdjustmentIncrease
                | TransactionType::TransferIn
                | TransactionType::Return
                | TransactionType::Unlock
        )
    }

    /// Returns true if the movement takes from available stock.
    pub fn is_decrease(&self) -> bool {
        !self.is_increase()
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record of one stock movement on one inventory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    id: TransactionId,
    item_id: AggregateId,
    key: InventoryKey,
    transaction_type: TransactionType,

    /// Always positive.
    quantity: Decimal,
    unit_cost: Decimal,

    /// `quantity * unit_cost`.
    total_cost: Decimal,

    /// Available quantity before and after the movement.
    balance_before: Decimal,
    balance_after: Decimal,

    source_type: String,
    source_id: String,
    source_line_id: Option<String>,
    batch_id: Option<BatchId>,
    lock_id: Option<LockId>,
    reference: Option<String>,
    reason: Option<String>,
    cost_method: Option<String>,
    transaction_date: DateTime<Utc>,
}

impl InventoryTransaction {
    /// Starts a transaction for `quantity` units at `unit_cost`.
    ///
    /// Balances default to zero and the date to now; a source is required
    /// before [`build`](TransactionBuilder::build) succeeds.
    pub fn builder(
        item_id: AggregateId,
        key: InventoryKey,
        transaction_type: TransactionType,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> TransactionBuilder {
        TransactionBuilder {
            item_id,
            key,
            transaction_type,
            quantity,
            unit_cost,
            balance_before: Decimal::ZERO,
            balance_after: Decimal::ZERO,
            source_type: String::new(),
            source_id: String::new(),
            source_line_id: None,
            batch_id: None,
            lock_id: None,
            reference: None,
            reason: None,
            cost_method: None,
            transaction_date: Utc::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn item_id(&self) -> AggregateId {
        self.item_id
    }

    pub fn key(&self) -> InventoryKey {
        self.key
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn total_cost(&self) -> Decimal {
        self.total_cost
    }

    pub fn balance_before(&self) -> Decimal {
        self.balance_before
    }

    pub fn balance_after(&self) -> Decimal {
        self.balance_after
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn source_line_id(&self) -> Option<&str> {
        self.source_line_id.as_deref()
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    pub fn lock_id(&self) -> Option<LockId> {
        self.lock_id
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn cost_method(&self) -> Option<&str> {
        self.cost_method.as_deref()
    }

    pub fn transaction_date(&self) -> DateTime<Utc> {
        self.transaction_date
    }

    /// Returns the quantity, negated for decreasing movements.
    pub fn signed_quantity(&self) -> Decimal {
        if self.transaction_type.is_decrease() {
            -self.quantity
        } else {
            self.quantity
        }
    }

    /// Returns the total cost, negated for decreasing movements.
    pub fn signed_total_cost(&self) -> Decimal {
        if self.transaction_type.is_decrease() {
            -self.total_cost
        } else {
            self.total_cost
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.transaction_type.is_increase()
    }

    pub fn is_outbound(&self) -> bool {
        self.transaction_type.is_decrease()
    }

    /// Returns the change in available quantity.
    ///
    /// Zero for a deduction, which ships stock that was already locked.
    pub fn quantity_change(&self) -> Decimal {
        self.balance_after - self.balance_before
    }
}

/// Builder for [`InventoryTransaction`]. Validation happens in
/// [`build`](Self::build).
#[derive(Debug, Clone)]
#[must_use]
pub struct TransactionBuilder {
    item_id: AggregateId,
    key: InventoryKey,
    transaction_type: TransactionType,
    quantity: Decimal,
    unit_cost: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    source_type: String,
    source_id: String,
    source_line_id: Option<String>,
    batch_id: Option<BatchId>,
    lock_id: Option<LockId>,
    reference: Option<String>,
    reason: Option<String>,
    cost_method: Option<String>,
    transaction_date: DateTime<Utc>,
}

impl TransactionBuilder {
    pub fn balances(mut self, before: Decimal, after: Decimal) -> Self {
        self.balance_before = before;
        self.balance_after = after;
        self
    }

    pub fn source(mut self, source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self.source_id = source_id.into();
        self
    }

    pub fn with_source_line(mut self, line_id: impl Into<String>) -> Self {
        self.source_line_id = Some(line_id.into());
        self
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_lock(mut self, lock_id: LockId) -> Self {
        self.lock_id = Some(lock_id);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_cost_method(mut self, method: impl Into<String>) -> Self {
        self.cost_method = Some(method.into());
        self
    }

    pub fn at(mut self, date: DateTime<Utc>) -> Self {
        self.transaction_date = date;
        self
    }

    /// Validates and builds the transaction.
    ///
    /// Checks run in order: item, warehouse, product, positive quantity,
    /// non-negative cost, then source type and source ID.
    pub fn build(self) -> Result<InventoryTransaction, InventoryError> {
        if self.item_id.is_nil() {
            return Err(InventoryError::InvalidItem);
        }
        if self.key.warehouse_id.is_nil() {
            return Err(InventoryError::InvalidWarehouse);
        }
        if self.key.product_id.is_nil() {
            return Err(InventoryError::InvalidProduct);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(self.quantity));
        }
        if self.unit_cost < Decimal::ZERO {
            return Err(InventoryError::InvalidCost(self.unit_cost));
        }
        if self.source_type.trim().is_empty() || self.source_id.trim().is_empty() {
            return Err(InventoryError::InvalidSource);
        }
        let total_cost = self
            .quantity
            .checked_mul(self.unit_cost)
            .ok_or(InventoryError::QuantityOverflow)?;

        Ok(InventoryTransaction {
            id: TransactionId::new(),
            item_id: self.item_id,
            key: self.key,
            transaction_type: self.transaction_type,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            total_cost,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            source_type: self.source_type,
            source_id: self.source_id,
            source_line_id: self.source_line_id,
            batch_id: self.batch_id,
            lock_id: self.lock_id,
            reference: self.reference,
            reason: self.reason,
            cost_method: self.cost_method,
            transaction_date: self.transaction_date,
        })
    }
}

/// Derives one transaction per stock movement in `events`.
///
/// `opening_balance` and `opening_cost` are the item's available quantity and
/// unit cost before the first event; pass zero for a full history. Cost and
/// threshold events and batch draws are not movements and yield nothing, nor
/// does a recount that changed nothing.
pub fn transactions_from_events(
    events: &[InventoryEvent],
    opening_balance: Decimal,
    opening_cost: Decimal,
) -> Result<Vec<InventoryTransaction>, InventoryError> {
    let mut transactions = Vec::new();
    let mut balance = opening_balance;
    let mut cost = opening_cost;
    let mut expiring: Option<LockId> = None;

    for event in events {
        let transaction = match event {
            InventoryEvent::StockIncreased(data) => {
                let after = balance
                    .checked_add(data.quantity)
                    .ok_or(InventoryError::QuantityOverflow)?;
                let source_id = data.batch.as_ref().map_or_else(
                    || data.item_id.to_string(),
                    |batch| batch.batch_number().to_string(),
                );
                let mut builder = InventoryTransaction::builder(
                    data.item_id,
                    data.key,
                    TransactionType::Inbound,
                    data.quantity,
                    data.unit_cost,
                )
                .balances(balance, after)
                .source(STOCK_RECEIPT, source_id)
                .with_cost_method(MOVING_AVERAGE)
                .at(data.occurred_at);
                if let Some(batch) = &data.batch {
                    builder = builder.with_batch(batch.id());
                }
                balance = after;
                builder.build()?
            }
            InventoryEvent::InventoryCostChanged(data) => {
                cost = data.new_cost;
                continue;
            }
            InventoryEvent::StockLocked(data) => {
                let after = balance - data.quantity;
                let transaction = InventoryTransaction::builder(
                    data.item_id,
                    data.key,
                    TransactionType::Lock,
                    data.quantity,
                    cost,
                )
                .balances(balance, after)
                .source(&data.source_type, &data.source_id)
                .with_lock(data.lock_id)
                .at(data.occurred_at)
                .build()?;
                balance = after;
                transaction
            }
            InventoryEvent::StockLockExpired(data) => {
                expiring = Some(data.lock_id);
                continue;
            }
            InventoryEvent::StockUnlocked(data) => {
                let after = balance
                    .checked_add(data.quantity)
                    .ok_or(InventoryError::QuantityOverflow)?;
                let mut builder = InventoryTransaction::builder(
                    data.item_id,
                    data.key,
                    TransactionType::Unlock,
                    data.quantity,
                    cost,
                )
                .balances(balance, after)
                .source(&data.source_type, &data.source_id)
                .with_lock(data.lock_id)
                .at(data.occurred_at);
                if expiring.take() == Some(data.lock_id) {
                    builder = builder.with_reason("lock expired");
                }
                balance = after;
                builder.build()?
            }
            InventoryEvent::StockDeducted(data) => InventoryTransaction::builder(
                data.item_id,
                data.key,
                TransactionType::Outbound,
                data.quantity,
                data.unit_cost,
            )
            .balances(balance, balance)
            .source(&data.source_type, &data.source_id)
            .with_lock(data.lock_id)
            .with_cost_method(MOVING_AVERAGE)
            .at(data.occurred_at)
            .build()?,
            InventoryEvent::StockDecreased(data) => {
                let after = balance - data.quantity;
                let mut builder = InventoryTransaction::builder(
                    data.item_id,
                    data.key,
                    TransactionType::Outbound,
                    data.quantity,
                    data.unit_cost,
                )
                .balances(balance, after)
                .source(&data.source_type, &data.source_id)
                .with_cost_method(MOVING_AVERAGE)
                .at(data.occurred_at);
                if !data.reason.trim().is_empty() {
                    builder = builder.with_reason(&data.reason);
                }
                balance = after;
                builder.build()?
            }
            InventoryEvent::StockAdjusted(data) => {
                balance = data.new_quantity;
                if data.difference.is_zero() {
                    continue;
                }
                let kind = if data.difference > Decimal::ZERO {
                    TransactionType::AdjustmentIncrease
                } else {
                    TransactionType::AdjustmentDecrease
                };
                InventoryTransaction::builder(
                    data.item_id,
                    data.key,
                    kind,
                    data.difference.abs(),
                    cost,
                )
                .balances(data.old_quantity, data.new_quantity)
                .source(MANUAL_ADJUSTMENT, data.item_id.to_string())
                .with_reason(&data.reason)
                .at(data.occurred_at)
                .build()?
            }
            InventoryEvent::StockBelowThreshold(_)
            | InventoryEvent::StockThresholdsChanged(_)
            | InventoryEvent::BatchesConsumed(_) => continue,
        };
        transactions.push(transaction);
    }
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::inventory::{BatchInfo, InventoryItem};
    use chrono::{Duration, TimeZone};
    use common::{ProductId, WarehouseId};
    use rust_decimal_macros::dec;

    fn key() -> InventoryKey {
        InventoryKey::new(WarehouseId::new(), ProductId::new())
    }

    fn receipt(quantity: Decimal, unit_cost: Decimal) -> TransactionBuilder {
        InventoryTransaction::builder(
            AggregateId::new(),
            key(),
            TransactionType::Inbound,
            quantity,
            unit_cost,
        )
        .source("PURCHASE_ORDER", "PO-1")
    }

    #[test]
    fn test_type_directions() {
        let increases: Vec<_> = TransactionType::all()
            .into_iter()
            .filter(TransactionType::is_increase)
            .map(|t| t.as_str())
            .collect();
        assert_eq!(
            increases,
            vec!["INBOUND", "ADJUSTMENT_INCREASE", "TRANSFER_IN", "RETURN", "UNLOCK"]
        );
        assert!(TransactionType::Lock.is_decrease());
        assert!(TransactionType::TransferOut.is_decrease());
        assert_eq!(
            serde_json::to_string(&TransactionType::AdjustmentDecrease).unwrap(),
            "\"ADJUSTMENT_DECREASE\""
        );
    }

    #[test]
    fn test_build_computes_total_and_sign() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let lock_id = LockId::new();
        let tx = InventoryTransaction::builder(
            AggregateId::new(),
            key(),
            TransactionType::Outbound,
            dec!(4),
            dec!(2.5),
        )
        .balances(dec!(10), dec!(6))
        .source("SALES_ORDER", "SO-1")
        .with_source_line("SO-1-1")
        .with_lock(lock_id)
        .with_reference("SHIP-7")
        .with_cost_method(MOVING_AVERAGE)
        .at(date)
        .build()
        .unwrap();

        assert_eq!(tx.total_cost(), dec!(10));
        assert_eq!(tx.signed_quantity(), dec!(-4));
        assert_eq!(tx.signed_total_cost(), dec!(-10));
        assert_eq!(tx.quantity_change(), dec!(-4));
        assert!(tx.is_outbound());
        assert!(!tx.is_inbound());
        assert_eq!(tx.lock_id(), Some(lock_id));
        assert_eq!(tx.source_line_id(), Some("SO-1-1"));
        assert_eq!(tx.reference(), Some("SHIP-7"));
        assert_eq!(tx.transaction_date(), date);
    }

    #[test]
    fn test_build_validation_order() {
        let nil_item = InventoryTransaction::builder(
            AggregateId::nil(),
            InventoryKey::new(WarehouseId::nil(), ProductId::new()),
            TransactionType::Inbound,
            dec!(0),
            dec!(1),
        );
        assert_eq!(nil_item.build(), Err(InventoryError::InvalidItem));

        let nil_warehouse = InventoryTransaction::builder(
            AggregateId::new(),
            InventoryKey::new(WarehouseId::nil(), ProductId::nil()),
            TransactionType::Inbound,
            dec!(1),
            dec!(1),
        );
        assert_eq!(nil_warehouse.build(), Err(InventoryError::InvalidWarehouse));

        assert_eq!(
            receipt(dec!(0), dec!(-1)).build(),
            Err(InventoryError::InvalidQuantity(dec!(0)))
        );
        assert_eq!(
            receipt(dec!(1), dec!(-1)).build(),
            Err(InventoryError::InvalidCost(dec!(-1)))
        );
        assert_eq!(
            receipt(dec!(1), dec!(1)).source("PURCHASE_ORDER", " ").build(),
            Err(InventoryError::InvalidSource)
        );
        assert_eq!(
            receipt(dec!(2), Decimal::MAX).build(),
            Err(InventoryError::QuantityOverflow)
        );
    }

    #[test]
    fn test_history_of_an_item() {
        let mut item = InventoryItem::new(WarehouseId::new(), ProductId::new()).unwrap();
        let in_an_hour = Utc::now() + Duration::hours(1);

        item.increase_stock(dec!(10), dec!(2), Some(BatchInfo::new("LOT-1")))
            .unwrap();
        let shipped = item.lock_stock(dec!(4), "SALES_ORDER", "SO-1", in_an_hour).unwrap();
        let cancelled = item.lock_stock(dec!(1), "SALES_ORDER", "SO-2", in_an_hour).unwrap();
        item.unlock_stock(cancelled.id()).unwrap();
        item.deduct_stock(shipped.id()).unwrap();
        item.decrease_stock(dec!(2), "SCRAP", "SC-1", "broken").unwrap();
        item.adjust_stock(dec!(5), "cycle count").unwrap();
        item.adjust_stock(dec!(5), "recount").unwrap();

        let events = item.take_events();
        let history = transactions_from_events(&events, Decimal::ZERO, Decimal::ZERO).unwrap();

        let kinds: Vec<_> = history.iter().map(|tx| tx.transaction_type()).collect();
        assert_eq!(
            kinds,
            vec![
                TransactionType::Inbound,
                TransactionType::Lock,
                TransactionType::Lock,
                TransactionType::Unlock,
                TransactionType::Outbound,
                TransactionType::Outbound,
                TransactionType::AdjustmentIncrease,
            ]
        );

        let inbound = &history[0];
        assert_eq!(inbound.source_id(), "LOT-1");
        assert_eq!(inbound.batch_id(), Some(item.batches()[0].id()));
        assert_eq!(inbound.total_cost(), dec!(20));

        // Shipping locked stock leaves the available balance alone.
        assert_eq!(history[4].lock_id(), Some(shipped.id()));
        assert_eq!(history[4].quantity_change(), Decimal::ZERO);

        assert_eq!(history[5].reason(), Some("broken"));
        assert_eq!(history[5].quantity_change(), dec!(-2));
        assert_eq!(history[6].quantity(), dec!(1));
        assert_eq!(history[6].source_type(), MANUAL_ADJUSTMENT);

        for pair in history.windows(2) {
            assert_eq!(pair[0].balance_after(), pair[1].balance_before());
        }
        let last = history.last().unwrap();
        assert_eq!(last.balance_after(), item.available_quantity());
        let moved: Decimal = history
            .iter()
            .filter(|tx| !tx.quantity_change().is_zero())
            .map(InventoryTransaction::signed_quantity)
            .sum();
        assert_eq!(moved, item.available_quantity());
    }

    #[test]
    fn test_expired_lock_is_marked() {
        let mut item = InventoryItem::new(WarehouseId::new(), ProductId::new()).unwrap();
        item.increase_stock(dec!(5), dec!(1), None).unwrap();
        let reference = Utc::now() + Duration::hours(2);
        item.lock_stock(dec!(3), "SALES_ORDER", "SO-1", reference - Duration::minutes(1))
            .unwrap();
        item.release_expired_locks_at(reference);

        let events = item.take_events();
        let history = transactions_from_events(&events, Decimal::ZERO, Decimal::ZERO).unwrap();

        let unlock = history.last().unwrap();
        assert_eq!(unlock.transaction_type(), TransactionType::Unlock);
        assert_eq!(unlock.reason(), Some("lock expired"));
        assert_eq!(unlock.unit_cost(), dec!(1));
        assert_eq!(unlock.balance_after(), dec!(5));
        assert_eq!(item.version().as_i64(), 3);
    }
}
