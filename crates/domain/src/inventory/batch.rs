//! Stock batches: cost- and expiry-tagged sub-pools of an inventory item.

use chrono::{DateTime, Utc};
use common::BatchId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Batch metadata supplied with a stock receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Human-facing batch or lot number.
    pub batch_number: String,

    /// When the goods were produced.
    pub production_date: Option<DateTime<Utc>>,

    /// When the goods expire.
    pub expiry_date: Option<DateTime<Utc>>,
}

impl BatchInfo {
    /// Creates batch metadata with no dates.
    pub fn new(batch_number: impl Into<String>) -> Self {
        Self {
            batch_number: batch_number.into(),
            production_date: None,
            expiry_date: None,
        }
    }

    /// Sets the production date.
    pub fn produced_on(mut self, date: DateTime<Utc>) -> Self {
        self.production_date = Some(date);
        self
    }

    /// Sets the expiry date.
    pub fn expires_on(mut self, date: DateTime<Utc>) -> Self {
        self.expiry_date = Some(date);
        self
    }
}

/// A quantity of one product received together, with its own cost and dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    id: BatchId,
    batch_number: String,
    production_date: Option<DateTime<Utc>>,
    expiry_date: Option<DateTime<Utc>>,
    quantity: Decimal,
    unit_cost: Decimal,
    consumed: bool,
    created_at: DateTime<Utc>,
}

impl Batch {
    /// Creates a batch from receipt metadata.
    pub fn new(
        info: BatchInfo,
        quantity: Decimal,
        unit_cost: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::with_id(BatchId::new(), info, quantity, unit_cost, created_at)
    }

    /// Creates a batch with a known identifier.
    pub fn with_id(
        id: BatchId,
        info: BatchInfo,
        quantity: Decimal,
        unit_cost: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            batch_number: info.batch_number,
            production_date: info.production_date,
            expiry_date: info.expiry_date,
            consumed: quantity.is_zero(),
            quantity,
            unit_cost,
            created_at,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn batch_number(&self) -> &str {
        &self.batch_number
    }

    pub fn production_date(&self) -> Option<DateTime<Utc>> {
        self.production_date
    }

    pub fn expiry_date(&self) -> Option<DateTime<Utc>> {
        self.expiry_date
    }

    /// Remaining quantity in the batch.
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true if the batch has an expiry date at or before `reference`.
    pub fn is_expired_at(&self, reference: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= reference)
    }

    /// Returns true if the batch can still be shipped at `reference`.
    pub fn is_available_at(&self, reference: DateTime<Utc>) -> bool {
        self.quantity > Decimal::ZERO && !self.consumed && !self.is_expired_at(reference)
    }

    /// Returns true if the batch can still be shipped now.
    pub fn is_available(&self) -> bool {
        self.is_available_at(Utc::now())
    }

    /// Takes up to `amount` from the batch and returns what was actually taken.
    pub fn deduct(&mut self, amount: Decimal) -> Decimal {
        let taken = amount.max(Decimal::ZERO).min(self.quantity);
        self.quantity -= taken;
        if self.quantity.is_zero() {
            self.consumed = true;
        }
        taken
    }

    /// Returns stock to the batch.
    pub fn add(&mut self, amount: Decimal) {
        self.quantity += amount;
        if self.quantity > Decimal::ZERO {
            self.consumed = false;
        }
    }
}
