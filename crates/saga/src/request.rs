//! Allocation request types.

use chrono::Duration;
use domain::{InventoryItem, InventoryKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AllocationError;

/// One line of an allocation: a quantity of one inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub key: InventoryKey,
    pub quantity: Decimal,
}

impl AllocationLine {
    pub fn new(key: InventoryKey, quantity: Decimal) -> Self {
        Self { key, quantity }
    }
}

/// A request to lock several lines for one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub lines: Vec<AllocationLine>,
    pub source_type: String,
    pub source_id: String,
    /// Overrides the service default when positive.
    pub lock_duration: Option<Duration>,
}

impl AllocationRequest {
    /// Creates an empty request for a source document.
    pub fn new(source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            lines: Vec::new(),
            source_type: source_type.into(),
            source_id: source_id.into(),
            lock_duration: None,
        }
    }

    /// Adds a line.
    pub fn line(mut self, key: InventoryKey, quantity: Decimal) -> Self {
        self.lines.push(AllocationLine::new(key, quantity));
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = Some(duration);
        self
    }

    /// Returns the sum of all requested quantities, saturating at
    /// `Decimal::MAX`.
    pub fn total_quantity(&self) -> Decimal {
        self.lines
            .iter()
            .map(|line| line.quantity)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }

    /// Returns the override duration if it is positive.
    pub fn effective_lock_duration(&self) -> Option<Duration> {
        self.lock_duration.filter(|d| *d > Duration::zero())
    }

    /// Validates the request against the supplied items and resolves each
    /// line to the position of its item in `items`.
    ///
    /// Checks run in order: non-empty lines, source type, source ID, then per
    /// line the item's presence followed by a positive quantity. Finally the
    /// requested total must be representable.
    pub fn resolve(&self, items: &[InventoryItem]) -> Result<Vec<usize>, AllocationError> {
        if self.lines.is_empty() {
            return Err(AllocationError::EmptyRequest);
        }
        if self.source_type.trim().is_empty() {
            return Err(AllocationError::MissingSourceType);
        }
        if self.source_id.trim().is_empty() {
            return Err(AllocationError::MissingSourceId);
        }

        let positions = self
            .lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let position = items
                    .iter()
                    .position(|item| item.key() == line.key)
                    .ok_or(AllocationError::UnknownItem {
                        index,
                        key: line.key,
                    })?;
                if line.quantity <= Decimal::ZERO {
                    return Err(AllocationError::InvalidLineQuantity {
                        index,
                        quantity: line.quantity,
                    });
                }
                Ok(position)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.lines
            .iter()
            .try_fold(Decimal::ZERO, |total, line| total.checked_add(line.quantity))
            .ok_or(AllocationError::QuantityOverflow)?;
        Ok(positions)
    }
}
