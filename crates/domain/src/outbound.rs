//! Outbound batch selection.
//!
//! A strategy decides which batches, and how much of each, satisfy an outbound
//! quantity. Selection is side-effect free: the returned
//! [`BatchOutboundResult`] is applied in a separate step through
//! [`apply_batch_deductions`] or
//! [`InventoryItem::consume_batches`](crate::InventoryItem::consume_batches).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use common::BatchId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::inventory::{Batch, InventoryError, round_cost};

/// Caller-chosen draw from a specific batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeductionRequest {
    pub batch_id: BatchId,

    /// Quantity to take. Zero or negative takes whatever is still needed.
    pub quantity: Decimal,
}

impl BatchDeductionRequest {
    pub fn new(batch_id: BatchId, quantity: Decimal) -> Self {
        Self { batch_id, quantity }
    }

    /// Takes as much of the batch as the request still needs.
    pub fn all_of(batch_id: BatchId) -> Self {
        Self::new(batch_id, Decimal::ZERO)
    }
}

/// One planned draw from one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDeduction {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub deducted_quantity: Decimal,
    pub unit_cost: Decimal,

    /// `deducted_quantity * unit_cost`.
    pub total_cost: Decimal,

    /// What the batch holds after this draw.
    pub remaining_in_batch: Decimal,

    pub fully_consumed: bool,
}

/// Outcome of a batch selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutboundResult {
    pub requested_quantity: Decimal,
    pub deductions: Vec<BatchDeduction>,
    pub total_deducted: Decimal,
    pub total_cost: Decimal,

    /// `total_cost / total_deducted` rounded to four places, zero when nothing was drawn.
    pub weighted_average_cost: Decimal,

    /// Quantity the batches could not cover.
    pub remaining_quantity: Decimal,

    pub fully_fulfilled: bool,

    /// Batches emptied by the selection.
    pub batches_consumed: Vec<BatchId>,

    /// Batches drawn from but not emptied.
    pub batches_partial: Vec<BatchId>,
}

impl BatchOutboundResult {
    /// Returns true if the selection drew nothing.
    pub fn is_empty(&self) -> bool {
        self.deductions.is_empty()
    }
}

/// Accumulates greedy draws into a [`BatchOutboundResult`].
struct DeductionPlan {
    requested: Decimal,
    remaining: Decimal,
    deductions: Vec<BatchDeduction>,
    total_cost: Decimal,
    batches_consumed: Vec<BatchId>,
    batches_partial: Vec<BatchId>,
}

impl DeductionPlan {
    fn new(requested: Decimal) -> Self {
        Self {
            requested,
            remaining: requested,
            deductions: Vec::new(),
            total_cost: Decimal::ZERO,
            batches_consumed: Vec::new(),
            batches_partial: Vec::new(),
        }
    }

    fn is_satisfied(&self) -> bool {
        self.remaining <= Decimal::ZERO
    }

    /// Records a draw of `amount` from `batch`, which currently holds `on_hand`.
    ///
    /// Every draw lands in `batches_consumed` or `batches_partial`, so a batch
    /// drawn twice is listed twice.
    fn take(
        &mut self,
        batch: &Batch,
        amount: Decimal,
        on_hand: Decimal,
    ) -> Result<(), InventoryError> {
        let remaining_in_batch = on_hand - amount;
        let fully_consumed = remaining_in_batch.is_zero();
        let line_cost = amount
            .checked_mul(batch.unit_cost())
            .ok_or(InventoryError::QuantityOverflow)?;
        let total_cost = self
            .total_cost
            .checked_add(line_cost)
            .ok_or(InventoryError::QuantityOverflow)?;

        self.deductions.push(BatchDeduction {
            batch_id: batch.id(),
            batch_number: batch.batch_number().to_string(),
            deducted_quantity: amount,
            unit_cost: batch.unit_cost(),
            total_cost: line_cost,
            remaining_in_batch,
            fully_consumed,
        });
        self.total_cost = total_cost;
        self.remaining -= amount;

        if fully_consumed {
            self.batches_consumed.push(batch.id());
        } else {
            self.batches_partial.push(batch.id());
        }
        Ok(())
    }

    fn finish(self) -> BatchOutboundResult {
        let total_deducted: Decimal = self.deductions.iter().map(|d| d.deducted_quantity).sum();
        let weighted_average_cost = if total_deducted > Decimal::ZERO {
            round_cost(self.total_cost / total_deducted)
        } else {
            Decimal::ZERO
        };

        BatchOutboundResult {
            requested_quantity: self.requested,
            deductions: self.deductions,
            total_deducted,
            total_cost: self.total_cost,
            weighted_average_cost,
            remaining_quantity: self.remaining,
            fully_fulfilled: self.remaining.is_zero(),
            batches_consumed: self.batches_consumed,
            batches_partial: self.batches_partial,
        }
    }
}

/// Name of a batch selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchOutboundStrategyType {
    /// First in, first out by production date.
    #[default]
    Fifo,

    /// First expired, first out.
    Fefo,

    /// Caller names the batches.
    Specified,
}

impl BatchOutboundStrategyType {
    pub fn all() -> [BatchOutboundStrategyType; 3] {
        [Self::Fifo, Self::Fefo, Self::Specified]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOutboundStrategyType::Fifo => "FIFO",
            BatchOutboundStrategyType::Fefo => "FEFO",
            BatchOutboundStrategyType::Specified => "SPECIFIED",
        }
    }
}

impl std::fmt::Display for BatchOutboundStrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown batch outbound strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for BatchOutboundStrategyType {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Self::Fifo),
            "FEFO" => Ok(Self::Fefo),
            "SPECIFIED" => Ok(Self::Specified),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// How to pick batches for an outbound quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BatchOutboundStrategy {
    #[default]
    Fifo,
    Fefo,
    Specified(Vec<BatchDeductionRequest>),
}

impl BatchOutboundStrategy {
    /// Builds a strategy from its name.
    ///
    /// `requests` is only read for [`BatchOutboundStrategyType::Specified`],
    /// which needs at least one.
    pub fn from_type(
        kind: BatchOutboundStrategyType,
        requests: Vec<BatchDeductionRequest>,
    ) -> Result<Self, InventoryError> {
        match kind {
            BatchOutboundStrategyType::Fifo => Ok(Self::Fifo),
            BatchOutboundStrategyType::Fefo => Ok(Self::Fefo),
            BatchOutboundStrategyType::Specified if requests.is_empty() => {
                Err(InventoryError::NoBatchRequests)
            }
            BatchOutboundStrategyType::Specified => Ok(Self::Specified(requests)),
        }
    }

    pub fn strategy_type(&self) -> BatchOutboundStrategyType {
        match self {
            BatchOutboundStrategy::Fifo => BatchOutboundStrategyType::Fifo,
            BatchOutboundStrategy::Fefo => BatchOutboundStrategyType::Fefo,
            BatchOutboundStrategy::Specified(_) => BatchOutboundStrategyType::Specified,
        }
    }

    /// Selects batches, judging availability as of now.
    pub fn select_batches(
        &self,
        requested: Decimal,
        batches: &[Batch],
    ) -> Result<BatchOutboundResult, InventoryError> {
        self.select_batches_at(requested, batches, Utc::now())
    }

    /// Selects batches covering `requested`, judging availability at `reference`.
    ///
    /// A result that is not fully fulfilled is still `Ok`; the shortfall is in
    /// `remaining_quantity`.
    pub fn select_batches_at(
        &self,
        requested: Decimal,
        batches: &[Batch],
        reference: DateTime<Utc>,
    ) -> Result<BatchOutboundResult, InventoryError> {
        if requested <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(requested));
        }

        let mut candidates: Vec<&Batch> = batches
            .iter()
            .filter(|batch| batch.is_available_at(reference))
            .collect();

        match self {
            BatchOutboundStrategy::Fifo => {
                candidates.sort_by(|a, b| fifo_order(a, b));
                take_greedily(requested, &candidates)
            }
            BatchOutboundStrategy::Fefo => {
                candidates.sort_by(|a, b| fefo_order(a, b));
                take_greedily(requested, &candidates)
            }
            BatchOutboundStrategy::Specified(requests) => {
                if requests.is_empty() {
                    return Err(InventoryError::NoBatchRequests);
                }
                take_specified(requested, &candidates, requests)
            }
        }
    }
}

/// Orders dated entries before undated ones.
fn dated_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn fifo_order(a: &Batch, b: &Batch) -> Ordering {
    dated_first(a.production_date(), b.production_date())
        .then_with(|| a.created_at().cmp(&b.created_at()))
}

fn fefo_order(a: &Batch, b: &Batch) -> Ordering {
    dated_first(a.expiry_date(), b.expiry_date()).then_with(|| fifo_order(a, b))
}

fn take_greedily(
    requested: Decimal,
    ordered: &[&Batch],
) -> Result<BatchOutboundResult, InventoryError> {
    let mut plan = DeductionPlan::new(requested);
    for batch in ordered {
        if plan.is_satisfied() {
            break;
        }
        let amount = plan.remaining.min(batch.quantity());
        if amount > Decimal::ZERO {
            plan.take(batch, amount, batch.quantity())?;
        }
    }
    Ok(plan.finish())
}

fn take_specified(
    requested: Decimal,
    candidates: &[&Batch],
    requests: &[BatchDeductionRequest],
) -> Result<BatchOutboundResult, InventoryError> {
    let by_id: HashMap<BatchId, &Batch> = candidates.iter().map(|b| (b.id(), *b)).collect();
    let mut on_hand: HashMap<BatchId, Decimal> =
        candidates.iter().map(|b| (b.id(), b.quantity())).collect();

    let mut plan = DeductionPlan::new(requested);
    for request in requests {
        if plan.is_satisfied() {
            break;
        }
        let (Some(batch), Some(left)) = (
            by_id.get(&request.batch_id),
            on_hand.get_mut(&request.batch_id),
        ) else {
            continue;
        };
        if *left <= Decimal::ZERO {
            continue;
        }

        let wanted = if request.quantity <= Decimal::ZERO {
            plan.remaining
        } else {
            request.quantity.min(plan.remaining)
        };
        let amount = wanted.min(*left);
        if amount <= Decimal::ZERO {
            continue;
        }

        plan.take(batch, amount, *left)?;
        *left -= amount;
    }
    Ok(plan.finish())
}

/// Checks every deduction in `result` against the batches it names.
///
/// Deductions are replayed in order, so a batch named twice must hold the sum
/// of both draws. Their quantity and cost totals must be representable.
pub(crate) fn verify_deductions(
    batches: &[Batch],
    result: &BatchOutboundResult,
) -> Result<(), InventoryError> {
    let mut on_hand: HashMap<BatchId, Decimal> =
        batches.iter().map(|b| (b.id(), b.quantity())).collect();
    let (mut quantity, mut cost) = (Decimal::ZERO, Decimal::ZERO);

    for deduction in &result.deductions {
        quantity = quantity
            .checked_add(deduction.deducted_quantity)
            .ok_or(InventoryError::QuantityOverflow)?;
        cost = cost
            .checked_add(deduction.total_cost)
            .ok_or(InventoryError::QuantityOverflow)?;
        let left = on_hand
            .get_mut(&deduction.batch_id)
            .ok_or(InventoryError::BatchNotFound(deduction.batch_id))?;
        if *left < deduction.deducted_quantity {
            return Err(InventoryError::DeductionMismatch {
                batch_id: deduction.batch_id,
                expected: deduction.deducted_quantity,
                actual: *left,
            });
        }
        *left -= deduction.deducted_quantity;
    }
    Ok(())
}

/// Applies a selection to the batches it was computed from.
///
/// Nothing is changed unless every deduction can be applied in full.
pub fn apply_batch_deductions(
    batches: &mut [Batch],
    result: &BatchOutboundResult,
) -> Result<(), InventoryError> {
    verify_deductions(batches, result)?;
    for deduction in &result.deductions {
        if let Some(batch) = batches.iter_mut().find(|b| b.id() == deduction.batch_id) {
            batch.deduct(deduction.deducted_quantity);
        }
    }
    Ok(())
}

/// Returns whether the batches available at `reference` cover `requested`,
/// together with their total. The total saturates at `Decimal::MAX`.
pub fn validate_batch_availability_at(
    batches: &[Batch],
    requested: Decimal,
    reference: DateTime<Utc>,
) -> (bool, Decimal) {
    let total = batches
        .iter()
        .filter(|batch| batch.is_available_at(reference))
        .map(Batch::quantity)
        .fold(Decimal::ZERO, Decimal::saturating_add);
    (total >= requested, total)
}

/// Returns available batches expiring before `reference + window`.
///
/// A window reaching past the representable range covers every dated batch.
pub fn batches_expiring_within(
    batches: &[Batch],
    window: Duration,
    reference: DateTime<Utc>,
) -> Vec<&Batch> {
    let deadline = reference.checked_add_signed(window);
    batches
        .iter()
        .filter(|batch| batch.is_available_at(reference))
        .filter(|batch| {
            batch
                .expiry_date()
                .is_some_and(|expiry| deadline.is_none_or(|deadline| expiry < deadline))
        })
        .collect()
}
