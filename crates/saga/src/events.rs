//! Allocation outcome events.

use chrono::{DateTime, Utc};
use common::CorrelationId;
use domain::DomainEvent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AllocationLineResult, CompensationResult, ReleaseLineResult};

/// Events published when a multi-line allocation or release finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AllocationEvent {
    /// Every line was locked.
    StockAllocationCompleted(AllocationCompletedData),

    /// Some lines were locked and some failed.
    StockAllocationPartial(AllocationPartialData),

    /// Locks from a partial allocation were rolled back.
    StockAllocationCompensated(AllocationCompensatedData),

    /// No line could be locked.
    StockAllocationFailed(AllocationFailedData),

    /// A source document's locks were released.
    StockAllocationReleased(AllocationReleasedData),
}

impl AllocationEvent {
    /// Returns the correlation ID shared by all events of one operation.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            AllocationEvent::StockAllocationCompleted(d) => d.correlation_id,
            AllocationEvent::StockAllocationPartial(d) => d.correlation_id,
            AllocationEvent::StockAllocationCompensated(d) => d.correlation_id,
            AllocationEvent::StockAllocationFailed(d) => d.correlation_id,
            AllocationEvent::StockAllocationReleased(d) => d.correlation_id,
        }
    }
}

impl DomainEvent for AllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationEvent::StockAllocationCompleted(_) => "StockAllocationCompleted",
            AllocationEvent::StockAllocationPartial(_) => "StockAllocationPartial",
            AllocationEvent::StockAllocationCompensated(_) => "StockAllocationCompensated",
            AllocationEvent::StockAllocationFailed(_) => "StockAllocationFailed",
            AllocationEvent::StockAllocationReleased(_) => "StockAllocationReleased",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AllocationEvent::StockAllocationCompleted(d) => d.occurred_at,
            AllocationEvent::StockAllocationPartial(d) => d.occurred_at,
            AllocationEvent::StockAllocationCompensated(d) => d.occurred_at,
            AllocationEvent::StockAllocationFailed(d) => d.occurred_at,
            AllocationEvent::StockAllocationReleased(d) => d.occurred_at,
        }
    }
}

/// Data for StockAllocationCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationCompletedData {
    pub correlation_id: CorrelationId,
    pub source_type: String,
    pub source_id: String,
    pub lines: Vec<AllocationLineResult>,
    pub total_quantity: Decimal,
    pub line_count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockAllocationPartial event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPartialData {
    pub correlation_id: CorrelationId,
    pub source_type: String,
    pub source_id: String,
    pub lines: Vec<AllocationLineResult>,
    pub failed_lines: Vec<usize>,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_quantity: Decimal,
    pub locked_quantity: Decimal,
    /// Requested quantity of the failed lines.
    pub pending_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockAllocationCompensated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationCompensatedData {
    pub correlation_id: CorrelationId,
    pub source_type: String,
    pub source_id: String,
    pub compensations: Vec<CompensationResult>,
    pub total_compensated: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockAllocationFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationFailedData {
    pub correlation_id: CorrelationId,
    pub source_type: String,
    pub source_id: String,
    pub lines: Vec<AllocationLineResult>,
    pub failed_lines: Vec<usize>,
    pub total_quantity: Decimal,
    pub failure_count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Data for StockAllocationReleased event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationReleasedData {
    pub correlation_id: CorrelationId,
    pub source_type: String,
    pub source_id: String,
    pub releases: Vec<ReleaseLineResult>,
    pub total_released: Decimal,
    pub release_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub occurred_at: DateTime<Utc>,
}
