//! Shared types for the stock allocation engine.

pub mod clock;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use types::{
    AggregateId, BatchId, CorrelationId, LockId, ProductId, TransactionId, Version, WarehouseId,
};
