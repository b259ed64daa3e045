//! Domain layer for the stock allocation engine.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits
//! - The InventoryItem aggregate with its batches and stock locks
//! - Inventory transactions: a signed movement record derived from item events
//! - Outbound batch selection (FIFO, FEFO, specified batches)

pub mod aggregate;
pub mod inventory;
pub mod outbound;

pub use aggregate::{Aggregate, DomainEvent};
pub use inventory::{
    Batch, BatchInfo, InventoryError, InventoryEvent, InventoryItem, InventoryKey,
    InventoryTransaction, LockStatus, StockLock, TransactionType, transactions_from_events,
};
pub use outbound::{
    BatchDeduction, BatchDeductionRequest, BatchOutboundResult, BatchOutboundStrategy,
    BatchOutboundStrategyType, apply_batch_deductions, batches_expiring_within,
    validate_batch_availability_at,
};
