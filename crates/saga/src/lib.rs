//! Multi-line stock allocation with compensation.
//!
//! An allocation locks stock on several inventory items for one source
//! document. Either every line ends up locked, or every lock the allocation
//! took is released again:
//!
//! ```text
//! lock line 1 ─► lock line 2 ─► ... ─► all locked? ──yes──► Completed
//!                                          │
//!                                          no ─► any locked? ──yes──► release in lock order ─► Compensated
//!                                                     │
//!                                                     no ─► Failed
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod request;
pub mod result;
pub mod service;
pub mod state;

pub use config::{AllocationConfig, DEFAULT_LOCK_DURATION_SECS};
pub use coordinator::AllocationCoordinator;
pub use error::{AllocationError, Result};
pub use events::AllocationEvent;
pub use request::{AllocationLine, AllocationRequest};
pub use result::{
    AllocationLineResult, AllocationPreview, AllocationResult, CompensationResult, PreviewLine,
    ReleaseLineResult, ReleaseResult,
};
pub use service::StockAllocationService;
pub use state::AllocationState;
