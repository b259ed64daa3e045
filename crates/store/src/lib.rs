//! Inventory item persistence.

pub mod error;
pub mod memory;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::InMemoryInventoryRepository;
pub use repository::InventoryRepository;
