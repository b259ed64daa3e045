use async_trait::async_trait;
use common::{ProductId, Version, WarehouseId};
use domain::{InventoryItem, InventoryKey};

use crate::Result;

/// Persistence boundary for inventory items.
///
/// Implementations must be thread-safe. Writers guard against lost updates
/// by passing the version they loaded to [`save`](Self::save).
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    /// Loads an item, failing with `NotFound` if it does not exist.
    async fn load(&self, key: InventoryKey) -> Result<InventoryItem>;

    /// Loads an item if it exists.
    async fn find(&self, key: InventoryKey) -> Result<Option<InventoryItem>>;

    /// Stores an item and publishes its pending events.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version is not
    /// `expected_version`. On success the item's pending events are drained
    /// and its current version returned.
    async fn save(&self, item: &mut InventoryItem, expected_version: Version) -> Result<Version>;

    /// Loads the item for a warehouse-product pair, creating an empty one if
    /// none exists yet.
    async fn get_or_create(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<InventoryItem>;
}
