//! Value objects for the inventory domain.

use common::{ProductId, WarehouseId};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places kept for unit costs.
pub const COST_SCALE: u32 = 4;

/// Rounds a cost to [`COST_SCALE`] decimal places, midpoints away from zero.
pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Composite identity of an inventory item: one product in one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    /// The warehouse holding the stock.
    pub warehouse_id: WarehouseId,

    /// The product being stocked.
    pub product_id: ProductId,
}

impl InventoryKey {
    /// Creates a key for the given warehouse-product pair.
    pub fn new(warehouse_id: WarehouseId, product_id: ProductId) -> Self {
        Self {
            warehouse_id,
            product_id,
        }
    }
}

impl std::fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.warehouse_id, self.product_id)
    }
}
