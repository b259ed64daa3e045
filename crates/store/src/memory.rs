use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ProductId, Version, WarehouseId};
use domain::{Aggregate, InventoryEvent, InventoryItem, InventoryKey};
use tokio::sync::RwLock;

use crate::{InventoryRepository, Result, StoreError};

#[derive(Default)]
struct State {
    items: HashMap<InventoryKey, InventoryItem>,
    events: Vec<InventoryEvent>,
}

/// In-memory inventory repository for tests and single-process use.
///
/// Saved events are appended to an in-memory log in save order.
#[derive(Clone, Default)]
pub struct InMemoryInventoryRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryInventoryRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored items.
    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }

    /// Returns the total number of published events.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Returns every published event in save order.
    pub async fn events(&self) -> Vec<InventoryEvent> {
        self.state.read().await.events.clone()
    }

    /// Returns the published events of one item.
    pub async fn events_for(&self, key: InventoryKey) -> Vec<InventoryEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.key() == key)
            .cloned()
            .collect()
    }

    /// Clears all items and events.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.items.clear();
        state.events.clear();
    }
}

#[async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn load(&self, key: InventoryKey) -> Result<InventoryItem> {
        self.find(key).await?.ok_or(StoreError::NotFound(key))
    }

    async fn find(&self, key: InventoryKey) -> Result<Option<InventoryItem>> {
        Ok(self.state.read().await.items.get(&key).cloned())
    }

    async fn save(&self, item: &mut InventoryItem, expected_version: Version) -> Result<Version> {
        let key = item.key();
        let mut state = self.state.write().await;

        let actual = state
            .items
            .get(&key)
            .map(|stored| stored.version())
            .unwrap_or(Version::initial());
        if actual != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                key,
                expected: expected_version,
                actual,
            });
        }

        let events = item.take_events();
        tracing::debug!(
            %key,
            version = %item.version(),
            events = events.len(),
            "saved inventory item"
        );
        state.events.extend(events);
        state.items.insert(key, item.clone());

        Ok(item.version())
    }

    async fn get_or_create(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<InventoryItem> {
        let key = InventoryKey::new(warehouse_id, product_id);
        let mut state = self.state.write().await;
        if let Some(item) = state.items.get(&key) {
            return Ok(item.clone());
        }

        let item = InventoryItem::from_key(key)?;
        state.items.insert(key, item.clone());
        Ok(item)
    }
}
