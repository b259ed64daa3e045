//! Coordinator that runs allocations against a repository.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{Clock, LockId, SystemClock, Version};
use domain::{Aggregate, InventoryItem, InventoryKey};
use store::{InventoryRepository, StoreError};

use crate::{
    AllocationError, AllocationPreview, AllocationRequest, AllocationResult, AllocationState,
    CompensationResult, ReleaseResult, Result, StockAllocationService,
};

/// A save that stopped part-way.
struct SaveFailure {
    /// Positions of the items saved before the failing one.
    saved: Vec<usize>,
    source: StoreError,
}

/// Loads the items an operation names, runs it through the allocation
/// service and saves every item it changed.
///
/// Items are saved with the version they were loaded at, so a concurrent
/// writer surfaces as a concurrency conflict. Saves are per item. When an
/// allocation fails to save part-way, the locks it already saved are
/// released and saved again before the error is returned.
pub struct AllocationCoordinator<R, C = SystemClock>
where
    R: InventoryRepository,
{
    repository: R,
    service: StockAllocationService<C>,
}

impl<R, C> AllocationCoordinator<R, C>
where
    R: InventoryRepository,
    C: Clock,
{
    pub fn new(repository: R, service: StockAllocationService<C>) -> Self {
        Self {
            repository,
            service,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn service(&self) -> &StockAllocationService<C> {
        &self.service
    }

    /// Locks every line of `request` and persists the outcome.
    ///
    /// A line naming an item the repository does not know is rejected as
    /// unknown, the same as with an in-memory call.
    #[tracing::instrument(
        skip(self, request),
        fields(source_type = %request.source_type, source_id = %request.source_id)
    )]
    pub async fn allocate(&self, request: &AllocationRequest) -> Result<AllocationResult> {
        metrics::counter!("allocation_requests_total").increment(1);
        let start = Instant::now();

        let (mut items, loaded) = self
            .load_items(request.lines.iter().map(|line| line.key))
            .await?;
        let result = self.service.allocate_stock(&mut items, request)?;
        if let Err(failure) = self.save_changed(&mut items, &loaded).await {
            return Err(self.roll_back(&mut items, &result, failure).await);
        }

        match result.state {
            AllocationState::Completed => metrics::counter!("allocation_completed").increment(1),
            AllocationState::Compensated => {
                metrics::counter!("allocation_compensated").increment(1)
            }
            AllocationState::Failed => metrics::counter!("allocation_failed").increment(1),
            AllocationState::Pending => {}
        }
        let duration = start.elapsed().as_secs_f64();
        metrics::histogram!("allocation_duration_seconds").record(duration);

        tracing::info!(
            correlation_id = %result.correlation_id,
            state = %result.state,
            duration,
            "allocation finished"
        );
        Ok(result)
    }

    /// Reports availability for `request` without changing anything.
    pub async fn preview(&self, request: &AllocationRequest) -> Result<AllocationPreview> {
        let (items, _) = self
            .load_items(request.lines.iter().map(|line| line.key))
            .await?;
        self.service.preview_allocation(&items, request)
    }

    /// Releases the locks a source document holds on the given items.
    ///
    /// Keys the repository does not know are skipped.
    #[tracing::instrument(skip(self, keys), fields(keys = keys.len()))]
    pub async fn release(
        &self,
        keys: &[InventoryKey],
        source_type: &str,
        source_id: &str,
    ) -> Result<ReleaseResult> {
        let (mut items, loaded) = self.load_items(keys.iter().copied()).await?;
        let result = self
            .service
            .release_allocation(&mut items, source_type, source_id)?;
        self.save_changed(&mut items, &loaded)
            .await
            .map_err(|failure| failure.source)?;

        metrics::counter!("allocation_released").increment(1);
        Ok(result)
    }

    /// Releases every lock on the given items that expired strictly before
    /// `reference`. Returns how many locks were released.
    #[tracing::instrument(skip(self, keys), fields(keys = keys.len()))]
    pub async fn sweep_expired_locks(
        &self,
        keys: &[InventoryKey],
        reference: DateTime<Utc>,
    ) -> Result<usize> {
        let (mut items, loaded) = self.load_items(keys.iter().copied()).await?;

        let released: usize = items
            .iter_mut()
            .map(|item| item.release_expired_locks_at(reference))
            .sum();
        self.save_changed(&mut items, &loaded)
            .await
            .map_err(|failure| failure.source)?;

        if released > 0 {
            metrics::counter!("expired_locks_released_total").increment(released as u64);
            tracing::info!(released, %reference, "expired locks released");
        }
        Ok(released)
    }

    /// Sweeps expired locks as of the service clock's current instant.
    pub async fn sweep_expired_locks_now(&self, keys: &[InventoryKey]) -> Result<usize> {
        let reference = self.service.clock().now();
        self.sweep_expired_locks(keys, reference).await
    }

    /// Loads each distinct key once, in first-seen order, skipping unknown
    /// keys. Returns the items alongside the versions they were loaded at.
    async fn load_items(
        &self,
        keys: impl Iterator<Item = InventoryKey>,
    ) -> Result<(Vec<InventoryItem>, Vec<Version>)> {
        let mut items: Vec<InventoryItem> = Vec::new();
        for key in keys {
            if items.iter().any(|item| item.key() == key) {
                continue;
            }
            if let Some(item) = self.repository.find(key).await? {
                items.push(item);
            }
        }
        let versions = items.iter().map(|item| item.version()).collect();
        Ok((items, versions))
    }

    async fn save_changed(
        &self,
        items: &mut [InventoryItem],
        loaded: &[Version],
    ) -> std::result::Result<(), SaveFailure> {
        let mut saved = Vec::new();
        for (position, (item, &version)) in items.iter_mut().zip(loaded).enumerate() {
            if item.version() == version {
                continue;
            }
            if let Err(source) = self.repository.save(item, version).await {
                tracing::warn!(
                    key = %item.key(),
                    error = %source,
                    "failed to save inventory item"
                );
                return Err(SaveFailure { saved, source });
            }
            saved.push(position);
        }
        Ok(())
    }

    /// Releases the locks `result` still holds on items that were saved
    /// before `failure`, and saves those items again.
    async fn roll_back(
        &self,
        items: &mut [InventoryItem],
        result: &AllocationResult,
        failure: SaveFailure,
    ) -> AllocationError {
        let SaveFailure { saved, source } = failure;
        if saved.is_empty() {
            return AllocationError::Store(source);
        }

        let mut rolled_back = Vec::new();
        for position in saved {
            let item = &mut items[position];
            let held: Vec<LockId> = result
                .successful_lines()
                .filter(|line| line.key == item.key())
                .filter_map(|line| line.lock_id)
                .filter(|&lock_id| item.find_lock(lock_id).is_some_and(|lock| lock.is_active()))
                .collect();
            if held.is_empty() {
                continue;
            }

            let version = item.version();
            let first = rolled_back.len();
            for lock_id in held {
                let outcome = item.unlock_stock(lock_id);
                rolled_back.push(CompensationResult {
                    item_id: item.id(),
                    key: item.key(),
                    lock_id,
                    success: outcome.is_ok(),
                    error_message: outcome.as_ref().err().map(ToString::to_string),
                    error: outcome.err(),
                });
            }

            if let Err(error) = self.repository.save(item, version).await {
                tracing::error!(key = %item.key(), %error, "failed to roll back saved locks");
                for compensation in &mut rolled_back[first..] {
                    compensation.success = false;
                    compensation.error_message = Some(error.to_string());
                }
            }
        }

        metrics::counter!("allocation_rollbacks_total").increment(1);
        tracing::warn!(
            correlation_id = %result.correlation_id,
            rolled_back = rolled_back.len(),
            error = %source,
            "allocation not persisted, saved locks released"
        );
        AllocationError::NotPersisted {
            correlation_id: result.correlation_id,
            rolled_back,
            source,
        }
    }
}
