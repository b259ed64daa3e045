//! Integration tests for allocations run through the coordinator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{FixedClock, ProductId, Version, WarehouseId};
use domain::{Aggregate, DomainEvent, InventoryItem, InventoryKey};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use saga::{
    AllocationCoordinator, AllocationError, AllocationRequest, AllocationState,
    StockAllocationService,
};
use store::{InMemoryInventoryRepository, InventoryRepository, StoreError};

type TestCoordinator = AllocationCoordinator<InMemoryInventoryRepository, FixedClock>;

/// Lets another writer update `target` right before the first save of it.
struct InterleavedWriter {
    inner: InMemoryInventoryRepository,
    target: InventoryKey,
    triggered: AtomicBool,
}

#[async_trait]
impl InventoryRepository for InterleavedWriter {
    async fn load(&self, key: InventoryKey) -> store::Result<InventoryItem> {
        self.inner.load(key).await
    }

    async fn find(&self, key: InventoryKey) -> store::Result<Option<InventoryItem>> {
        self.inner.find(key).await
    }

    async fn save(
        &self,
        item: &mut InventoryItem,
        expected_version: Version,
    ) -> store::Result<Version> {
        if item.key() == self.target && !self.triggered.swap(true, Ordering::SeqCst) {
            let mut other = self.inner.load(self.target).await?;
            let version = other.version();
            other.set_min_quantity(dec!(1))?;
            self.inner.save(&mut other, version).await?;
        }
        self.inner.save(item, expected_version).await
    }

    async fn get_or_create(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> store::Result<InventoryItem> {
        self.inner.get_or_create(warehouse_id, product_id).await
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("saga=debug,domain=debug")
        .with_test_writer()
        .try_init();
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

struct TestHarness {
    coordinator: TestCoordinator,
    repo: InMemoryInventoryRepository,
    warehouse: WarehouseId,
}

impl TestHarness {
    fn new() -> Self {
        init_tracing();
        let repo = InMemoryInventoryRepository::new();
        let service = StockAllocationService::with_clock(FixedClock::new(now()));
        Self {
            coordinator: AllocationCoordinator::new(repo.clone(), service),
            repo,
            warehouse: WarehouseId::new(),
        }
    }

    async fn stock(&self, quantity: Decimal) -> InventoryKey {
        let mut item = self
            .repo
            .get_or_create(self.warehouse, ProductId::new())
            .await
            .unwrap();
        let loaded = item.version();
        item.increase_stock(quantity, dec!(2.5), None).unwrap();
        self.repo.save(&mut item, loaded).await.unwrap();
        item.key()
    }

    async fn available(&self, key: InventoryKey) -> Decimal {
        self.repo.load(key).await.unwrap().available_quantity()
    }

    async fn locked(&self, key: InventoryKey) -> Decimal {
        self.repo.load(key).await.unwrap().locked_quantity()
    }

    async fn event_types(&self, key: InventoryKey) -> Vec<&'static str> {
        self.repo
            .events_for(key)
            .await
            .iter()
            .map(|event| event.event_type())
            .collect()
    }
}

#[tokio::test]
async fn test_complete_allocation_is_persisted() {
    let h = TestHarness::new();
    let a = h.stock(dec!(10)).await;
    let b = h.stock(dec!(6)).await;

    let request = AllocationRequest::new("SALES_ORDER", "SO-100")
        .line(a, dec!(4))
        .line(b, dec!(6));
    let result = h.coordinator.allocate(&request).await.unwrap();

    assert_eq!(result.state, AllocationState::Completed);
    assert_eq!(result.total_allocated, dec!(10));
    assert_eq!(h.available(a).await, dec!(6));
    assert_eq!(h.locked(a).await, dec!(4));
    assert_eq!(h.available(b).await, Decimal::ZERO);
    assert_eq!(h.locked(b).await, dec!(6));
    assert_eq!(h.event_types(a).await.last(), Some(&"StockLocked"));

    let stored = h.repo.load(a).await.unwrap();
    let lock = stored.active_locks().next().unwrap();
    assert_eq!(lock.source_id(), "SO-100");
    assert_eq!(lock.expire_at(), now() + Duration::minutes(30));
}

#[tokio::test]
async fn test_partial_failure_leaves_stock_untouched() {
    let h = TestHarness::new();
    let a = h.stock(dec!(10)).await;
    let b = h.stock(dec!(1)).await;
    let c = h.stock(dec!(7)).await;

    let request = AllocationRequest::new("SALES_ORDER", "SO-101")
        .line(a, dec!(5))
        .line(b, dec!(2))
        .line(c, dec!(7));
    let result = h.coordinator.allocate(&request).await.unwrap();

    assert_eq!(result.state, AllocationState::Compensated);
    assert!(result.partial_success);
    assert!(result.compensated);
    assert_eq!(result.failed_lines, vec![1]);
    assert_eq!(result.compensation_results.len(), 2);

    for (key, quantity) in [(a, dec!(10)), (b, dec!(1)), (c, dec!(7))] {
        assert_eq!(h.available(key).await, quantity);
        assert_eq!(h.locked(key).await, Decimal::ZERO);
    }

    // The lock and its rollback both stay on the record.
    assert_eq!(
        &h.event_types(a).await[2..],
        &["StockLocked", "StockUnlocked"]
    );
    assert_eq!(h.event_types(b).await.len(), 2);
}

#[tokio::test]
async fn test_total_failure_changes_nothing() {
    let h = TestHarness::new();
    let a = h.stock(dec!(1)).await;
    let b = h.stock(dec!(1)).await;
    let events_before = h.repo.event_count().await;

    let request = AllocationRequest::new("SALES_ORDER", "SO-102")
        .line(a, dec!(3))
        .line(b, dec!(3));
    let result = h.coordinator.allocate(&request).await.unwrap();

    assert_eq!(result.state, AllocationState::Failed);
    assert_eq!(result.total_allocated, Decimal::ZERO);
    assert_eq!(result.failed_lines, vec![0, 1]);
    assert_eq!(h.repo.event_count().await, events_before);
    assert_eq!(h.repo.load(a).await.unwrap().version(), Version::new(1));
}

#[tokio::test]
async fn test_unknown_item_is_rejected() {
    let h = TestHarness::new();
    let a = h.stock(dec!(5)).await;
    let missing = InventoryKey::new(h.warehouse, ProductId::new());

    let request = AllocationRequest::new("SALES_ORDER", "SO-103")
        .line(a, dec!(1))
        .line(missing, dec!(1));
    let result = h.coordinator.allocate(&request).await;

    assert!(matches!(
        result,
        Err(AllocationError::UnknownItem { index: 1, key }) if key == missing
    ));
    assert_eq!(h.locked(a).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_preview_matches_allocation_outcome() {
    let h = TestHarness::new();
    let a = h.stock(dec!(4)).await;
    let b = h.stock(dec!(2)).await;

    let request = AllocationRequest::new("SALES_ORDER", "SO-104")
        .line(a, dec!(4))
        .line(b, dec!(3));
    let preview = h.coordinator.preview(&request).await.unwrap();

    assert!(!preview.can_fulfill_all);
    assert_eq!(preview.shortage_lines, vec![1]);
    assert_eq!(preview.lines[1].shortage_quantity, dec!(1));
    assert_eq!(h.locked(a).await, Decimal::ZERO);

    let result = h.coordinator.allocate(&request).await.unwrap();
    assert_eq!(result.failed_lines, preview.shortage_lines);
}

#[tokio::test]
async fn test_release_frees_source_locks() {
    let h = TestHarness::new();
    let a = h.stock(dec!(10)).await;
    let b = h.stock(dec!(10)).await;

    h.coordinator
        .allocate(
            &AllocationRequest::new("SALES_ORDER", "SO-105")
                .line(a, dec!(3))
                .line(b, dec!(4)),
        )
        .await
        .unwrap();
    h.coordinator
        .allocate(&AllocationRequest::new("TRANSFER", "TR-1").line(a, dec!(2)))
        .await
        .unwrap();

    let released = h
        .coordinator
        .release(&[a, b], "SALES_ORDER", "SO-105")
        .await
        .unwrap();

    assert!(released.success);
    assert_eq!(released.total_released, dec!(7));
    assert_eq!(h.locked(a).await, dec!(2));
    assert_eq!(h.available(a).await, dec!(8));
    assert_eq!(h.locked(b).await, Decimal::ZERO);

    let again = h
        .coordinator
        .release(&[a, b], "SALES_ORDER", "SO-105")
        .await
        .unwrap();
    assert!(again.lines.is_empty());
}

#[tokio::test]
async fn test_release_of_unknown_items_is_rejected() {
    let h = TestHarness::new();
    let missing = InventoryKey::new(h.warehouse, ProductId::new());

    let result = h.coordinator.release(&[missing], "SALES_ORDER", "SO-1").await;
    assert!(matches!(result, Err(AllocationError::NoItemsToRelease)));
}

#[tokio::test]
async fn test_sweep_releases_only_expired_locks() {
    let h = TestHarness::new();
    let a = h.stock(dec!(10)).await;

    h.coordinator
        .allocate(
            &AllocationRequest::new("SALES_ORDER", "SO-106")
                .line(a, dec!(3))
                .with_lock_duration(Duration::minutes(1)),
        )
        .await
        .unwrap();
    h.coordinator
        .allocate(&AllocationRequest::new("SALES_ORDER", "SO-107").line(a, dec!(2)))
        .await
        .unwrap();

    assert_eq!(h.coordinator.sweep_expired_locks_now(&[a]).await.unwrap(), 0);

    let later = now() + Duration::minutes(5);
    let released = h.coordinator.sweep_expired_locks(&[a], later).await.unwrap();

    assert_eq!(released, 1);
    assert_eq!(h.locked(a).await, dec!(2));
    assert_eq!(h.available(a).await, dec!(8));
    let types = h.event_types(a).await;
    assert_eq!(&types[types.len() - 2..], &["StockLockExpired", "StockUnlocked"]);
}

#[tokio::test]
async fn test_stale_writer_conflicts_with_allocation() {
    let h = TestHarness::new();
    let a = h.stock(dec!(10)).await;

    let mut stale = h.repo.load(a).await.unwrap();
    let stale_version = stale.version();

    h.coordinator
        .allocate(&AllocationRequest::new("SALES_ORDER", "SO-108").line(a, dec!(4)))
        .await
        .unwrap();

    stale.adjust_stock(dec!(3), "recount").unwrap();
    let result = h.repo.save(&mut stale, stale_version).await;

    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict { expected, actual, .. })
            if expected == Version::new(1) && actual == Version::new(2)
    ));
    assert_eq!(h.locked(a).await, dec!(4));
    assert_eq!(h.available(a).await, dec!(6));
}

#[tokio::test]
async fn test_conflict_part_way_releases_saved_locks() {
    let h = TestHarness::new();
    let a = h.stock(dec!(10)).await;
    let b = h.stock(dec!(10)).await;
    let events_on_a = h.event_types(a).await.len();

    let coordinator = AllocationCoordinator::new(
        InterleavedWriter {
            inner: h.repo.clone(),
            target: b,
            triggered: AtomicBool::new(false),
        },
        StockAllocationService::with_clock(FixedClock::new(now())),
    );
    let request = AllocationRequest::new("SALES_ORDER", "SO-109")
        .line(a, dec!(4))
        .line(b, dec!(3));
    let result = coordinator.allocate(&request).await;

    let Err(error) = result else {
        panic!("expected the allocation to fail");
    };
    assert_eq!(error.code(), "CONCURRENCY_CONFLICT");
    let AllocationError::NotPersisted {
        rolled_back, source, ..
    } = error
    else {
        panic!("expected NotPersisted");
    };
    assert!(matches!(source, StoreError::ConcurrencyConflict { key, .. } if key == b));
    assert_eq!(rolled_back.len(), 1);
    assert!(rolled_back[0].success);
    assert_eq!(rolled_back[0].key, a);

    // Item a was saved with the lock, then saved again without it.
    let stored = h.repo.load(a).await.unwrap();
    assert_eq!(stored.available_quantity(), dec!(10));
    assert_eq!(stored.locked_quantity(), Decimal::ZERO);
    assert_eq!(stored.active_locks().count(), 0);
    assert_eq!(
        &h.event_types(a).await[events_on_a..],
        &["StockLocked", "StockUnlocked"]
    );

    // Item b keeps the other writer's change and holds nothing.
    let stored = h.repo.load(b).await.unwrap();
    assert_eq!(stored.locked_quantity(), Decimal::ZERO);
    assert_eq!(stored.available_quantity(), dec!(10));
    assert_eq!(stored.min_quantity(), dec!(1));
}

#[tokio::test]
async fn test_conflict_on_first_save_is_a_plain_store_error() {
    let h = TestHarness::new();
    let a = h.stock(dec!(10)).await;

    let coordinator = AllocationCoordinator::new(
        InterleavedWriter {
            inner: h.repo.clone(),
            target: a,
            triggered: AtomicBool::new(false),
        },
        StockAllocationService::with_clock(FixedClock::new(now())),
    );
    let result = coordinator
        .allocate(&AllocationRequest::new("SALES_ORDER", "SO-110").line(a, dec!(2)))
        .await;

    assert!(matches!(
        result,
        Err(AllocationError::Store(StoreError::ConcurrencyConflict { .. }))
    ));
    assert_eq!(h.locked(a).await, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_never_oversell() {
    let h = TestHarness::new();
    let a = h.stock(dec!(5)).await;
    let coordinator = Arc::new(h.coordinator);

    let mut handles = Vec::new();
    for i in 0..12 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            let request = AllocationRequest::new("SALES_ORDER", format!("SO-{i}")).line(a, dec!(1));
            coordinator.allocate(&request).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) if result.state == AllocationState::Completed => completed += 1,
            Ok(result) => assert_eq!(result.state, AllocationState::Failed),
            Err(AllocationError::Store(StoreError::ConcurrencyConflict { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let stored = h.repo.load(a).await.unwrap();
    assert!(completed >= 1);
    assert_eq!(stored.locked_quantity(), Decimal::from(completed));
    assert_eq!(stored.active_locks().count(), completed as usize);
    assert_eq!(stored.total_quantity(), dec!(5));
}
