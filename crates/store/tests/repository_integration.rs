//! Concurrency behaviour of the in-memory repository.

use common::{ProductId, Version, WarehouseId};
use domain::Aggregate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use store::{InMemoryInventoryRepository, InventoryRepository, StoreError};

#[tokio::test]
async fn concurrent_writers_never_lose_updates() {
    let repo = InMemoryInventoryRepository::new();
    let mut item = repo
        .get_or_create(WarehouseId::new(), ProductId::new())
        .await
        .unwrap();
    item.increase_stock(dec!(100), dec!(1), None).unwrap();
    repo.save(&mut item, Version::initial()).await.unwrap();
    let key = item.key();

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let mut item = repo.load(key).await?;
            let loaded = item.version();
            item.decrease_stock(dec!(1), "ADJUSTMENT", &format!("ADJ-{i}"), "damaged")?;
            let version = repo.save(&mut item, loaded).await?;
            Ok::<Version, StoreError>(version)
        }));
    }

    let mut won: i64 = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(StoreError::ConcurrencyConflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let stored = repo.load(key).await.unwrap();
    assert!(won >= 1);
    assert_eq!(won + conflicts, 8);
    assert_eq!(stored.available_quantity(), dec!(100) - Decimal::from(won));
    assert_eq!(stored.version(), Version::new(1 + won));
}

#[tokio::test]
async fn saved_event_log_yields_transaction_history() {
    let repo = InMemoryInventoryRepository::new();
    let mut item = repo
        .get_or_create(WarehouseId::new(), ProductId::new())
        .await
        .unwrap();
    let key = item.key();

    let loaded = item.version();
    item.increase_stock(dec!(20), dec!(3), None).unwrap();
    item.increase_stock(dec!(10), dec!(6), None).unwrap();
    repo.save(&mut item, loaded).await.unwrap();

    let loaded = item.version();
    let lock = item
        .lock_stock(dec!(8), "SALES_ORDER", "SO-1", chrono::Utc::now())
        .unwrap();
    item.deduct_stock(lock.id()).unwrap();
    item.decrease_stock(dec!(2), "SCRAP", "SC-1", "broken").unwrap();
    repo.save(&mut item, loaded).await.unwrap();

    let history =
        domain::transactions_from_events(&repo.events_for(key).await, Decimal::ZERO, Decimal::ZERO)
            .unwrap();
    let stored = repo.load(key).await.unwrap();

    assert_eq!(history.len(), 5);
    assert_eq!(history.last().unwrap().balance_after(), stored.available_quantity());
    // The shipment is valued at the average cost in force when it left.
    assert_eq!(history[3].unit_cost(), dec!(4));
    assert_eq!(history[3].total_cost(), dec!(32));
    assert!(history.iter().all(|tx| tx.key() == key));
}
