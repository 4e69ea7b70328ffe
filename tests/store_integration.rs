//! Order store behaviour shared by the sqlite and in-memory stores

mod common;

use common::*;
use order_log_reconcile::common::types::{OrderStatus, PositionSide, Side};
use order_log_reconcile::store::{load_grouped, InMemoryOrderStore, SqliteOrderStore};
use order_log_reconcile::OrderStore;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteOrderStore {
    SqliteOrderStore::open(dir.path().join("data").join("orders.db"), 2)
        .await
        .expect("open sqlite store")
}

async fn check_ingest_is_idempotent(store: &dyn OrderStore) {
    let first = vec![
        order(10, "BTCUSDT", Side::Buy, PositionSide::Long, T0, dec!(1), dec!(100)),
        order(11, "BTCUSDT", Side::Sell, PositionSide::Long, T0 + MINUTE, dec!(1), dec!(101)),
    ];
    let outcome = store.ingest("alpha", "BTCUSDT", &first).await.unwrap();
    assert_eq!(outcome.written, 2);
    assert_eq!(outcome.cursor, 11);

    // same orders again, one of them updated by the exchange
    let mut refreshed = first.clone();
    refreshed[1].status = OrderStatus::Canceled;
    let outcome = store.ingest("alpha", "BTCUSDT", &refreshed).await.unwrap();
    assert_eq!(outcome.cursor, 11);

    let orders = store.query_orders("alpha").await.unwrap();
    assert_eq!(orders.len(), 2);
    let updated = orders.iter().find(|o| o.order_id == 11).unwrap();
    assert_eq!(updated.status, OrderStatus::Canceled);

    // an older batch never moves the cursor back
    let outcome = store
        .ingest("alpha", "BTCUSDT", &[order(3, "BTCUSDT", Side::Buy, PositionSide::Long, T0 - MINUTE, dec!(1), dec!(99))])
        .await
        .unwrap();
    assert_eq!(outcome.cursor, 11);
    assert_eq!(store.cursor("alpha", "BTCUSDT").await.unwrap().unwrap().last_order_id, 11);

    // an empty batch reports the current cursor and writes nothing
    let outcome = store.ingest("alpha", "BTCUSDT", &[]).await.unwrap();
    assert_eq!(outcome.written, 0);
    assert_eq!(outcome.cursor, 11);

    assert!(store.query_orders("beta").await.unwrap().is_empty());
    assert!(store.cursor("beta", "BTCUSDT").await.unwrap().is_none());
}

async fn check_symbols_are_recorded_once(store: &dyn OrderStore) {
    assert!(store.record_symbol("beta", "ETHUSDT").await.unwrap());
    assert!(store.record_symbol("alpha", "SOLUSDT").await.unwrap());
    assert!(store.record_symbol("alpha", "BTCUSDT").await.unwrap());
    assert!(!store.record_symbol("alpha", "BTCUSDT").await.unwrap());

    assert_eq!(
        store.symbols(None).await.unwrap(),
        vec![
            ("alpha".to_string(), "BTCUSDT".to_string()),
            ("alpha".to_string(), "SOLUSDT".to_string()),
            ("beta".to_string(), "ETHUSDT".to_string()),
        ]
    );
    assert_eq!(store.symbols(Some("beta")).await.unwrap().len(), 1);
}

async fn check_query_between_is_bounded_and_ordered(store: &dyn OrderStore) {
    let orders = vec![
        order(22, "ETHUSDT", Side::Sell, PositionSide::Short, T0 + 2 * MINUTE, dec!(1), dec!(3000)),
        order(20, "ETHUSDT", Side::Sell, PositionSide::Short, T0, dec!(1), dec!(3000)),
        order(21, "ETHUSDT", Side::Buy, PositionSide::Short, T0 + MINUTE, dec!(1), dec!(2990)),
        order(23, "ETHUSDT", Side::Buy, PositionSide::Short, T0 + 10 * MINUTE, dec!(1), dec!(2980)),
    ];
    store.ingest("gamma", "ETHUSDT", &orders).await.unwrap();

    let found = store
        .query_orders_between("gamma", "ETHUSDT", T0, T0 + 2 * MINUTE)
        .await
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|o| o.order_id).collect();
    assert_eq!(ids, vec![20, 21, 22]);
    assert!(store
        .query_orders_between("gamma", "BTCUSDT", T0, T0 + 2 * MINUTE)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_memory_store_ingest_is_idempotent() {
    check_ingest_is_idempotent(&InMemoryOrderStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_store_ingest_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    check_ingest_is_idempotent(&store).await;
    assert_eq!(store.order_count().await.unwrap(), 3);
    store.close().await;
}

#[tokio::test]
async fn test_memory_store_symbols() {
    check_symbols_are_recorded_once(&InMemoryOrderStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_store_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    check_symbols_are_recorded_once(&store).await;
    store.close().await;
}

#[tokio::test]
async fn test_memory_store_query_between() {
    check_query_between_is_bounded_and_ordered(&InMemoryOrderStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_store_query_between() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    check_query_between_is_bounded_and_ordered(&store).await;
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = sqlite_store(&dir).await;
        store
            .ingest(
                "alpha",
                "BTCUSDT",
                &[reduce_only(order(7, "BTCUSDT", Side::Sell, PositionSide::Long, T0, dec!(0.5), dec!(67250.5)))],
            )
            .await
            .unwrap();
        store.close().await;
    }

    let store = sqlite_store(&dir).await;
    let cache = load_grouped(&store, "alpha").await.unwrap();
    let group = cache.group("BTCUSDT", PositionSide::Long);
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].avg_price, dec!(67250.5));
    assert_eq!(group[0].executed_qty, dec!(0.5));
    assert!(group[0].reduce_only);
    assert!(group[0].raw_payload.contains("\"orderId\":7"));
    assert_eq!(store.cursor("alpha", "BTCUSDT").await.unwrap().unwrap().last_order_id, 7);
    store.close().await;
}

async fn check_orders_without_id_are_skipped(store: &dyn OrderStore) {
    let batch = vec![
        order(0, "SOLUSDT", Side::Buy, PositionSide::Long, T0, dec!(5), dec!(150)),
        order(5, "SOLUSDT", Side::Buy, PositionSide::Long, T0 + MINUTE, dec!(5), dec!(151)),
    ];
    let outcome = store.ingest("delta", "SOLUSDT", &batch).await.unwrap();

    assert_eq!(outcome.written, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.cursor, 5);

    let stored = store.query_orders("delta").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].order_id, 5);
    assert_eq!(store.cursor("delta", "SOLUSDT").await.unwrap().unwrap().last_order_id, 5);
}

/// Second connection to the same database file, for tampering with the schema
async fn side_connection(dir: &tempfile::TempDir) -> sqlx::SqlitePool {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(dir.path().join("data").join("orders.db"))
        .busy_timeout(std::time::Duration::from_secs(5));
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_memory_store_skips_orders_without_id() {
    check_orders_without_id_are_skipped(&InMemoryOrderStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_store_skips_orders_without_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    check_orders_without_id_are_skipped(&store).await;
    assert_eq!(store.order_count().await.unwrap(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_failed_order_write_does_not_abort_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;

    let side = side_connection(&dir).await;
    sqlx::query(
        "CREATE TRIGGER reject_order BEFORE INSERT ON orders WHEN NEW.order_id = 13
         BEGIN SELECT RAISE(ABORT, 'order rejected'); END",
    )
    .execute(&side)
    .await
    .unwrap();
    side.close().await;

    let batch = vec![
        order(12, "BTCUSDT", Side::Buy, PositionSide::Long, T0, dec!(1), dec!(100)),
        order(13, "BTCUSDT", Side::Sell, PositionSide::Long, T0 + MINUTE, dec!(1), dec!(101)),
        order(14, "BTCUSDT", Side::Buy, PositionSide::Long, T0 + 2 * MINUTE, dec!(1), dec!(102)),
    ];
    let outcome = store.ingest("alpha", "BTCUSDT", &batch).await.unwrap();

    assert_eq!(outcome.written, 2);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.cursor, 14);

    let ids: Vec<i64> = store
        .query_orders_between("alpha", "BTCUSDT", T0, T0 + 10 * MINUTE)
        .await
        .unwrap()
        .iter()
        .map(|o| o.order_id)
        .collect();
    assert_eq!(ids, vec![12, 14]);
    assert_eq!(store.cursor("alpha", "BTCUSDT").await.unwrap().unwrap().last_order_id, 14);
    store.close().await;
}

#[tokio::test]
async fn test_sqlite_batch_that_cannot_commit_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    store
        .ingest(
            "alpha",
            "BTCUSDT",
            &[
                order(1, "BTCUSDT", Side::Buy, PositionSide::Long, T0, dec!(1), dec!(100)),
                order(2, "BTCUSDT", Side::Sell, PositionSide::Long, T0 + MINUTE, dec!(1), dec!(101)),
            ],
        )
        .await
        .unwrap();

    // cursor writes now fail, so the whole next batch must roll back
    let side = side_connection(&dir).await;
    for statement in [
        "CREATE TRIGGER freeze_cursor_insert BEFORE INSERT ON reconcile_state
         BEGIN SELECT RAISE(ABORT, 'cursor frozen'); END",
        "CREATE TRIGGER freeze_cursor_update BEFORE UPDATE ON reconcile_state
         BEGIN SELECT RAISE(ABORT, 'cursor frozen'); END",
    ] {
        sqlx::query(statement).execute(&side).await.unwrap();
    }
    side.close().await;

    let mut refreshed = order(2, "BTCUSDT", Side::Sell, PositionSide::Long, T0 + MINUTE, dec!(1), dec!(101));
    refreshed.status = OrderStatus::Canceled;
    let batch = vec![
        refreshed,
        order(3, "BTCUSDT", Side::Buy, PositionSide::Long, T0 + 2 * MINUTE, dec!(1), dec!(102)),
    ];
    let result = store.ingest("alpha", "BTCUSDT", &batch).await;
    assert!(result.is_err());

    assert_eq!(store.order_count().await.unwrap(), 2);
    let orders = store.query_orders("alpha").await.unwrap();
    let kept = orders.iter().find(|o| o.order_id == 2).unwrap();
    assert_eq!(kept.status, OrderStatus::Filled);
    assert_eq!(store.cursor("alpha", "BTCUSDT").await.unwrap().unwrap().last_order_id, 2);
    store.close().await;
}
