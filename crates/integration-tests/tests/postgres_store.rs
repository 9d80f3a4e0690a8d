//! `PgStore` against a real database.
//!
//! Requires `ROTA_TEST_DATABASE_URL` pointing at a disposable database; the
//! reference schema is applied on connect. Each test works on its own id
//! range so they can share one database.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::Utc;
use rota_core::{
    Coordinates, CustomerId, DealId, DealStatus, GeocodingStatus, GeocodingUpdate, Sale, SyncLog,
    SyncStatus, SyncType,
};
use rota_integration_tests::customer_at;
use rota_sync::db::{PgStore, RepositoryError};
use rota_sync::store::{
    CacheEntry, CustomerFilter, CustomerStore, GeocodeCacheStore, SalesStore, SyncLogStore,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;

const SCHEMA: &str = include_str!("../../sync/sql/schema.sql");

async fn store() -> PgStore {
    let url = std::env::var("ROTA_TEST_DATABASE_URL").expect("ROTA_TEST_DATABASE_URL not set");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await
        .unwrap();
    sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();
    PgStore::new(pool)
}

async fn clear(store: &PgStore, ids: std::ops::RangeInclusive<i64>) {
    sqlx::query("DELETE FROM sales WHERE customer_id BETWEEN $1 AND $2")
        .bind(ids.start())
        .bind(ids.end())
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("DELETE FROM customers WHERE id BETWEEN $1 AND $2")
        .bind(ids.start())
        .bind(ids.end())
        .execute(store.pool())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "Requires database"]
async fn test_upsert_and_keyset_pending() {
    let store = store().await;
    clear(&store, 9_100..=9_199).await;

    let customers: Vec<_> = (9_101..=9_105)
        .map(|id| customer_at(id, "Rua Pedro Borges", "Fortaleza", "CE", Some("60055-110")))
        .collect();
    assert_eq!(store.upsert_customers(&customers).await.unwrap(), 5);

    let first = store
        .pending_for_geocoding(Some(CustomerId::new(9_100)), 2, 3)
        .await
        .unwrap();
    let ids: Vec<i64> = first.iter().map(|c| c.id.as_i64()).collect();
    assert_eq!(ids, [9_101, 9_102]);

    let next = store
        .pending_for_geocoding(Some(CustomerId::new(9_102)), 2, 3)
        .await
        .unwrap();
    assert_eq!(next[0].id, CustomerId::new(9_103));

    let loaded = store
        .get_customer(CustomerId::new(9_101))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.postal_code, customers[0].postal_code);
    assert_eq!(loaded.full_address, customers[0].full_address);
    assert_eq!(loaded.geocoding_status, GeocodingStatus::Pending);
}

#[tokio::test]
#[ignore = "Requires database"]
async fn test_geocoding_write_survives_reimport_until_address_changes() {
    let store = store().await;
    clear(&store, 9_200..=9_299).await;

    let mut customer = customer_at(9_201, "Rua Pedro Borges", "Fortaleza", "CE", Some("60055-110"));
    store.upsert_customers(&[customer.clone()]).await.unwrap();

    let coordinates = Coordinates::new(-3.7286, -38.5233);
    store
        .write_geocoding(&GeocodingUpdate::completed(customer.id, coordinates, 1, Utc::now()))
        .await
        .unwrap();

    customer.name = "Renamed".to_string();
    store.upsert_customers(&[customer.clone()]).await.unwrap();
    let kept = store.get_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(kept.name, "Renamed");
    assert_eq!(kept.geocoding_status, GeocodingStatus::Completed);
    assert!(kept.coordinates.unwrap().approx_eq(&coordinates, 1e-9));

    customer.street_address = Some("Avenida Dom Luis".to_string());
    customer.full_address = customer.address_parts().to_full_address();
    store.upsert_customers(&[customer.clone()]).await.unwrap();
    let reset = store.get_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(reset.geocoding_status, GeocodingStatus::Pending);
    assert!(reset.coordinates.is_none());
    assert_eq!(reset.geocoding_attempts, 0);
}

#[tokio::test]
#[ignore = "Requires database"]
async fn test_failed_write_reset_and_missing_customer() {
    let store = store().await;
    clear(&store, 9_300..=9_399).await;

    let customer = customer_at(9_301, "Rua Pedro Borges", "Fortaleza", "CE", None);
    store.upsert_customers(&[customer.clone()]).await.unwrap();
    store
        .write_geocoding(&GeocodingUpdate::failed(customer.id, 3, Utc::now()))
        .await
        .unwrap();

    // At the attempt ceiling, and failed: not pending either way
    let pending = store
        .pending_for_geocoding(Some(CustomerId::new(9_300)), 10, 3)
        .await
        .unwrap();
    assert!(pending.iter().all(|c| c.id != customer.id));

    assert!(store.reset_failed().await.unwrap() >= 1);
    let reset = store.get_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(reset.geocoding_status, GeocodingStatus::Pending);
    assert_eq!(reset.geocoding_attempts, 0);

    let missing = store
        .write_geocoding(&GeocodingUpdate::failed(CustomerId::new(9_399), 1, Utc::now()))
        .await;
    assert!(matches!(missing, Err(RepositoryError::NotFound)));

    let found = store
        .list_customers(&CustomerFilter {
            search: Some("cliente 9301".to_string()),
            ..CustomerFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
#[ignore = "Requires database"]
async fn test_cache_expiry_and_purge() {
    let store = store().await;
    let now = Utc::now();
    let fresh = CacheEntry {
        address: "pg-test fresh, fortaleza, ce, brasil".to_string(),
        coordinates: Coordinates::new(-3.73, -38.52),
        provider: "google".to_string(),
        created_at: now,
        expires_at: now + chrono::Duration::days(30),
    };
    let stale = CacheEntry {
        address: "pg-test stale, fortaleza, ce, brasil".to_string(),
        expires_at: now - chrono::Duration::seconds(1),
        ..fresh.clone()
    };
    store.put_cached(&fresh).await.unwrap();
    store.put_cached(&stale).await.unwrap();

    let loaded = store.get_cached(&fresh.address).await.unwrap().unwrap();
    assert_eq!(loaded.provider, "google");
    assert!(loaded.coordinates.approx_eq(&fresh.coordinates, 1e-9));

    assert!(store.purge_expired(now).await.unwrap() >= 1);
    assert!(store.get_cached(&stale.address).await.unwrap().is_none());
    assert!(store.get_cached(&fresh.address).await.unwrap().is_some());

    store.delete_cached(&fresh.address).await.unwrap();
    assert!(store.get_cached(&fresh.address).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Requires database"]
async fn test_sales_and_sync_logs() {
    let store = store().await;
    clear(&store, 9_400..=9_499).await;

    let customer = customer_at(9_401, "Rua Pedro Borges", "Fortaleza", "CE", None);
    store.upsert_customers(&[customer.clone()]).await.unwrap();

    let sale = Sale {
        deal_id: DealId::new(94_011),
        customer_id: customer.id,
        owner_id: None,
        stage_id: None,
        title: Some("Pedido".to_string()),
        deal_value: Decimal::new(12_345, 2),
        status: DealStatus::Won,
        deal_created_at: Some(Utc::now()),
        deal_updated_at: None,
    };
    store.upsert_sales(&[sale.clone()]).await.unwrap();
    let updated = Sale {
        status: DealStatus::Lost,
        ..sale.clone()
    };
    store.upsert_sales(&[updated]).await.unwrap();

    let sales = store.sales_for_customer(customer.id).await.unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].status, DealStatus::Lost);
    assert_eq!(sales[0].deal_value, Decimal::new(12_345, 2));

    let log = SyncLog::finish(SyncType::Sales, Utc::now(), 1, 1, 0, None);
    store.record_sync(&log).await.unwrap();
    let recent = store.recent_syncs(50).await.unwrap();
    let stored = recent.iter().find(|l| l.id == log.id).unwrap();
    assert_eq!(stored.status, SyncStatus::Completed);
    assert_eq!(stored.sync_type, SyncType::Sales);
}
