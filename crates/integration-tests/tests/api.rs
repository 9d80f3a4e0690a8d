//! Dashboard API routes over an in-memory store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use rota_core::{
    Coordinates, CustomerId, DealId, DealStatus, GeocodingStatus, GeocodingUpdate, Sale, SyncLog,
    SyncType,
};
use rota_integration_tests::{
    Answer, FORTALEZA, ScriptedProvider, batch_config, customer_at, geocoder, writer_config,
};
use rota_sync::api::{AppState, app};
use rota_sync::job::GeocodingPipeline;
use rota_sync::memory::MemoryStore;
use rota_sync::store::{CustomerStore, SalesStore, Store, SyncLogStore};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

// =============================================================================
// Helpers
// =============================================================================

/// Three customers: two in Fortaleza (one geocoded), one in Sao Paulo.
async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::with_customers([
        customer_at(1, "Rua Barao de Aracati", "Fortaleza", "CE", Some("60115-080")),
        customer_at(2, "Avenida Santos Dumont", "Fortaleza", "CE", Some("60150-160")),
        customer_at(3, "Avenida Paulista", "Sao Paulo", "SP", Some("1310100")),
    ]));
    store
        .write_geocoding(&GeocodingUpdate::completed(
            CustomerId::new(1),
            Coordinates::new(-3.7305, -38.5105),
            1,
            chrono::Utc::now(),
        ))
        .await
        .unwrap();
    store
}

fn read_only_app(store: Arc<MemoryStore>) -> Router {
    app(AppState::new(store, None))
}

fn app_with_jobs(store: Arc<MemoryStore>, log_dir: &std::path::Path) -> Router {
    app_answering(store, log_dir, Answer::Found(FORTALEZA))
}

fn app_answering(store: Arc<MemoryStore>, log_dir: &std::path::Path, answer: Answer) -> Router {
    let store: Arc<dyn Store> = store;
    let provider = ScriptedProvider::always("primary", answer);
    let geocoder = geocoder(
        Arc::clone(&store),
        [provider as Arc<dyn rota_sync::geocoding::GeocodingProvider>],
        Duration::from_secs(1),
        Duration::from_secs(3600),
    );
    let pipeline = GeocodingPipeline::new(
        Arc::clone(&store),
        geocoder,
        writer_config(),
        batch_config(log_dir),
    );
    app(AppState::new(store, Some(pipeline)))
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri).await
}

async fn post(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::POST, uri).await
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let app = read_only_app(Arc::new(MemoryStore::new()));

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
    assert_eq!(&body[..], b"ok");

    let (status, _) = get(&app, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Customers
// =============================================================================

#[tokio::test]
async fn test_list_customers_with_filters() {
    let app = read_only_app(seeded_store().await);

    let (status, body) = get(&app, "/api/customers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (_, body) = get(&app, "/api/customers?search=fortaleza").await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = get(&app, "/api/customers?status=completed").await;
    let completed = body.as_array().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["id"], 1);
    assert_eq!(completed[0]["geocoding_status"], "completed");

    let (_, body) = get(&app, "/api/customers?limit=1&offset=1").await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = get(&app, "/api/customers?status=done").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_customer() {
    let app = read_only_app(seeded_store().await);

    let (status, body) = get(&app, "/api/customers/3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cep"], "01310-100");
    assert_eq!(body["geocoding_status"], "pending");
    assert!(body["coordinates"].is_null());

    let (status, body) = get(&app, "/api/customers/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("999"));
}

#[tokio::test]
async fn test_customer_sales_with_summary() {
    let store = seeded_store().await;
    let sale = |deal: i64, cents: i64, status: DealStatus| Sale {
        deal_id: DealId::new(deal),
        customer_id: CustomerId::new(2),
        owner_id: None,
        stage_id: None,
        title: Some(format!("Pedido {deal}")),
        deal_value: Decimal::new(cents, 2),
        status,
        deal_created_at: None,
        deal_updated_at: None,
    };
    store
        .upsert_sales(&[
            sale(10, 10_000, DealStatus::Won),
            sale(11, 500, DealStatus::Open),
        ])
        .await
        .unwrap();
    let app = read_only_app(store);

    let (status, body) = get(&app, "/api/customers/2/sales").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["customer_id"], 2);
    assert_eq!(body["sales"].as_array().unwrap().len(), 2);
    assert_eq!(body["summary"]["deals"], 2);
    assert_eq!(body["summary"]["won"], 1);
    assert_eq!(body["summary"]["won_value"], "100.00");

    let (status, _) = get(&app, "/api/customers/999/sales").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Geocoding
// =============================================================================

#[tokio::test]
async fn test_geocoding_stats() {
    let app = read_only_app(seeded_store().await);

    let (status, body) = get(&app, "/api/geocoding/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["geocoded"], 1);
    assert_eq!(body["pending"], 2);
    let percent = body["geocoded_percent"].as_f64().unwrap();
    assert!((percent - 100.0 / 3.0).abs() < 0.01);
}

#[tokio::test]
async fn test_jobs_unavailable_without_geocoder() {
    let app = read_only_app(seeded_store().await);

    let (status, _) = post(&app, "/api/geocoding/jobs").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = get(&app, "/api/geocoding/jobs/current").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;
    let app = app_with_jobs(store.clone(), dir.path());

    let (status, _) = post(&app, "/api/geocoding/jobs?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(&app, "/api/geocoding/jobs").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_string();

    let mut finished = Value::Null;
    for _ in 0..100 {
        let (status, body) = get(&app, "/api/geocoding/jobs/current").await;
        assert_eq!(status, StatusCode::OK);
        if body["finished"] == true {
            finished = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(finished["id"], id.as_str());
    assert_eq!(finished["state"], "completed");
    assert_eq!(finished["processed"], 2);
    assert_eq!(finished["succeeded"], 2);

    let (status, _) = post(&app, "/api/geocoding/jobs/current/cancel").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let stats = store.geocoding_stats().await.unwrap();
    assert_eq!(stats.geocoded, 3);
    let customer = store.get_customer(CustomerId::new(2)).await.unwrap().unwrap();
    assert_eq!(customer.geocoding_status, GeocodingStatus::Completed);

    let logs = store.recent_syncs(5).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].sync_type, SyncType::Geocoding);
}

#[tokio::test]
async fn test_geocode_single_address_uses_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_jobs(Arc::new(MemoryStore::new()), dir.path());
    let request = json!({ "address": "Av. Beira Mar, 3000, Fortaleza" });

    let (status, body) = post_json(&app, "/api/geocoding/address", &request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider"], "primary");
    assert_eq!(body["from_cache"], false);
    let latitude = body["coordinates"]["latitude"].as_f64().unwrap();
    assert!((latitude - FORTALEZA.latitude).abs() < 1e-9);

    let (status, body) = post_json(&app, "/api/geocoding/address", &request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["from_cache"], true);
    assert_eq!(body["provider_calls"], 0);
}

#[tokio::test]
async fn test_geocode_postal_code() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_jobs(Arc::new(MemoryStore::new()), dir.path());

    let (status, body) = post_json(&app, "/api/geocoding/cep", &json!({ "cep": "60025100" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider"], "primary");

    let (status, _) = post_json(&app, "/api/geocoding/cep", &json!({ "cep": "12" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&app, "/api/geocoding/address", &json!({ "address": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        post_json(&app, "/api/geocoding/address", &json!({ "cep": "60025-100" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_geocode_address_not_found_or_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let request = json!({ "address": "Rua Inexistente, 0, Lugar Nenhum" });

    let app = app_answering(Arc::new(MemoryStore::new()), dir.path(), Answer::NoResult);
    let (status, body) = post_json(&app, "/api/geocoding/address", &request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Lugar Nenhum"));

    let app = read_only_app(Arc::new(MemoryStore::new()));
    let (status, _) = post_json(&app, "/api/geocoding/address", &request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// Routes
// =============================================================================

fn stop(name: &str, latitude: f64, longitude: f64) -> Value {
    json!({ "name": name, "latitude": latitude, "longitude": longitude })
}

#[tokio::test]
async fn test_optimize_route_orders_waypoints() {
    let app = read_only_app(Arc::new(MemoryStore::new()));
    let origin = stop("deposito", -3.70, -38.50);
    let waypoints = json!([
        stop("longe", -3.70, -38.53),
        stop("perto", -3.70, -38.51),
        stop("meio", -3.70, -38.52),
    ]);

    let (status, body) = post_json(
        &app,
        "/api/routes/optimize",
        &json!({ "origin": origin, "waypoints": waypoints }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["waypoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["perto", "meio", "longe"]);
    assert_eq!(body["order"], json!([1, 2, 0]));
    assert_eq!(body["algorithm"], "nearest-neighbor-2opt");
    assert_eq!(body["legs"].as_array().unwrap().len(), 3);
    assert_eq!(body["legs"][0]["from"], "origin");
    assert_eq!(body["legs"][2]["to"], json!({ "stop": 0 }));

    // About 3.3 km straight west
    let distance = body["total_distance_km"].as_f64().unwrap();
    assert!((3.2..3.5).contains(&distance));
    assert_eq!(body["estimated_minutes"], 5 + 3 * 5);

    let (status, body) = post_json(
        &app,
        "/api/routes/optimize",
        &json!({
            "origin": origin,
            "waypoints": waypoints,
            "return_to_origin": true,
            "algorithm": "nearest-neighbor",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["legs"].as_array().unwrap().len(), 4);
    assert_eq!(body["legs"][3]["to"], "origin");
    assert_eq!(body["improvement_percent"], 0.0);
}

#[tokio::test]
async fn test_optimize_route_rejects_bad_input() {
    let app = read_only_app(Arc::new(MemoryStore::new()));
    let origin = stop("deposito", -3.70, -38.50);

    let (status, _) = post_json(
        &app,
        "/api/routes/optimize",
        &json!({ "origin": origin, "waypoints": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_json(
        &app,
        "/api/routes/optimize",
        &json!({ "origin": origin, "waypoints": [stop("a", -3.7, -38.5), stop("b", 95.0, -38.5)] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("waypoint 1"));

    let many: Vec<Value> = (0..=rota_sync::api::MAX_ROUTE_STOPS)
        .map(|_| stop("x", -3.7, -38.5))
        .collect();
    let (status, _) = post_json(
        &app,
        "/api/routes/optimize",
        &json!({ "origin": origin, "waypoints": many }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_distance_between_points() {
    let app = read_only_app(Arc::new(MemoryStore::new()));
    let fortaleza = json!({ "latitude": -3.7319, "longitude": -38.5267 });
    let sao_paulo = json!({ "latitude": -23.5505, "longitude": -46.6333 });

    let (status, body) = post_json(
        &app,
        "/api/distance",
        &json!({ "from": fortaleza, "to": sao_paulo }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let km = body["distance_km"].as_f64().unwrap();
    assert!((2_360.0..2_380.0).contains(&km));

    let (status, _) = post_json(
        &app,
        "/api/distance",
        &json!({ "from": fortaleza, "to": { "latitude": -23.5, "longitude": 200.0 } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Sync logs
// =============================================================================

#[tokio::test]
async fn test_sync_logs_newest_first_with_limit() {
    let store = Arc::new(MemoryStore::new());
    let start = chrono::Utc::now() - chrono::Duration::minutes(10);
    let runs = [
        (0, SyncType::Customers),
        (1, SyncType::Sales),
        (2, SyncType::Geocoding),
    ];
    for (offset, sync_type) in runs {
        let log = SyncLog::finish(
            sync_type,
            start + chrono::Duration::minutes(offset),
            10,
            10,
            0,
            None,
        );
        store.record_sync(&log).await.unwrap();
    }
    let app = read_only_app(store);

    let (status, body) = get(&app, "/api/sync/logs?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let logs = body.as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["sync_type"], "geocoding");
    assert_eq!(logs[1]["sync_type"], "sales");

    let (_, body) = get(&app, "/api/sync/logs?limit=0").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}
