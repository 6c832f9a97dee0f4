//! HTTP ingestion endpoint.
//!
//! - `GET /ping` - plain-text liveness
//! - `GET /healthz` - JSON liveness with collector state
//! - `POST /events` - submit a batch of events
//! - `GET /stats` - collector counters
//! - `POST /shutdown` - request graceful shutdown

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::collector::{Collector, CollectorState, CollectorStats};
use crate::schema::Event;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    /// Cancelled by `POST /shutdown`; the binary waits on it.
    pub shutdown: CancellationToken,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    collector: CollectorState,
}

/// Event batch submitted to `POST /events`.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Response of `POST /events`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IngestResponse {
    pub accepted: usize,
    /// Submitted records that were not accepted, unparseable ones first.
    pub invalid_events: Vec<Value>,
}

#[derive(Serialize)]
struct StatsResponse {
    state: CollectorState,
    #[serde(flatten)]
    counters: CollectorStats,
}

#[derive(Serialize)]
struct ShutdownResponse {
    rc: i32,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/ping", get(ping_handler))
        .route("/healthz", get(healthz_handler))
        .route("/events", post(events_handler))
        .route("/stats", get(stats_handler))
        .route("/shutdown", post(shutdown_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn ping_handler() -> &'static str {
    "pong"
}

/// Liveness probe.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        collector: state.collector.state(),
    })
}

/// Validate and buffer a batch; never waits on storage.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Json<IngestResponse> {
    let mut events = Vec::with_capacity(request.events.len());
    let mut invalid_events = Vec::new();

    for raw in request.events {
        match serde_json::from_value::<Event>(raw.clone()) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable event");
                invalid_events.push(raw);
            }
        }
    }

    let result = state.collector.enqueue(events);
    invalid_events.extend(
        result
            .invalid_events
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok()),
    );

    Json(IngestResponse {
        accepted: result.accepted,
        invalid_events,
    })
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        state: state.collector.state(),
        counters: state.collector.stats(),
    })
}

async fn shutdown_handler(State(state): State<Arc<AppState>>) -> Json<ShutdownResponse> {
    tracing::info!("Shutdown requested over HTTP");
    state.shutdown.cancel();
    Json(ShutdownResponse { rc: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use crate::schema::{EventDefinition, PropertyType, SchemaDefinition, SchemaMapper, TableTimezone};
    use crate::storage::{DistStore, MemoryStore, StoreAdapter};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        let shard: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new("m0"));
        let store = Arc::new(DistStore::new(vec![shard]).unwrap());
        let schema = SchemaDefinition::default()
            .with_event(EventDefinition::new("login").with_property("uid", PropertyType::Int));
        let mapper = Arc::new(SchemaMapper::new(Arc::clone(&store), schema, TableTimezone::Utc));
        AppState {
            collector: Arc::new(Collector::new(mapper, store, CollectorConfig::default())),
            shutdown: CancellationToken::new(),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let app = create_router(create_test_state());
        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn test_events_partial_acceptance() {
        let app = create_router(create_test_state());
        let body = serde_json::json!({
            "events": [
                {"event_name": "login", "properties": {"uid": 1}},
                {"event_name": "login", "properties": {"uid": "x"}},
                {"properties": {}},
            ]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["accepted"], 1);
        let invalid = json["invalid_events"].as_array().unwrap();
        assert_eq!(invalid.len(), 2);
        assert_eq!(invalid[0], serde_json::json!({"properties": {}}));
        assert_eq!(invalid[1]["properties"]["uid"], "x");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let state = create_test_state();
        let token = state.shutdown.clone();
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/shutdown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!({"rc": 0}));
        assert!(token.is_cancelled());
    }
}
