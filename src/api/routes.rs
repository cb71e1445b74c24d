//! API route definitions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::state::AppState;
use crate::api::ApiError;
use crate::detect::Reading;
use crate::storage::{telemetry, IncidentStore};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/alerts", get(list_alerts))
        .route("/alerts/{asset_id}", get(alerts_by_asset))
        .route("/stats", get(stats))
        .route("/detector/reset", post(reset_detector))
        .route("/detector/{asset_id}", get(inspect_asset))
}

/// Run a blocking store query off the async runtime.
async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&IncidentStore) -> anyhow::Result<T> + Send + 'static,
{
    let store = state.store().clone();
    let value = tokio::task::spawn_blocking(move || f(&store)).await??;
    Ok(value)
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<Reading>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(reading) = payload?;
    let report = state.pipeline.ingest(reading).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": report }))))
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Json<Value>, ApiError> {
    let Page { skip, limit } = page;
    let alerts = with_store(&state, move |store| store.list_recent(skip, limit)).await?;
    Ok(Json(json!({
        "data": alerts,
        "meta": { "skip": skip, "limit": limit, "count": alerts.len() }
    })))
}

async fn alerts_by_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = asset_id.clone();
    let alerts = with_store(&state, move |store| store.list_by_asset(&id)).await?;
    Ok(Json(json!({
        "data": {
            "asset_id": asset_id,
            "total": alerts.len(),
            "alerts": alerts
        }
    })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let (telemetry_total, alerts_total, by_type) = with_store(&state, |store| {
        Ok((
            telemetry::count(store.pool())?,
            store.count()?,
            store.counts_by_type()?,
        ))
    })
    .await?;

    Ok(Json(json!({
        "data": {
            "telemetry_total": telemetry_total,
            "alerts_total": alerts_total,
            "alerts_by_type": by_type,
            "detector": state.detector().snapshot_all()
        }
    })))
}

async fn inspect_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.detector().inspect(&asset_id) {
        Some(snapshot) => Ok(Json(json!({ "data": snapshot }))),
        None => Err(ApiError::NotFound(format!("asset '{}' has no detector state", asset_id))),
    }
}

async fn reset_detector(State(state): State<AppState>) -> Json<Value> {
    state.detector().reset();
    Json(json!({ "data": { "status": "ok", "message": "detector reset" } }))
}
