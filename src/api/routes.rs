//! API route definitions.

use super::state::AppState;
use crate::ingest;
use crate::probes::TestDefinition;
use crate::scheduler::cadence;
use crate::storage::{Store, StoreError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_RESULT_LIMIT: usize = 50;
const MAX_RESULT_LIMIT: usize = 1000;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tests", get(list_tests).post(create_test))
        .route("/tests/{id}", axum::routing::delete(delete_test))
        .route("/tests/{id}/results", get(test_results))
        .route("/schedules", get(list_schedules))
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(format!("test {} not found", id)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => {
                tracing::error!("API request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": { "message": message } }))).into_response()
    }
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "scheduler": state.scheduler.state(),
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_tests(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tests = with_store(&state.store, |s| s.all_tests()).await?;
    Ok(Json(json!({ "data": tests, "meta": { "total": tests.len() } })))
}

async fn create_test(
    State(state): State<AppState>,
    Json(mut test): Json<TestDefinition>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if test.name.trim().is_empty() || test.url.trim().is_empty() {
        return Err(ApiError::BadRequest("name and url are required".to_string()));
    }
    cadence::parse(&test.cron)
        .map_err(|e| ApiError::BadRequest(format!("invalid cron {:?}: {}", test.cron, e)))?;

    let test = with_store(&state.store, move |s| {
        ingest::resolve_id(s, &mut test)?;
        s.put_test(&test)?;
        Ok(test)
    })
    .await?;
    tracing::info!(test = %test.name, id = %test.id, "Test added; scheduled from next start");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": test, "meta": { "message": "test will be scheduled on next start" } })),
    ))
}

#[derive(Debug, Deserialize)]
struct ResultsQuery {
    limit: Option<usize>,
}

async fn test_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RESULT_LIMIT).min(MAX_RESULT_LIMIT);
    let lookup = id.clone();
    let results = with_store(&state.store, move |s| {
        if s.get_test(&lookup)?.is_none() {
            return Err(StoreError::NotFound(lookup));
        }
        s.results_for(&lookup, limit)
    })
    .await?;

    Ok(Json(json!({ "data": results, "meta": { "test_id": id, "total": results.len() } })))
}

async fn delete_test(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let test = with_store(&state.store, move |s| {
        let test = s.get_test(&id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        s.delete_test(&id)?;
        Ok(test)
    })
    .await?;
    tracing::info!(test = %test.name, id = %test.id, "Test deleted");

    Ok(Json(json!({ "data": test })))
}

async fn list_schedules(State(state): State<AppState>) -> Json<Value> {
    let entries = state.scheduler.entries();
    Json(json!({
        "data": entries,
        "meta": { "state": state.scheduler.state(), "total": entries.len() }
    }))
}
