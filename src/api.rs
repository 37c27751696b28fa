// src/api.rs
//! Read-only HTTP view over the coordinator for hosts polling over the network.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::coordinator::{Coordinator, FieldSnapshot, SourceStatus};
use crate::error::CoordinatorError;
use crate::fields::FieldValue;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources", get(list_sources))
        .route("/sources/{id}", get(source_fields))
        .route("/sources/{id}/status", get(source_status))
        .route("/sources/{id}/fields/{name}", get(single_field))
        .route("/sources/{id}/refresh", post(refresh_source))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Coordinator errors as HTTP responses.
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::UnknownSource(_) => StatusCode::NOT_FOUND,
            CoordinatorError::NoData(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::Config(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    Json(state.coordinator.statuses())
}

async fn source_fields(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FieldSnapshot>, ApiError> {
    Ok(Json(state.coordinator.get_fields(&id)?))
}

async fn source_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceStatus>, ApiError> {
    Ok(Json(state.coordinator.status(&id)?))
}

#[derive(Serialize)]
struct FieldOut {
    source_id: String,
    name: String,
    value: FieldValue,
    stale: bool,
}

async fn single_field(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let snap = state.coordinator.get_fields(&id)?;
    let Some(value) = snap.fields.get(&name).cloned() else {
        let body = ErrorBody {
            error: format!("source `{id}` has no field `{name}`"),
        };
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    };
    Ok(Json(FieldOut {
        source_id: snap.source_id,
        name,
        value,
        stale: snap.stale,
    })
    .into_response())
}

#[derive(Serialize)]
struct RefreshOut {
    source_id: String,
    triggered: bool,
}

async fn refresh_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RefreshOut>), ApiError> {
    let triggered = state.coordinator.refresh_now(&id)?;
    let status = if triggered {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    Ok((
        status,
        Json(RefreshOut {
            source_id: id,
            triggered,
        }),
    ))
}
