//! Route handlers for the limiter API.
//!
//! | Method | Path                    | Success        |
//! |--------|-------------------------|----------------|
//! | GET    | `/limit/{name}/acquire` | 200 / 429      |
//! | GET    | `/limit/{name}`         | 200 + config   |
//! | POST   | `/limit`                | 201            |
//! | PUT    | `/limit`                | 202            |
//! | DELETE | `/limit/{name}`         | 200            |

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument, warn};

use crate::error::RatekeeperError;
use crate::limiter::{Acquisition, LimiterConfig};
use crate::registry::LimiterRegistry;

/// Shared state for the route handlers.
#[derive(Clone)]
pub struct AppState {
    /// The limiter registry
    pub registry: Arc<LimiterRegistry>,
    /// How long an acquire request waits for a token
    pub acquire_timeout: Duration,
}

impl AppState {
    pub fn new(registry: Arc<LimiterRegistry>, acquire_timeout: Duration) -> Self {
        Self {
            registry,
            acquire_timeout,
        }
    }
}

/// Build the router for the limiter API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/limit", post(create_limit).put(update_limit))
        .route("/limit/{name}", get(get_limit).delete(delete_limit))
        .route("/limit/{name}/acquire", get(acquire_token))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[instrument(skip(state))]
async fn acquire_token(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, RatekeeperError> {
    match state.registry.acquire_token(&name, state.acquire_timeout).await? {
        Acquisition::Granted => Ok(StatusCode::OK),
        Acquisition::Exhausted => {
            debug!(limiter = %name, "No token within budget");
            Ok(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}

#[instrument(skip(state))]
async fn get_limit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<LimiterConfig>, RatekeeperError> {
    let config = state.registry.get(&name).await?;
    Ok(Json(config))
}

#[instrument(skip(state, body))]
async fn create_limit(State(state): State<AppState>, body: Bytes) -> Response {
    let config = match parse_config(&body) {
        Ok(config) => config,
        Err(response) => return response,
    };
    match state.registry.create(config) {
        Ok(_) => StatusCode::CREATED.into_response(),
        Err(e) => e.into_response(),
    }
}

#[instrument(skip(state, body))]
async fn update_limit(State(state): State<AppState>, body: Bytes) -> Response {
    let config = match parse_config(&body) {
        Ok(config) => config,
        Err(response) => return response,
    };
    match state.registry.update(config) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => e.into_response(),
    }
}

#[instrument(skip(state))]
async fn delete_limit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, RatekeeperError> {
    state.registry.delete(&name)?;
    Ok(StatusCode::OK)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "limiters": state.registry.len(),
    }))
}

/// Decode a JSON limiter configuration, answering 400 when it is malformed.
///
/// The content type is not checked, so plain clients can post raw JSON.
#[allow(clippy::result_large_err)]
fn parse_config(body: &[u8]) -> Result<LimiterConfig, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Malformed limiter configuration");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Malformed limiter configuration: {}", e) })),
        )
            .into_response()
    })
}
