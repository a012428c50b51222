//! Leaderboard HTTP API
//!
//! `GET /api/leaderboard` returns the current top list as a JSON array.

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use crate::leaderboard::{Leaderboard, LeaderboardEntry, StoreError};

/// HTTP handler errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Blocking read task failed.
    #[error("leaderboard task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Error fetching leaderboard: {}", self);
        let body = Json(json!({ "message": "Error fetching leaderboard" }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Router serving the leaderboard, with CORS for `allowed_origin`.
pub fn router(leaderboard: Leaderboard, allowed_origin: &str) -> Router {
    Router::new()
        .route("/api/leaderboard", get(get_leaderboard))
        .with_state(leaderboard)
        .layer(cors_layer(allowed_origin))
}

fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if allowed_origin == "*" {
        return cors.allow_origin(Any);
    }

    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            warn!("Ignoring unusable origin {:?}; cross-origin requests will fail", allowed_origin);
            cors
        }
    }
}

async fn get_leaderboard(
    State(leaderboard): State<Leaderboard>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = tokio::task::spawn_blocking(move || leaderboard.top()).await??;
    Ok(Json(entries))
}
