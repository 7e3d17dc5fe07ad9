use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

use super::dto::HealthResponse;

const PING_TIMEOUT: Duration = Duration::from_secs(3);

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ping = tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&state.db));

    match ping.await {
        Ok(Ok(_)) => (StatusCode::OK, Json(HealthResponse { status: "healthy" })),
        Ok(Err(err)) => {
            tracing::warn!(%err, "health check db ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "unhealthy" }),
            )
        }
        Err(_) => {
            tracing::warn!("health check db ping timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "unhealthy" }),
            )
        }
    }
}
