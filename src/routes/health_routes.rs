use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ApiOk, AppState};

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub database: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}

/// Always answers 200 so a load balancer can tell "process up, DB down"
/// apart from "process gone".
pub async fn health(State(state): State<AppState>) -> Json<ApiOk<HealthData>> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unreachable");
            "down"
        }
    };

    let status = if database == "up" { "ok" } else { "degraded" };

    Json(ApiOk::with_message(
        "Medical booking API is running",
        HealthData {
            status,
            timestamp: Utc::now(),
            database,
        },
    ))
}
