use crate::{error::ApiError, models::AppState};
use axum::Router;

pub mod admin_routes;
pub mod appointment_routes;
pub mod auth_routes;
pub mod health_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth_routes::router())
        .nest("/api/users", user_routes::router())
        .nest("/api/appointments", appointment_routes::router())
        .nest("/api/admin", admin_routes::router())
        .merge(health_routes::router())
        .fallback(route_not_found)
        .with_state(state)
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
