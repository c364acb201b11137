mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod lifecycle;
mod models;
mod routes;
mod scheduling;

#[cfg(test)]
mod test_support;

use crate::{auth::TokenKeys, config::Config, models::AppState};

use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::{HeaderValue, header};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;

    if cfg.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let state = AppState {
        db: pool,
        tokens: TokenKeys::new(&cfg.jwt_secret, chrono::Duration::hours(cfg.jwt_expire_hours)),
    };

    let cors = CorsLayer::new()
        .allow_origin(cors_origin(cfg.frontend_url.as_deref())?)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Without FRONTEND_URL any origin may call the API (local dev).
fn cors_origin(frontend_url: Option<&str>) -> anyhow::Result<AllowOrigin> {
    match frontend_url {
        Some(url) => {
            let origin = HeaderValue::from_str(url.trim_end_matches('/'))?;
            tracing::info!(origin = url, "CORS restricted to frontend origin");
            Ok(AllowOrigin::exact(origin))
        }
        None => Ok(AllowOrigin::any()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
