//! OfferDesk identity sync service.
//!
//! Wires the database pool, identity provider client, auto-approval
//! oracle, mass-sync breaker and sync engine into the webhook router and
//! serves it with graceful shutdown.

mod config;
mod logging;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use offerdesk_sync::{
    AutoApprovalClient, BreakerConfig, HttpIdentityProvider, MassSyncBreaker, SyncEngine,
    SyncSettings,
};
use offerdesk_webhooks::{webhooks_router, WebhooksState};

use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: Configuration error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.log_filter);

    if let Err(e) = run(config).await {
        error!(error = %e, "Service failed");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    info!("Database pool established");

    offerdesk_db::run_migrations(&pool).await?;
    info!("Migrations applied");

    let provider = HttpIdentityProvider::new(
        config.provider_base_url.clone(),
        config.provider_api_token.clone(),
        config.provider_timeout,
    )?;

    let oracle = match &config.oracle_url {
        Some(url) => Some(AutoApprovalClient::new(url.clone(), config.oracle_timeout)?),
        None => {
            info!("Auto-approval oracle not configured; new accounts go to manual review");
            None
        }
    };

    let breaker = Arc::new(MassSyncBreaker::new(BreakerConfig {
        window: config.breaker_window,
        ceiling: config.breaker_ceiling,
    }));

    let engine = Arc::new(SyncEngine::new(
        pool.clone(),
        Arc::new(provider),
        oracle,
        breaker,
        SyncSettings {
            approval_required: config.approval_required,
            default_status: config.default_status,
            credit_grant_amount: config.credit_grant_amount,
        },
    ));

    let state = WebhooksState::new(engine, config.webhook_signing_secret.clone());
    let app = Router::new()
        .route("/health", get(health))
        .merge(webhooks_router(state))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
