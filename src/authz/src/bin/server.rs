//! # IAM Authorization Server
//!
//! HTTP server exposing the OAuth2 token endpoint of the scope
//! authorization engine, backed by in-memory stores.
//!
//! ## Endpoints
//!
//! - `POST /token` - Token endpoint
//! - `GET /health` - Health check
//! - `GET /scope-policies` - Stored scope policies (bearer, `iam:admin.read`)
//!
//! ## Configuration
//!
//! Environment variables:
//! - `IAM_AUTHZ_CONFIG` - Path to a JSON configuration file
//! - `PORT` - HTTP server port (default: 8080)
//! - `IAM_ISSUER` - Issuer of minted tokens
//! - `RUST_LOG` - Log level (default: info)

use anyhow::Context;
use axum::serve;
use iam_authz::{
    audit::{AuditPublisher, CompositeAuditPublisher, InMemoryAuditLog, TracingAuditPublisher},
    http::{router, AppState},
    AuthorizationServer, AuthzConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting IAM Authorization Server v{}", iam_authz::VERSION);

    let config = AuthzConfig::from_env().context("failed to load configuration")?;

    info!("Configuration:");
    info!("  Port: {}", config.server.port);
    info!("  Issuer: {}", config.tokens.issuer);
    info!("  Scope matchers: {}", config.scope_matchers.len());
    info!("  AUP gate: {}", if config.aup.enabled { "enabled" } else { "disabled" });

    let audit: Arc<dyn AuditPublisher> = Arc::new(CompositeAuditPublisher::new(vec![
        Arc::new(TracingAuditPublisher),
        Arc::new(InMemoryAuditLog::new()),
    ]));

    let port = config.server.port;
    let server = AuthorizationServer::builder(config)
        .audit(audit)
        .build()
        .context("failed to initialize authorization server")?;

    let app = router(AppState::new(Arc::new(server)));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    if let Err(e) = serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("HTTP server error: {}", e);
        return Err(e.into());
    }

    info!("Server shut down gracefully");
    Ok(())
}
