//! Gateway server library.
//!
//! Provides a reusable server function to serve the gateway either for the
//! binary, or for integration tests.

#![deny(missing_docs)]

mod auth;
mod error;
mod logger;
mod tracing;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use auth::AuthLayer;
use axum::{Router, http::StatusCode, routing::get};
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use telemetry::TelemetryGuard;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::tracing::TracingLayer;

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "server=debug,llm=debug")
    pub log_filter: String,
    /// The version string to log on startup
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if port 0 was specified)
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the gateway server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    let _telemetry_guard = init_otel(&config, log_filter).await;

    log::info!("llm gateway {version}");

    let mut app = Router::new();
    let mut llm_exposed = false;

    if config.llm.enabled {
        let llm_router = llm::router(&config)
            .await
            .map_err(|err| anyhow!("Failed to initialize LLM router: {err}"))?;

        app = app.merge(llm_router.layer(
            tower::ServiceBuilder::new()
                .layer(TracingLayer::with_config(Arc::new(config.telemetry.clone())))
                .layer(AuthLayer::new(config.llm.api_keys.clone())),
        ));

        llm_exposed = true;
    } else {
        log::debug!("LLM dispatch is disabled in configuration");
    }

    if config.server.health.enabled {
        app = app.route(&config.server.health.path, get(health));
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .expect("Failed to send back bound address.");
    }

    if !llm_exposed {
        log::warn!("Server starting with no functional endpoints. Configure [llm.accounts] to enable dispatch.");
    }

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            if llm_exposed {
                log::info!("LLM messages endpoint: https://{listen_address}{}", config.llm.path);
            }

            let server = axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());

            tokio::select! {
                result = server => {
                    result.map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
                }
                _ = shutdown_signal.cancelled() => {
                    log::info!("Received shutdown signal, shutting down gracefully...");
                }
            }
        }
        None => {
            if llm_exposed {
                log::info!("LLM messages endpoint: http://{listen_address}{}", config.llm.path);
            }

            tokio::select! {
                result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
                    result.map_err(|e| anyhow!("Failed to start HTTP server: {}", e))?;
                }
                _ = shutdown_signal.cancelled() => {
                    log::info!("Received shutdown signal, shutting down gracefully...");
                }
            }
        }
    }

    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn init_otel(config: &Config, log_filter: String) -> Option<TelemetryGuard> {
    // Don't let telemetry code log during initialization to avoid recursion
    match telemetry::init(&config.telemetry).await {
        Ok(guard) => {
            let otel_appender = guard.logs_appender().cloned();
            logger::init(&log_filter, otel_appender);

            Some(guard)
        }
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {e}");
            logger::init(&log_filter, None);

            None
        }
    }
}
