// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::time::Duration;

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resys_identity::{
    api::router,
    config::{AppConfig, LogFormat},
    error::StartupError,
    state::AppState,
    sweeper::RetentionSweeper,
};

/// How long in-flight requests get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_format);

    // Must happen before any TLS or outbound HTTPS use
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| StartupError::Tls("failed to install rustls crypto provider".to_string()))?;

    let state = AppState::from_config(&config)?;
    let addr = config.bind_addr()?;

    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(state.refresh_tokens.clone(), config.refresh_token_retention)
        .with_interval(config.sweep_interval);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = router(state);

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .map_err(|e| StartupError::Tls(format!("failed to load certificate: {e}")))?;

            let handle = Handle::new();
            let signal_handle = handle.clone();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_token.cancel();
                signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            tracing::info!(%addr, "ReSys Identity listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "ReSys Identity listening on http (docs at /docs)");
            let signal_token = shutdown.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    signal_token.cancel();
                })
                .await?;
        }
    }

    shutdown.cancel();
    if let Err(e) = sweeper_handle.await {
        tracing::warn!(error = %e, "Sweeper task did not stop cleanly");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
