use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing::info;

mod adapters;
mod api;
mod config;
mod decision;
mod error;
mod executor;
mod policy;
mod registry;
mod router;
mod types;

pub use config::Settings;
pub use error::AppError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /health and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    let settings = Settings::from_env().context("Failed to load settings from environment")?;

    // Initialise tracing — RUST_LOG wins, LOG_LEVEL otherwise.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(settings.log_level.to_lowercase())
            }),
        )
        .init();

    info!(
        port = settings.port,
        ollama = %settings.ollama_base_url,
        registry_configured = !settings.supabase_url.is_empty(),
        "tier-router starting"
    );

    let port = settings.port;
    let state = Arc::new(router::RouterState::from_settings(settings));

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    // Permissive CORS: the service sits behind workflow engines on a private
    // network and performs no caller authentication.
    let app = api::router(Arc::clone(&state))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
        );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("tier-router shutting down");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM — whichever lands first.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    // Non-unix targets only get the interrupt key. If even that handler
    // cannot be installed, park forever rather than shut down spuriously.
    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Lightweight healthcheck: GET /health and exit 0 on 200, 1 otherwise.
/// Invoked via `tier-router --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("ROUTER_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8100);

    let url = format!("http://127.0.0.1:{port}/health");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
