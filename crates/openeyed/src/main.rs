use anyhow::{Context, Result};
use axum::http::{header, Method};
use openeye_core::{DetectionMode, OnnxEncoder};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod auth;
mod cameras;
mod config;
mod engine;
mod error;
mod extract;
mod faces;
mod routes;
mod state;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("openeyed starting");

    let config = config::Config::from_env();
    tracing::info!(
        bind = %config.bind,
        faces_dir = %config.faces_dir.display(),
        encodings = %config.encodings_path.display(),
        encrypted = config.encodings_key.is_some(),
        db = %config.db_path.display(),
        "configuration loaded"
    );

    // AppState switches the detector to the mode stored with the gallery.
    let encoder = OnnxEncoder::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        DetectionMode::default(),
    )
    .context("failed to load face models")?;
    tracing::info!(model_dir = %config.model_dir.display(), "face models loaded");

    let state = state::AppState::new(&config, Box::new(encoder)).await?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let app = routes::router(state).layer(cors);

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("cannot bind {}", config.bind))?;
    tracing::info!(address = %config.bind, "openeyed ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("openeyed shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received ctrl-c");
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("received SIGTERM");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
