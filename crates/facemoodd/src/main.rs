//! facemoodd — facemood web daemon.
//!
//! Serves the login / registration / admin approval UI and runs uploaded
//! images through the ONNX emotion detector on a dedicated engine thread.

mod config;
mod engine;
mod error;
mod flow;
mod render;
mod routes;
mod session;
mod state;
mod view;

use anyhow::{Context, Result};
use config::Config;
use facemood_auth::{AuthService, RegisterOutcome, UserStore};
use facemood_core::EmotionDetector;
use state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facemoodd starting");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        bind = %config.bind,
        users = %config.users_path.display(),
        model = %config.model_path.display(),
        "configuration loaded"
    );

    let auth = AuthService::new(UserStore::new(&config.users_path));
    seed_admin(&auth, &config)?;

    // Load the model up front so a missing or broken file fails startup.
    let detector = EmotionDetector::load(&config.model_path, config.detector_options())
        .with_context(|| format!("failed to load model {}", config.model_path.display()))?;
    let (engine, engine_thread) = engine::spawn_engine(detector, config.max_image_side)?;

    let bind = config.bind;
    let router = routes::build_router(AppState::new(auth, engine, config));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "facemoodd ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facemoodd shutting down");
    // The router held the last engine handles; the thread drains and exits.
    tokio::task::spawn_blocking(move || engine_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    Ok(())
}

/// Create the configured admin account when the store has none.
fn seed_admin(auth: &AuthService, config: &Config) -> Result<()> {
    let Some(seed) = &config.admin_seed else {
        return Ok(());
    };
    if auth.has_admin()? {
        tracing::debug!("admin account present, seed skipped");
        return Ok(());
    }

    match auth.create_admin(&seed.username, &seed.password)? {
        RegisterOutcome::Registered => {
            tracing::info!(username = %seed.username, "seeded admin account")
        }
        RegisterOutcome::AlreadyExists => tracing::warn!(
            username = %seed.username,
            "cannot seed admin: username taken by a non-admin account"
        ),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
