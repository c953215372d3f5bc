mod app;
mod error;
mod files;
mod routes;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use promptdeck_config::{load_file_config_into_env, AppConfig};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    if let Err(err) = load_file_config_into_env() {
        warn!("ignoring config file: {err:#}");
    }
    let config = AppConfig::from_env()?;
    info!(
        api_addr = %config.api_addr,
        references_dir = %config.references_dir.display(),
        lora_dir = %config.lora_dir.display(),
        cache_dir = %config.cache_dir.display(),
        prompts_file = %config.prompts_file.display(),
        api_key = config.api_key.is_some(),
        "loaded configuration"
    );

    let state = AppState::from_config(&config).await?;
    let app = build_router(state.clone(), config.api_key.clone());

    let addr: SocketAddr = config
        .api_addr
        .parse()
        .with_context(|| format!("invalid api address {}", config.api_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "starting api server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    if state.jobs.cancel() {
        info!("cancelled running download job on shutdown");
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,promptdeck_scan=debug"));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_max_level(Level::TRACE)
        .init();
}
