use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod pending;

use config::{BusKind, Config};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    anyhow::ensure!(config.dimension > 0, "ROLLCALL_DIMENSION must be positive");

    // Invalid settings at startup are fatal; on reload they are only rejected.
    let settings = config::load_settings(&config.settings_path)
        .with_context(|| format!("loading settings from {}", config.settings_path.display()))?;

    let engine = engine::spawn_engine(&config, settings)
        .with_context(|| format!("opening gallery {}", config.store_path.display()))?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RollcallService::new(engine.clone()))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(
        bus = ?config.bus,
        store = %config.store_path.display(),
        dimension = config.dimension,
        "rollcalld ready"
    );

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                break;
            }
            _ = hangup.recv() => {
                match engine.reload_settings().await {
                    Ok(applied) => tracing::info!(?applied, "settings reloaded on SIGHUP"),
                    Err(e) => tracing::warn!(error = %e, "SIGHUP reload failed; keeping current settings"),
                }
            }
        }
    }

    tracing::info!("rollcalld shutting down");
    Ok(())
}
