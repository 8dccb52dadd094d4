/**
 * EDGE KERNEL - Point d'entrée du pont edge
 *
 * Boot : config → stockage → moteur de règles (+ seed) → lien série
 * (auto-connect optionnel) → HTTP. Ctrl-C : arrêt HTTP propre puis
 * déconnexion du lien (vidage final du buffer).
 */

use anyhow::Context;
use edge_kernel::config::load_config;
use edge_kernel::health::HealthTracker;
use edge_kernel::http::{self, AppState};
use edge_kernel::ports::JsonStore;
use edge_kernel::rules::RuleEngine;
use edge_kernel::serial::transport::SerialOpener;
use edge_kernel::serial::DeviceLink;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("failed to create data dir {}", cfg.data_dir.display()))?;
    let store = Arc::new(
        JsonStore::open_with_retention(&cfg.data_dir, cfg.telemetry_retention)
            .context("failed to open data store")?,
    );

    let rules = Arc::new(RuleEngine::new(store.clone()));
    match rules.seed_default_rules() {
        Ok(0) => {}
        Ok(n) => info!("first run: {n} default rules created"),
        Err(e) => error!("failed to seed default rules: {e}"),
    }

    let link = DeviceLink::new(rules.clone(), store.clone(), Arc::new(SerialOpener), cfg.serial.link_config());

    if let Some(port) = cfg.serial.port.as_deref() {
        if let Err(e) = link.connect(port, cfg.serial.baud_rate).await {
            warn!("auto-connect to {port} failed: {e}");
        }
    }

    let app_state = AppState {
        link: link.clone(),
        rules,
        telemetry: store,
        health_tracker: HealthTracker::new(),
        api_key: cfg.api_key.clone(),
    };
    let app = http::build_router(app_state);

    let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    link.disconnect().await?;
    info!("edge kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
