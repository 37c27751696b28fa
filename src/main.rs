//! myriad-box: binary entrypoint.
//! Loads source configs, starts one poll loop per source and serves the
//! read-only HTTP view until ctrl-c.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use myriad_box::api::{self, AppState};
use myriad_box::feeds::config::load_sources_default;
use myriad_box::feeds::transport::ReqwestTransport;
use myriad_box::metrics::Metrics;
use myriad_box::Coordinator;

const ENV_BIND: &str = "MYRIAD_BIND";
const DEFAULT_BIND: &str = "127.0.0.1:8080";
const ENV_LOG_JSON: &str = "MYRIAD_LOG_JSON";

/// Compact logs by default; `MYRIAD_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("myriad_box=info,warn"));
    let json = std::env::var(ENV_LOG_JSON).ok().is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init()?;
    let coordinator = Arc::new(Coordinator::new(Arc::new(ReqwestTransport::new())));

    let configs = load_sources_default().context("loading source configs")?;
    if configs.is_empty() {
        warn!("no sources configured; set MYRIAD_SOURCES_PATH or add config/sources.toml");
    }
    for cfg in configs {
        let id = cfg.source_id.clone();
        // The observer is attached before the first fetch starts.
        let registered = coordinator.register_source_observed(cfg, |update| {
            info!(
                source = %update.source_id,
                generation = update.generation,
                fields = update.fields.len(),
                "fields updated"
            );
            Ok(())
        });
        // A bad source is reported and skipped; the others keep running.
        if let Err(e) = registered {
            warn!(source = %id, error = %e, "source rejected");
        }
    }

    let app = api::router(AppState::new(Arc::clone(&coordinator))).merge(metrics.router());

    let bind = std::env::var(ENV_BIND).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("{ENV_BIND}=`{bind}` is not a socket address"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, sources = coordinator.source_ids().len(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server")?;

    coordinator.shutdown().await;
    Ok(())
}
