//! Scraping playground - binary entry point.
//!
//! ```text
//! main() -> PlaygroundConfig::load() -> Gateway::new() -> server::router()
//!                                            |
//!                                            +-> rate-limit sweeper task
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the default `info` filter.

mod assets;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use playground_config::PlaygroundConfig;
use playground_webfetch::{Gateway, RateLimiter};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = PlaygroundConfig::load()
        .context("failed to load configuration")?
        .unwrap_or_default();

    let gateway = Gateway::new(&config.webfetch()).context("invalid webfetch configuration")?;
    let gateway = Arc::new(gateway);

    let sweeper = spawn_sweeper(gateway.rate_limiter(), gateway.sweep_interval());

    let bind = config.bind_addr();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "Scraping playground listening");

    let app = server::router(gateway).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    Ok(())
}

/// Periodically drop rate-limit entries whose cooldown has elapsed.
fn spawn_sweeper(limiter: Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = limiter.evict_stale(std::time::Instant::now());
            if evicted > 0 {
                tracing::debug!(evicted, remaining = limiter.len(), "Swept rate-limit table");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
