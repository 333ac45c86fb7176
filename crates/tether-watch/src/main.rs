//! # tether-watch
//!
//! Subscribes to a list of pub/sub topics through a tether pool and logs
//! every message delivered on them.
//!
//! ## Usage
//!
//! ```bash
//! # Run with tether.toml from the working directory
//! tether-watch
//!
//! # Run with environment variables
//! TETHER_AUTH_TOKEN=... TETHER_PROXY=http://127.0.0.1:3128 tether-watch
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use std::sync::Arc;
use tether_core::{LogStatus, Pool, StaticToken};
use tether_transport::{WebSocketConfig, WebSocketConnector};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    info!(
        endpoint = %config.endpoint,
        proxy = config.proxy.as_deref().unwrap_or("none"),
        topics = config.topics.len(),
        "Starting tether-watch"
    );
    if config.auth_token.is_empty() {
        warn!("No auth token configured; the endpoint may reject LISTEN requests");
    }

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let pool_config = config.pool_config();
    let connector = WebSocketConnector::new(WebSocketConfig {
        connect_timeout: pool_config.connect_timeout,
        ..WebSocketConfig::default()
    });
    let pool = Pool::new(
        pool_config,
        Arc::new(connector),
        Arc::new(StaticToken::new(config.auth_token.clone())),
        Arc::new(LogStatus),
    )?;

    let topics = handlers::log_topics(&config.topics);
    let subscribe = async {
        pool.start().await;
        pool.add_topics(topics).await
    };

    // The first connect can wait forever on an unreachable endpoint.
    tokio::select! {
        result = subscribe => {
            result?;
            info!(connections = pool.connection_count().await, "Subscribed");
            tokio::signal::ctrl_c().await?;
        }
        result = tokio::signal::ctrl_c() => result?,
    }

    info!("Shutting down");
    pool.stop(true).await;
    pool.settled().await;

    Ok(())
}
