//! Eviction agent - node pressure daemon
//!
//! Runs on every node, watching memory, filesystem, inode, and process-id
//! headroom against configured thresholds. Under sustained pressure it
//! advertises node conditions, refuses risky admissions, reclaims node-level
//! resources, and evicts workloads as a last resort.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use eviction_agent_lib::{EvictionManagerBuilder, LogEventRecorder};

mod api;
mod config;
mod runtime;
mod sysstats;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting eviction-agent");

    let agent_config = config::AgentConfig::load()?;
    let eviction_config = agent_config.eviction_config()?;
    info!(
        node_name = %agent_config.node_name,
        thresholds = eviction_config.thresholds.len(),
        "Agent configured"
    );

    let monitoring_interval = eviction_config.monitoring_interval;
    let manager = Arc::new(
        EvictionManagerBuilder::new(eviction_config)
            .snapshot_provider(Arc::new(sysstats::ProcStatsProvider::new()))
            .killer(Arc::new(runtime::UnconfiguredRuntime))
            .image_gc(Arc::new(runtime::UnconfiguredRuntime))
            .container_gc(Arc::new(runtime::UnconfiguredRuntime))
            .recorder(Arc::new(LogEventRecorder::new(
                agent_config.node_name.clone(),
            )))
            .build()?,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let loop_handle = tokio::spawn(manager.clone().start(
        Arc::new(runtime::StaticDiskLayout::new(agent_config.dedicated_image_fs)),
        Arc::new(|| Vec::new()),
        shutdown_rx,
    ));

    let state = Arc::new(api::AppState::new(manager, monitoring_interval));
    let api_handle = tokio::spawn(api::serve(agent_config.api_port, state));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;
    api_handle.abort();

    Ok(())
}
