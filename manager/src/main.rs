//! LockMesh node binary.
//!
//! Runs a single-node lock manager: local mode works out of the box and the
//! cluster modes degenerate to this node. A clustered deployment wires
//! [`LockManager::new`] to real membership, election and transport services
//! instead.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lockmesh_common::NodeId;
use lockmesh_manager::cluster::LivenessRegistry;
use lockmesh_manager::{LockManager, ManagerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting LockMesh node");

    // Load configuration
    let config = ManagerConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    // Generate node ID if not provided
    let node_id = NodeId::new(
        config
            .node_id
            .clone()
            .unwrap_or_else(|| format!("lockmesh-{}", uuid::Uuid::new_v4())),
    );
    info!(node_id = %node_id, "Node ID assigned");

    let liveness = Arc::new(LivenessRegistry::new());
    let manager = Arc::new(LockManager::single_node(
        config.clone(),
        node_id.clone(),
        liveness,
    ));

    // Set up graceful shutdown
    let manager_clone = manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Shutdown signal received");
        if let Err(e) = manager_clone.stop().await {
            error!(error = %e, "Error during shutdown");
        }
    });

    // Start manager
    manager.start().await?;

    info!(
        node_id = %node_id,
        name = %manager.name(),
        lease_expiry_secs = config.lease.expiry.as_secs(),
        sweep_interval_secs = config.lease.sweep_interval.as_secs(),
        "Lock manager running"
    );

    // Keep running until shutdown
    loop {
        if !manager.state().accepts_requests() {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }

    info!("Node shutdown complete");
    Ok(())
}
