//! Named lock-manager instance lifecycle.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use lockmesh_common::{LockError, NodeId, OwnerId, ResourceId, Result};

use crate::cluster::{
    LeaderElection, LivenessRegistry, LoopbackTransport, Membership, OwnerLiveness, Placement,
    StaticCluster, Transport,
};
use crate::config::ManagerConfig;
use crate::coordinator::{Coordinator, LockMode, LockOutcome};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::monitor::LeaseMonitor;
use crate::state::ManagerState;
use crate::store::LockStore;

/// Cluster collaborators a manager is wired to.
pub struct ClusterServices {
    pub membership: Arc<dyn Membership>,
    pub placement: Arc<dyn Placement>,
    pub leader: Arc<dyn LeaderElection>,
    pub transport: Arc<dyn Transport>,
    pub liveness: Arc<dyn OwnerLiveness>,
}

/// A named lock-manager instance.
///
/// Owns the node's lock store, the acquisition coordinator, and the lease
/// monitor task. Stopping the instance cancels the sweep; nothing persists
/// across restarts, so a restarted node begins with an empty store.
pub struct LockManager {
    name: String,
    node_id: NodeId,
    config: ManagerConfig,
    store: Arc<LockStore>,
    coordinator: Coordinator,
    liveness: Arc<dyn OwnerLiveness>,
    metrics: Arc<Metrics>,
    state: Arc<RwLock<ManagerState>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: RwLock<Option<mpsc::Receiver<()>>>,
}

impl LockManager {
    /// Create a new manager instance wired to the given cluster services.
    pub fn new(config: ManagerConfig, node_id: NodeId, services: ClusterServices) -> Self {
        Self::with_store(config, node_id, Arc::new(LockStore::new()), services)
    }

    /// Single-node instance: the node is its own cluster, leader and
    /// placement target, with calls looped back to the local store.
    pub fn single_node(
        config: ManagerConfig,
        node_id: NodeId,
        liveness: Arc<LivenessRegistry>,
    ) -> Self {
        let store = Arc::new(LockStore::new());
        let cluster = Arc::new(StaticCluster::single(node_id.clone()));
        let services = ClusterServices {
            membership: cluster.clone(),
            placement: cluster.clone(),
            leader: cluster,
            transport: Arc::new(LoopbackTransport::new(store.clone())),
            liveness,
        };
        Self::with_store(config, node_id, store, services)
    }

    fn with_store(
        config: ManagerConfig,
        node_id: NodeId,
        store: Arc<LockStore>,
        services: ClusterServices,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let metrics = Arc::new(Metrics::new());
        let coordinator = Coordinator::new(
            node_id.clone(),
            store.clone(),
            services.membership,
            services.placement,
            services.leader,
            services.transport,
            metrics.clone(),
        );

        Self {
            name: config.name.clone(),
            node_id,
            config,
            store,
            coordinator,
            liveness: services.liveness,
            metrics,
            state: Arc::new(RwLock::new(ManagerState::Starting)),
            shutdown_tx,
            shutdown_rx: RwLock::new(Some(shutdown_rx)),
        }
    }

    /// Start the manager and its lease monitor.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ManagerState::Starting {
                return Err(LockError::AlreadyRunning(self.name.clone()));
            }
            *state = ManagerState::Running;
        }

        let shutdown_rx = self
            .shutdown_rx
            .write()
            .take()
            .ok_or_else(|| LockError::Internal("shutdown channel already taken".to_string()))?;

        let monitor = LeaseMonitor::new(
            self.store.clone(),
            self.liveness.clone(),
            self.config.lease.clone(),
            self.metrics.clone(),
        );
        tokio::spawn(monitor.run(shutdown_rx));

        info!(node_id = %self.node_id, "Lock manager started");
        Ok(())
    }

    /// Stop the manager gracefully; cancels the lease sweep.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ManagerState::Running {
                return Err(LockError::NotRunning(self.name.clone()));
            }
            *state = ManagerState::ShuttingDown;
        }
        let _ = self.shutdown_tx.send(()).await;
        *self.state.write() = ManagerState::Stopped;
        info!("Lock manager stopped");
        Ok(())
    }

    /// Acquire `resource` for `owner` under `mode`.
    ///
    /// Grant and deny are both ordinary outcomes; an error here only means
    /// the instance itself is not running.
    pub async fn acquire(
        &self,
        resource: &ResourceId,
        owner: &OwnerId,
        mode: LockMode,
    ) -> Result<LockOutcome> {
        self.ensure_running()?;
        Ok(self.coordinator.acquire(resource, owner, mode).await)
    }

    /// Release `resource` for `owner` under `mode`.
    pub async fn release(
        &self,
        resource: &ResourceId,
        owner: &OwnerId,
        mode: LockMode,
    ) -> Result<LockOutcome> {
        self.ensure_running()?;
        Ok(self.coordinator.release(resource, owner, mode).await)
    }

    /// Get the current manager state.
    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This node's ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Local store, for wiring a transport server's request handling.
    pub fn store(&self) -> Arc<LockStore> {
        self.store.clone()
    }

    /// Number of locks currently held on this node.
    pub fn held_locks(&self) -> usize {
        self.store.len()
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state.read().accepts_requests() {
            Ok(())
        } else {
            Err(LockError::NotRunning(self.name.clone()))
        }
    }
}
