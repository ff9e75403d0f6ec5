//! Lease sweeping and crash recovery for abandoned locks.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use lockmesh_common::{OwnerId, ResourceId};

use crate::cluster::OwnerLiveness;
use crate::config::LeaseConfig;
use crate::metrics::Metrics;
use crate::store::LockStore;

/// Watch state for one suspect owner.
struct OwnerWatch {
    /// Resources swept past the lease while held by this owner.
    resources: HashSet<ResourceId>,
    /// Task forwarding the liveness subscription into the monitor loop.
    forwarder: JoinHandle<()>,
}

/// Periodic lease sweep plus crash-driven reclamation.
///
/// The monitor never expires a lock by age alone. Exceeding the lease only
/// installs a liveness watch on the owner; a lock is deleted once its owner
/// is observed to have terminated, and even then only if the owner still
/// holds it. Liveness subscriptions are a limited resource, which is why
/// they go in lazily, on the first sweep that finds a lock suspect, instead
/// of at acquire time for every lock.
///
/// Sweeps and termination handling run on one loop and never race each
/// other; both run alongside store traffic from remote callers.
pub struct LeaseMonitor {
    store: Arc<LockStore>,
    liveness: Arc<dyn OwnerLiveness>,
    config: LeaseConfig,
    metrics: Arc<Metrics>,
    watches: HashMap<OwnerId, OwnerWatch>,
    terminated_tx: mpsc::Sender<OwnerId>,
    terminated_rx: mpsc::Receiver<OwnerId>,
}

impl LeaseMonitor {
    /// Create a monitor over `store`.
    pub fn new(
        store: Arc<LockStore>,
        liveness: Arc<dyn OwnerLiveness>,
        config: LeaseConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (terminated_tx, terminated_rx) = mpsc::channel(64);
        Self {
            store,
            liveness,
            config,
            metrics,
            watches: HashMap::new(),
            terminated_tx,
            terminated_rx,
        }
    }

    /// Run until the shutdown signal arrives.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) {
        let start = time::Instant::now() + self.config.sweep_interval;
        let mut ticker = time::interval_at(start, self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                Some(owner) = self.terminated_rx.recv() => self.handle_termination(owner),
                _ = shutdown.recv() => break,
            }
        }

        // The subscriptions themselves are torn down with the runtime; the
        // forwarders just have to stop.
        for (_, watch) in self.watches.drain() {
            watch.forwarder.abort();
        }
        debug!("Lease monitor stopped");
    }

    /// One sweep pass: put every lock older than the lease under watch.
    ///
    /// A stale lock stays valid and usable; the sweep only makes its owner
    /// a crash suspect.
    fn sweep(&mut self) {
        for (resource, owner) in self.store.aged_over(self.config.expiry) {
            match self.watches.entry(owner.clone()) {
                Entry::Occupied(mut watch) => {
                    watch.get_mut().resources.insert(resource);
                }
                Entry::Vacant(slot) => {
                    debug!(owner = %owner, resource = %resource, "Lock past lease, watching owner");
                    let subscription = self.liveness.watch(&owner);
                    let notify = self.terminated_tx.clone();
                    let subject = owner.clone();
                    let forwarder = tokio::spawn(async move {
                        if subscription.await.is_ok() {
                            let _ = notify.send(subject).await;
                        }
                    });
                    slot.insert(OwnerWatch {
                        resources: HashSet::from([resource]),
                        forwarder,
                    });
                }
            }
        }
        self.metrics.set_owners_watched(self.watches.len() as u64);
    }

    /// A watched owner terminated: reclaim whatever it still holds.
    ///
    /// Each resource is re-checked against its current owner, so a lock
    /// released and re-acquired by someone else since the sweep stays put.
    fn handle_termination(&mut self, owner: OwnerId) {
        let Some(watch) = self.watches.remove(&owner) else {
            return;
        };

        let mut reclaimed = 0usize;
        for resource in watch.resources {
            if self.store.reclaim(&resource, &owner) {
                self.metrics.lock_reclaimed();
                reclaimed += 1;
            }
        }
        self.metrics.set_owners_watched(self.watches.len() as u64);
        info!(owner = %owner, reclaimed, "Reclaimed locks of terminated owner");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LivenessRegistry;
    use std::time::Duration;

    const EXPIRY: Duration = Duration::from_secs(30);

    fn test_monitor(
        store: Arc<LockStore>,
        registry: Arc<LivenessRegistry>,
    ) -> LeaseMonitor {
        LeaseMonitor::new(
            store,
            registry,
            LeaseConfig::with_expiry(EXPIRY),
            Arc::new(Metrics::new()),
        )
    }

    fn resource(name: &str) -> ResourceId {
        ResourceId::new(name)
    }

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_watches_but_does_not_delete() {
        let store = Arc::new(LockStore::new());
        let registry = Arc::new(LivenessRegistry::new());
        let _alive = registry.announce(owner("p"));
        let mut monitor = test_monitor(store.clone(), registry);

        store.acquire(&resource("jobQ1"), &owner("p"));
        time::advance(EXPIRY + Duration::from_secs(1)).await;
        monitor.sweep();

        assert!(monitor.watches.contains_key(&owner("p")));
        // Still held and still usable by its owner.
        assert_eq!(store.owner_of(&resource("jobQ1")), Some(owner("p")));
        assert!(store.acquire(&resource("jobQ1"), &owner("p")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_ignores_fresh_locks() {
        let store = Arc::new(LockStore::new());
        let registry = Arc::new(LivenessRegistry::new());
        let _alive = registry.announce(owner("p"));
        let mut monitor = test_monitor(store.clone(), registry);

        store.acquire(&resource("jobQ1"), &owner("p"));
        monitor.sweep();

        assert!(monitor.watches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_sweep_extends_existing_watch() {
        let store = Arc::new(LockStore::new());
        let registry = Arc::new(LivenessRegistry::new());
        let _alive = registry.announce(owner("p"));
        let mut monitor = test_monitor(store.clone(), registry);

        store.acquire(&resource("jobQ1"), &owner("p"));
        time::advance(EXPIRY + Duration::from_secs(1)).await;
        monitor.sweep();

        store.acquire(&resource("jobQ2"), &owner("p"));
        time::advance(EXPIRY + Duration::from_secs(1)).await;
        monitor.sweep();

        let watch = &monitor.watches[&owner("p")];
        assert_eq!(watch.resources.len(), 2);
        assert_eq!(monitor.watches.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_termination_reclaims_watched_locks() {
        let store = Arc::new(LockStore::new());
        let registry = Arc::new(LivenessRegistry::new());
        let alive = registry.announce(owner("p"));
        let mut monitor = test_monitor(store.clone(), registry);

        store.acquire(&resource("jobQ1"), &owner("p"));
        time::advance(EXPIRY + Duration::from_secs(1)).await;
        monitor.sweep();

        drop(alive);
        let terminated = monitor.terminated_rx.recv().await.unwrap();
        monitor.handle_termination(terminated);

        assert!(store.is_empty());
        assert!(monitor.watches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquired_resource_survives_stale_termination() {
        let store = Arc::new(LockStore::new());
        let registry = Arc::new(LivenessRegistry::new());
        let alive = registry.announce(owner("p"));
        let mut monitor = test_monitor(store.clone(), registry);

        store.acquire(&resource("jobQ1"), &owner("p"));
        time::advance(EXPIRY + Duration::from_secs(1)).await;
        monitor.sweep();

        // p releases and q takes over before the termination lands.
        store.release(&resource("jobQ1"), &owner("p"));
        store.acquire(&resource("jobQ1"), &owner("q"));

        drop(alive);
        let terminated = monitor.terminated_rx.recv().await.unwrap();
        monitor.handle_termination(terminated);

        assert_eq!(store.owner_of(&resource("jobQ1")), Some(owner("q")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_owner_is_never_reclaimed_by_age() {
        let store = Arc::new(LockStore::new());
        let registry = Arc::new(LivenessRegistry::new());
        let _alive = registry.announce(owner("p"));
        let mut monitor = test_monitor(store.clone(), registry);

        store.acquire(&resource("jobQ1"), &owner("p"));
        for _ in 0..5 {
            time::advance(EXPIRY * 2).await;
            monitor.sweep();
        }

        assert_eq!(store.owner_of(&resource("jobQ1")), Some(owner("p")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_reclaims_after_crash() {
        let store = Arc::new(LockStore::new());
        let registry = Arc::new(LivenessRegistry::new());
        let alive = registry.announce(owner("p"));
        let monitor = test_monitor(store.clone(), registry);

        store.acquire(&resource("jobQ1"), &owner("p"));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let loop_handle = tokio::spawn(monitor.run(shutdown_rx));
        // Let the loop register its interval before the clock moves;
        // `advance` itself only yields after advancing.
        tokio::task::yield_now().await;

        // First sweep happens one interval in; by then the lock is past the
        // lease (the interval is twice the expiry).
        time::advance(EXPIRY * 2 + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.owner_of(&resource("jobQ1")), Some(owner("p")));

        drop(alive);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(store.is_empty());

        shutdown_tx.send(()).await.unwrap();
        loop_handle.await.unwrap();
    }
}
