//! Multi-mode lock acquisition and release.

use std::sync::Arc;

use tracing::{debug, warn};

use lockmesh_common::{NodeId, OwnerId, ResourceId};

use crate::cluster::{LeaderElection, LockRequest, Membership, Placement, Transport};
use crate::metrics::Metrics;
use crate::store::LockStore;

/// How many cluster nodes must agree before a lock is considered granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Only this node.
    Local,
    /// The elected leader node.
    Leader,
    /// The placement-computed node set for the resource. Every node in the
    /// set must grant: this is all-of-set, not majority agreement.
    Quorum,
    /// Every node currently up.
    All,
}

/// Outcome of a coordinated acquire or release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOutcome {
    /// Whether the operation succeeded on every node it needed to.
    pub granted: bool,
    /// Nodes that responded to the transport call, whether or not they
    /// granted. Unreachable nodes are excluded; refusing nodes are not.
    pub responded: Vec<NodeId>,
}

/// Drives the lock store locally and on remote nodes, one mode per call.
///
/// All failure shapes come back as a plain denied [`LockOutcome`]; the
/// coordinator never aborts on contention, refusal or unreachable targets.
pub struct Coordinator {
    node_id: NodeId,
    store: Arc<LockStore>,
    membership: Arc<dyn Membership>,
    placement: Arc<dyn Placement>,
    leader: Arc<dyn LeaderElection>,
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    /// Create a new coordinator for this node.
    pub fn new(
        node_id: NodeId,
        store: Arc<LockStore>,
        membership: Arc<dyn Membership>,
        placement: Arc<dyn Placement>,
        leader: Arc<dyn LeaderElection>,
        transport: Arc<dyn Transport>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            node_id,
            store,
            membership,
            placement,
            leader,
            transport,
            metrics,
        }
    }

    /// Acquire `resource` for `owner` under `mode`.
    ///
    /// Never blocks waiting for a lock to free up: every node grants or
    /// refuses immediately, only the transport round-trip takes time.
    pub async fn acquire(
        &self,
        resource: &ResourceId,
        owner: &OwnerId,
        mode: LockMode,
    ) -> LockOutcome {
        if !owner.is_valid() {
            warn!(resource = %resource, "Rejecting acquire for malformed owner id");
            self.metrics.acquire_finished(false);
            return LockOutcome {
                granted: false,
                responded: Vec::new(),
            };
        }
        let outcome = match mode {
            LockMode::Local => {
                let granted = self.store.acquire(resource, owner);
                LockOutcome {
                    granted,
                    responded: vec![self.node_id.clone()],
                }
            }
            LockMode::Leader => {
                let target = self.leader.current_leader();
                let request = LockRequest::acquire(resource.clone(), owner.clone());
                match self.transport.call(&target, request).await {
                    Ok(reply) => LockOutcome {
                        granted: reply.granted,
                        responded: vec![target],
                    },
                    Err(error) => {
                        warn!(leader = %target, %error, "Leader acquire failed");
                        LockOutcome {
                            granted: false,
                            responded: Vec::new(),
                        }
                    }
                }
            }
            LockMode::Quorum => {
                let targets = self.placement.nodes_for(resource);
                self.fan_out_acquire(targets, resource, owner).await
            }
            LockMode::All => {
                let targets = self.membership.up_nodes();
                self.fan_out_acquire(targets, resource, owner).await
            }
        };

        self.metrics.acquire_finished(outcome.granted);
        debug!(
            resource = %resource,
            owner = %owner,
            ?mode,
            granted = outcome.granted,
            "Acquire finished"
        );
        outcome
    }

    /// Release `resource` for `owner` under `mode`.
    ///
    /// Mirrors acquire per mode; there is no rollback, since a failed
    /// release leaves nothing to undo.
    pub async fn release(
        &self,
        resource: &ResourceId,
        owner: &OwnerId,
        mode: LockMode,
    ) -> LockOutcome {
        if !owner.is_valid() {
            warn!(resource = %resource, "Rejecting release for malformed owner id");
            self.metrics.release_finished(false);
            return LockOutcome {
                granted: false,
                responded: Vec::new(),
            };
        }
        let outcome = match mode {
            LockMode::Local => {
                let granted = self.store.release(resource, owner);
                LockOutcome {
                    granted,
                    responded: vec![self.node_id.clone()],
                }
            }
            LockMode::Leader => {
                let target = self.leader.current_leader();
                let request = LockRequest::release(resource.clone(), owner.clone());
                match self.transport.call(&target, request).await {
                    Ok(reply) => LockOutcome {
                        granted: reply.granted,
                        responded: vec![target],
                    },
                    Err(error) => {
                        warn!(leader = %target, %error, "Leader release failed");
                        LockOutcome {
                            granted: false,
                            responded: Vec::new(),
                        }
                    }
                }
            }
            LockMode::Quorum => {
                let targets = self.placement.nodes_for(resource);
                self.fan_out_release(targets, resource, owner).await
            }
            LockMode::All => {
                let targets = self.membership.up_nodes();
                self.fan_out_release(targets, resource, owner).await
            }
        };

        self.metrics.release_finished(outcome.granted);
        outcome
    }

    /// Fan an acquire out to `targets`; all reachable nodes must grant and
    /// none may be unreachable, otherwise the whole acquire fails and a
    /// compensating release goes out.
    async fn fan_out_acquire(
        &self,
        targets: Vec<NodeId>,
        resource: &ResourceId,
        owner: &OwnerId,
    ) -> LockOutcome {
        let request = LockRequest::acquire(resource.clone(), owner.clone());
        self.metrics.fan_out();
        let (replies, unreachable) = self.transport.call_many(&targets, request).await;

        let all_granted = replies.iter().all(|(_, reply)| reply.granted);
        let granted = unreachable.is_empty() && all_granted;
        let responded: Vec<NodeId> = replies.into_iter().map(|(node, _)| node).collect();

        if !granted {
            debug!(
                resource = %resource,
                owner = %owner,
                responded = responded.len(),
                unreachable = unreachable.len(),
                "Fan-out acquire failed, dispatching rollback"
            );
            self.dispatch_rollback(targets, resource, owner);
        }

        LockOutcome { granted, responded }
    }

    /// Fan a release out to `targets`. Succeeds iff no node reported a
    /// failed release; unreachable nodes do not fail a release.
    async fn fan_out_release(
        &self,
        targets: Vec<NodeId>,
        resource: &ResourceId,
        owner: &OwnerId,
    ) -> LockOutcome {
        let request = LockRequest::release(resource.clone(), owner.clone());
        self.metrics.fan_out();
        let (replies, unreachable) = self.transport.call_many(&targets, request).await;

        if !unreachable.is_empty() {
            warn!(
                resource = %resource,
                unreachable = unreachable.len(),
                "Fan-out release left unreachable nodes"
            );
        }

        let granted = replies.iter().all(|(_, reply)| reply.granted);
        let responded = replies.into_iter().map(|(node, _)| node).collect();
        LockOutcome { granted, responded }
    }

    /// Dispatch a compensating release to the whole target set.
    ///
    /// Best effort: the call is spawned and its completion observed only for
    /// logging. It never gates the caller's outcome, and nodes unreachable
    /// during rollback stay unreleased until the lease monitor catches them.
    fn dispatch_rollback(&self, targets: Vec<NodeId>, resource: &ResourceId, owner: &OwnerId) {
        let transport = self.transport.clone();
        let request = LockRequest::release(resource.clone(), owner.clone());
        let resource = resource.clone();
        self.metrics.rollback_dispatched();

        tokio::spawn(async move {
            let (replies, unreachable) = transport.call_many(&targets, request).await;
            if unreachable.is_empty() {
                debug!(resource = %resource, released = replies.len(), "Rollback release completed");
            } else {
                warn!(
                    resource = %resource,
                    unreachable = unreachable.len(),
                    "Rollback release left unreachable nodes"
                );
            }
        });
    }
}
