//! Contracts for the cluster services the lock manager consumes.
//!
//! Membership, resource placement, leader election, the remote-call
//! transport and owner liveness are external collaborators. This module
//! defines the narrow traits the node needs from them, the request/reply
//! types a transport carries, and in-process implementations that make a
//! single node runnable and testable without a real cluster.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use lockmesh_common::{NodeId, OwnerId, ResourceId, Result};

use crate::store::LockStore;

/// Operation carried by a remote lock call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockOp {
    Acquire,
    Release,
}

/// A lock request as executed on a target node.
///
/// This is the only payload the service hands to the transport; it defines
/// no wire format of its own beyond what the transport's generic call
/// encoding already provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub op: LockOp,
    pub resource: ResourceId,
    pub owner: OwnerId,
}

impl LockRequest {
    /// Build an acquire request.
    pub fn acquire(resource: ResourceId, owner: OwnerId) -> Self {
        Self {
            op: LockOp::Acquire,
            resource,
            owner,
        }
    }

    /// Build a release request.
    pub fn release(resource: ResourceId, owner: OwnerId) -> Self {
        Self {
            op: LockOp::Release,
            resource,
            owner,
        }
    }

    /// Execute this request against a node's local store.
    ///
    /// The single entry point for a transport server: incoming requests run
    /// this directly in the handler's own task, with the store's primitives
    /// carrying all synchronization. A request carrying a malformed owner id
    /// is refused without touching the store, so a misbehaving peer cannot
    /// plant records no well-formed caller could ever release.
    pub fn apply(&self, store: &LockStore) -> LockReply {
        if !self.owner.is_valid() {
            debug!(resource = %self.resource, "Refusing request with malformed owner id");
            return LockReply { granted: false };
        }
        let granted = match self.op {
            LockOp::Acquire => store.acquire(&self.resource, &self.owner),
            LockOp::Release => store.release(&self.resource, &self.owner),
        };
        LockReply { granted }
    }
}

/// Reply to a [`LockRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReply {
    /// Whether the target node granted the operation.
    pub granted: bool,
}

/// Cluster membership: which nodes are currently up.
pub trait Membership: Send + Sync {
    fn up_nodes(&self) -> Vec<NodeId>;
}

/// Resource placement: the node set that must agree on a resource.
pub trait Placement: Send + Sync {
    fn nodes_for(&self, resource: &ResourceId) -> Vec<NodeId>;
}

/// Leader election: the currently elected leader.
pub trait LeaderElection: Send + Sync {
    fn current_leader(&self) -> NodeId;
}

/// Remote-call transport with an implicit per-call timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Call a single node. An unreachable or timed-out node is an error.
    async fn call(&self, node: &NodeId, request: LockRequest) -> Result<LockReply>;

    /// Fan a request out to `nodes` concurrently, returning each responder's
    /// reply plus the set of nodes that failed to respond. A timed-out node
    /// lands in the unreachable set; its request is not cancelled, just no
    /// longer waited on.
    async fn call_many(
        &self,
        nodes: &[NodeId],
        request: LockRequest,
    ) -> (Vec<(NodeId, LockReply)>, Vec<NodeId>);
}

/// Liveness watching for lock owners.
pub trait OwnerLiveness: Send + Sync {
    /// Subscribe to `owner`'s termination.
    ///
    /// The receiver resolves once the owner terminates; watching an unknown
    /// or already-dead owner resolves immediately. Dropping the receiver
    /// cancels the subscription.
    fn watch(&self, owner: &OwnerId) -> oneshot::Receiver<()>;
}

/// Fixed cluster view with a designated leader.
pub struct StaticCluster {
    nodes: Vec<NodeId>,
    leader: NodeId,
    replicas: usize,
}

impl StaticCluster {
    /// Create a cluster over `nodes`, placing each resource on `replicas`
    /// of them.
    pub fn new(nodes: Vec<NodeId>, leader: NodeId, replicas: usize) -> Self {
        Self {
            nodes,
            leader,
            replicas,
        }
    }

    /// Single-node cluster where the node is its own leader.
    pub fn single(node: NodeId) -> Self {
        Self::new(vec![node.clone()], node, 1)
    }
}

impl Membership for StaticCluster {
    fn up_nodes(&self) -> Vec<NodeId> {
        self.nodes.clone()
    }
}

impl Placement for StaticCluster {
    /// Rendezvous hashing: every node is scored against the resource and
    /// the top `replicas` scores win, so the set for a given resource is
    /// stable for as long as membership is.
    fn nodes_for(&self, resource: &ResourceId) -> Vec<NodeId> {
        let mut scored: Vec<(u64, &NodeId)> = self
            .nodes
            .iter()
            .map(|node| {
                let mut hasher = DefaultHasher::new();
                node.hash(&mut hasher);
                resource.hash(&mut hasher);
                (hasher.finish(), node)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(self.replicas)
            .map(|(_, node)| node.clone())
            .collect()
    }
}

impl LeaderElection for StaticCluster {
    fn current_leader(&self) -> NodeId {
        self.leader.clone()
    }
}

/// Transport that serves every call from the local store.
///
/// Used by the single-node binary; also the reference for what a transport
/// server does with an incoming [`LockRequest`].
pub struct LoopbackTransport {
    store: Arc<LockStore>,
}

impl LoopbackTransport {
    pub fn new(store: Arc<LockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, _node: &NodeId, request: LockRequest) -> Result<LockReply> {
        Ok(request.apply(&self.store))
    }

    async fn call_many(
        &self,
        nodes: &[NodeId],
        request: LockRequest,
    ) -> (Vec<(NodeId, LockReply)>, Vec<NodeId>) {
        let replies = nodes
            .iter()
            .map(|node| (node.clone(), request.apply(&self.store)))
            .collect();
        (replies, Vec::new())
    }
}

/// In-process owner liveness registry.
///
/// Owners announce themselves and hold the returned guard while alive;
/// dropping the guard delivers termination to every outstanding watch on
/// that owner.
pub struct LivenessRegistry {
    alive: Arc<DashMap<OwnerId, Vec<oneshot::Sender<()>>>>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(DashMap::new()),
        }
    }

    /// Register `owner` as alive until the returned guard is dropped.
    pub fn announce(&self, owner: OwnerId) -> AliveGuard {
        self.alive.entry(owner.clone()).or_default();
        AliveGuard {
            owner,
            alive: self.alive.clone(),
        }
    }
}

impl Default for LivenessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerLiveness for LivenessRegistry {
    fn watch(&self, owner: &OwnerId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        match self.alive.get_mut(owner) {
            Some(mut watchers) => watchers.push(tx),
            // Unknown owner: treat as already terminated.
            None => {
                let _ = tx.send(());
            }
        }
        rx
    }
}

/// Liveness handle for an announced owner.
pub struct AliveGuard {
    owner: OwnerId,
    alive: Arc<DashMap<OwnerId, Vec<oneshot::Sender<()>>>>,
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        if let Some((_, watchers)) = self.alive.remove(&self.owner) {
            debug!(owner = %self.owner, watchers = watchers.len(), "Owner terminated");
            for tx in watchers {
                let _ = tx.send(());
            }
        }
    }
}
