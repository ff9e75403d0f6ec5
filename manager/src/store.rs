//! Per-node lock table and its atomic acquire/release primitive.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use lockmesh_common::{OwnerId, ResourceId};

/// A lock held on this node.
#[derive(Debug, Clone)]
pub struct LockRecord {
    /// Identity holding the lock.
    pub owner: OwnerId,
    /// Reentrancy depth; at least 1 while the record exists.
    pub acquire_count: u32,
    /// When the first outstanding acquire succeeded. Reentrant acquires do
    /// not refresh this, so lease age measures the whole hold.
    pub created_at: Instant,
}

/// Per-node, in-memory lock table.
///
/// Remote-call handlers and the lease monitor all drive this store
/// concurrently from their own tasks. Every mutation goes through
/// [`acquire`](LockStore::acquire), [`release`](LockStore::release) or
/// [`reclaim`](LockStore::reclaim); each holds the map entry across its whole
/// check-and-act step, which is the correctness anchor for the service.
pub struct LockStore {
    locks: DashMap<ResourceId, LockRecord>,
}

impl LockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Attempt to take or re-enter the lock on `resource`.
    ///
    /// Non-blocking: returns `true` on a fresh grant or on a reentrant grant
    /// by the current owner, `false` if another owner holds the resource.
    /// The entry API keeps the absence check and the insert under one shard
    /// lock, so two racing first acquires cannot both succeed, and an owner
    /// read cannot go stale before we act on it.
    pub fn acquire(&self, resource: &ResourceId, owner: &OwnerId) -> bool {
        match self.locks.entry(resource.clone()) {
            Entry::Occupied(mut held) => {
                let record = held.get_mut();
                if record.owner == *owner {
                    record.acquire_count += 1;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(LockRecord {
                    owner: owner.clone(),
                    acquire_count: 1,
                    created_at: Instant::now(),
                });
                true
            }
        }
    }

    /// Release the lock on `resource` if `owner` holds it.
    ///
    /// Removes the whole record regardless of reentrancy depth. A missing
    /// record and a record held by someone else are both reported as plain
    /// `false`, so a non-owner learns nothing about who holds the lock.
    pub fn release(&self, resource: &ResourceId, owner: &OwnerId) -> bool {
        self.locks
            .remove_if(resource, |_, record| record.owner == *owner)
            .is_some()
    }

    /// Remove `resource` if it is still held by `owner`.
    ///
    /// Called by the lease monitor after observing the owner's termination.
    /// The ownership re-check guards against the resource having been
    /// released and re-acquired by someone else since the watch went in.
    pub fn reclaim(&self, resource: &ResourceId, owner: &OwnerId) -> bool {
        self.release(resource, owner)
    }

    /// Current owner of `resource`, if held.
    pub fn owner_of(&self, resource: &ResourceId) -> Option<OwnerId> {
        self.locks.get(resource).map(|record| record.owner.clone())
    }

    /// Reentrancy depth of `resource`, if held.
    pub fn depth_of(&self, resource: &ResourceId) -> Option<u32> {
        self.locks.get(resource).map(|record| record.acquire_count)
    }

    /// Locks whose age exceeds `expiry`, as (resource, owner) pairs.
    pub fn aged_over(&self, expiry: Duration) -> Vec<(ResourceId, OwnerId)> {
        self.locks
            .iter()
            .filter(|entry| entry.created_at.elapsed() > expiry)
            .map(|entry| (entry.key().clone(), entry.owner.clone()))
            .collect()
    }

    /// Number of locks currently held on this node.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the store holds no locks.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for LockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::Entry as ModelEntry;
    use std::collections::HashMap;

    fn resource(name: &str) -> ResourceId {
        ResourceId::new(name)
    }

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name)
    }

    #[test]
    fn test_first_acquire_grants() {
        let store = LockStore::new();
        assert!(store.acquire(&resource("printerA"), &owner("p")));
        assert_eq!(store.owner_of(&resource("printerA")), Some(owner("p")));
        assert_eq!(store.depth_of(&resource("printerA")), Some(1));
    }

    #[test]
    fn test_reentrant_acquire_bumps_depth() {
        let store = LockStore::new();
        assert!(store.acquire(&resource("printerA"), &owner("p")));
        assert!(store.acquire(&resource("printerA"), &owner("p")));
        assert_eq!(store.depth_of(&resource("printerA")), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_contended_acquire_fails_without_mutation() {
        let store = LockStore::new();
        assert!(store.acquire(&resource("printerA"), &owner("p")));
        assert!(!store.acquire(&resource("printerA"), &owner("q")));
        assert_eq!(store.owner_of(&resource("printerA")), Some(owner("p")));
        assert_eq!(store.depth_of(&resource("printerA")), Some(1));
    }

    #[test]
    fn test_release_by_owner_removes_record() {
        let store = LockStore::new();
        store.acquire(&resource("printerA"), &owner("p"));
        store.acquire(&resource("printerA"), &owner("p"));
        // One release frees the lock fully, regardless of depth.
        assert!(store.release(&resource("printerA"), &owner("p")));
        assert!(store.is_empty());
        assert!(!store.release(&resource("printerA"), &owner("p")));
    }

    #[test]
    fn test_release_by_non_owner_fails_identically_to_unheld() {
        let store = LockStore::new();
        store.acquire(&resource("printerA"), &owner("p"));
        assert!(!store.release(&resource("printerA"), &owner("q")));
        assert!(!store.release(&resource("printerB"), &owner("q")));
        assert_eq!(store.owner_of(&resource("printerA")), Some(owner("p")));
    }

    #[test]
    fn test_reclaim_respects_current_owner() {
        let store = LockStore::new();
        store.acquire(&resource("jobQ1"), &owner("p"));
        store.release(&resource("jobQ1"), &owner("p"));
        store.acquire(&resource("jobQ1"), &owner("q"));
        // The watch was installed for p; q took over in the meantime.
        assert!(!store.reclaim(&resource("jobQ1"), &owner("p")));
        assert_eq!(store.owner_of(&resource("jobQ1")), Some(owner("q")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aged_over_reports_stale_locks_only() {
        let store = LockStore::new();
        store.acquire(&resource("old"), &owner("p"));
        tokio::time::advance(Duration::from_secs(40)).await;
        store.acquire(&resource("fresh"), &owner("p"));

        let stale = store.aged_over(Duration::from_secs(30));
        assert_eq!(stale, vec![(resource("old"), owner("p"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_acquire_does_not_reset_age() {
        let store = LockStore::new();
        store.acquire(&resource("jobQ1"), &owner("p"));
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(store.acquire(&resource("jobQ1"), &owner("p")));

        let stale = store.aged_over(Duration::from_secs(30));
        assert_eq!(stale.len(), 1);
    }

    #[test]
    fn test_concurrent_first_acquire_single_winner() {
        use std::sync::Arc;

        let store = Arc::new(LockStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.acquire(&ResourceId::new("shared"), &OwnerId::new(format!("o{i}")))
            }));
        }
        let grants = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(grants, 1);
        assert_eq!(store.len(), 1);
    }

    proptest! {
        // Exercises the contract the atomic primitive promises: a record
        // exists iff an acquire is outstanding, its depth never reaches
        // zero, and no sequence of operations can make ownership diverge
        // from a sequential model.
        #[test]
        fn prop_store_matches_sequential_model(
            ops in proptest::collection::vec((0..2u8, 0..3usize, 0..3usize), 1..64)
        ) {
            let store = LockStore::new();
            let mut model: HashMap<ResourceId, (OwnerId, u32)> = HashMap::new();

            for (op, r, o) in ops {
                let res = ResourceId::new(format!("r{r}"));
                let own = OwnerId::new(format!("o{o}"));
                if op == 0 {
                    let expect = match model.entry(res.clone()) {
                        ModelEntry::Occupied(mut held) => {
                            let (holder, depth) = held.get_mut();
                            if *holder == own {
                                *depth += 1;
                                true
                            } else {
                                false
                            }
                        }
                        ModelEntry::Vacant(slot) => {
                            slot.insert((own.clone(), 1));
                            true
                        }
                    };
                    prop_assert_eq!(store.acquire(&res, &own), expect);
                } else {
                    let expect =
                        matches!(model.get(&res), Some((holder, _)) if *holder == own);
                    if expect {
                        model.remove(&res);
                    }
                    prop_assert_eq!(store.release(&res, &own), expect);
                }

                prop_assert_eq!(store.len(), model.len());
                for (res, (holder, depth)) in &model {
                    let owner = store.owner_of(res);
                    prop_assert_eq!(owner.as_ref(), Some(holder));
                    prop_assert!(*depth >= 1);
                    prop_assert_eq!(store.depth_of(res), Some(*depth));
                }
            }
        }
    }
}
