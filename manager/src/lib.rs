//! LockMesh Manager
//!
//! The per-node runtime of the lockmesh mutual-exclusion service: the local
//! lock store with its atomic acquire/release primitive, the multi-mode
//! acquisition coordinator, and the lease monitor that reclaims locks whose
//! owners have crashed.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod state;
pub mod store;

pub use config::ManagerConfig;
pub use coordinator::{LockMode, LockOutcome};
pub use manager::{ClusterServices, LockManager};
pub use store::LockStore;
