//! LockMesh Common Types
//!
//! Shared types used across the lockmesh service: identifiers for resources,
//! owners and nodes, plus the error taxonomy.

pub mod error;
pub mod identifiers;

pub use error::*;
pub use identifiers::*;
