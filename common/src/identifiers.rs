//! Identifier types for lockmesh entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque key identifying the thing being locked.
///
/// Callers choose the naming scheme; no structure is imposed beyond equality
/// and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new resource ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of the execution context holding a lock.
///
/// Compared for equality when deciding reentrancy and release authorization,
/// and watchable for termination through the liveness contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create a new owner ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the owner ID format.
    pub fn is_valid(&self) -> bool {
        // Basic validation: non-empty, printable, bounded length
        !self.0.is_empty() && self.0.len() <= 128 && !self.0.chars().any(char::is_control)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new node ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_equality() {
        assert_eq!(ResourceId::new("printerA"), ResourceId::from("printerA"));
        assert_ne!(ResourceId::new("printerA"), ResourceId::new("printerB"));
    }

    #[test]
    fn test_resource_id_display() {
        let id = ResourceId::new("jobQ1");
        assert_eq!(id.to_string(), "jobQ1");
        assert_eq!(id.as_str(), "jobQ1");
    }

    #[test]
    fn test_owner_id_validation() {
        assert!(OwnerId::new("worker-17").is_valid());
        assert!(OwnerId::new("node1/task/42").is_valid());
        assert!(!OwnerId::new("").is_valid());
        assert!(!OwnerId::new("bad\nowner").is_valid());
    }

    #[test]
    fn test_node_id_ordering() {
        let mut nodes = vec![NodeId::new("n3"), NodeId::new("n1"), NodeId::new("n2")];
        nodes.sort();
        assert_eq!(nodes[0], NodeId::new("n1"));
    }
}
