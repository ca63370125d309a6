// Shared identifier types
//
// This module defines the identifiers used across all DistriSearch modules:
// node identity within the fixed cluster membership and document identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a node in the cluster.
///
/// Node ids are small integers assigned at bootstrap; the cluster membership
/// is fixed, so an id is valid for the lifetime of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

/// Unique identifier for a document.
///
/// Opaque to the cluster; typically a content hash or caller-supplied key.
/// Ordered so that score ties can be broken deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(pub String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId(s)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId(s.to_string())
    }
}

/// Raft term number (logical clock)
pub type Term = u64;

/// Raft log index
pub type LogIndex = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(3).to_string(), "3");
    }

    #[test]
    fn test_doc_id_ordering() {
        let mut ids = vec![DocId::from("zz"), DocId::from("aa"), DocId::from("mm")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "aa");
        assert_eq!(ids[2].as_str(), "zz");
    }
}
