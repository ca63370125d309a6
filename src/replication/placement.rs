// Replica Placement
//
// Deterministic replica selection: the document id hashes to a position on
// the fixed, ordered membership list and the replica set is the k
// consecutive nodes from there. Every node computes the same set from the
// same inputs; the first entry is the primary.

use crate::types::{DocId, NodeId};
use sha2::{Digest, Sha256};

/// The ordered replica set for a document: k distinct nodes, primary first.
pub fn replica_set(doc_id: &DocId, members: &[NodeId], k: usize) -> Vec<NodeId> {
    if members.is_empty() {
        return Vec::new();
    }
    let k = k.min(members.len());
    let start = hash_position(doc_id, members.len());
    (0..k)
        .map(|offset| members[(start + offset) % members.len()])
        .collect()
}

/// The primary for a document.
pub fn primary_for(doc_id: &DocId, members: &[NodeId], k: usize) -> Option<NodeId> {
    replica_set(doc_id, members, k).first().copied()
}

fn hash_position(doc_id: &DocId, buckets: usize) -> usize {
    let digest = Sha256::digest(doc_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % buckets as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: u64) -> Vec<NodeId> {
        (0..n).map(NodeId::new).collect()
    }

    #[test]
    fn test_deterministic_across_calls() {
        let members = members(5);
        let a = replica_set(&DocId::from("doc-1"), &members, 3);
        let b = replica_set(&DocId::from("doc-1"), &members, 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_replicas_are_distinct() {
        let members = members(5);
        for i in 0..50 {
            let set = replica_set(&DocId::from(format!("doc-{i}")), &members, 3);
            let mut deduped = set.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(deduped.len(), set.len());
        }
    }

    #[test]
    fn test_k_capped_at_membership() {
        let members = members(2);
        let set = replica_set(&DocId::from("doc-1"), &members, 3);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_spread_over_membership() {
        let members = members(5);
        let mut primaries = std::collections::HashSet::new();
        for i in 0..100 {
            let primary = primary_for(&DocId::from(format!("doc-{i}")), &members, 3).unwrap();
            primaries.insert(primary);
        }
        // 100 hashed ids land on well more than one primary.
        assert!(primaries.len() >= 3);
    }

    #[test]
    fn test_empty_membership() {
        assert!(replica_set(&DocId::from("doc-1"), &[], 3).is_empty());
        assert!(primary_for(&DocId::from("doc-1"), &[], 3).is_none());
    }
}
