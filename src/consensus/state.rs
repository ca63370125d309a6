// Raft Node State
//
// Volatile and persistent state of a single Raft participant. The volatile
// part lives behind a single RwLock shared by the election and replication
// managers; the persistent part (term, vote, log) is captured as a
// `HardState` and written through a `HardStateStore` before any reply that
// depends on it leaves the node.

use super::log::LogEntry;
use crate::error::Result;
use crate::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Raft role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRole {
    /// Passively receives log entries
    Follower,

    /// Requesting votes for leadership
    Candidate,

    /// Manages log replication
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RaftRole::Follower => "follower",
            RaftRole::Candidate => "candidate",
            RaftRole::Leader => "leader",
        };
        write!(f, "{name}")
    }
}

/// Shared Raft state
#[derive(Debug, Clone)]
pub struct RaftState {
    /// Current role
    pub role: RaftRole,

    /// Current term
    pub current_term: Term,

    /// Who we voted for in the current term
    pub voted_for: Option<NodeId>,

    /// Current leader, when known
    pub leader_id: Option<NodeId>,

    /// Highest log index known to be committed
    pub commit_index: LogIndex,

    /// Highest log index applied to the state machine
    pub last_applied: LogIndex,

    /// For leaders: next log index to send to each peer
    pub next_index: HashMap<NodeId, LogIndex>,

    /// For leaders: highest log index known replicated on each peer
    pub match_index: HashMap<NodeId, LogIndex>,

    /// Fixed cluster membership, including this node
    pub members: BTreeSet<NodeId>,
}

impl RaftState {
    pub fn new(node_id: NodeId, members: impl IntoIterator<Item = NodeId>) -> Self {
        let mut members: BTreeSet<NodeId> = members.into_iter().collect();
        members.insert(node_id);
        Self {
            role: RaftRole::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            members,
        }
    }

    /// Strict majority of the membership.
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Every member except this node.
    pub fn peers(&self, node_id: NodeId) -> Vec<NodeId> {
        self.members
            .iter()
            .copied()
            .filter(|id| *id != node_id)
            .collect()
    }

    /// Step down to follower for a newer term.
    pub fn step_down(&mut self, term: Term) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        self.role = RaftRole::Follower;
        self.leader_id = None;
    }
}

/// Persistent Raft state, written before replies that depend on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub entries: Vec<LogEntry>,
}

/// Sink for the persistent Raft state. Implemented by the snapshot store;
/// consensus stays unaware of the on-disk layout.
pub trait HardStateStore: Send + Sync {
    fn persist(&self, hard: &HardState) -> Result<()>;
    fn load(&self) -> Result<Option<HardState>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_sizes() {
        let state = RaftState::new(NodeId::new(0), (0..5).map(NodeId::new));
        assert_eq!(state.quorum(), 3);

        let single = RaftState::new(NodeId::new(0), std::iter::empty());
        assert_eq!(single.quorum(), 1);
    }

    #[test]
    fn test_peers_excludes_self() {
        let state = RaftState::new(NodeId::new(1), (0..3).map(NodeId::new));
        let peers = state.peers(NodeId::new(1));
        assert_eq!(peers.len(), 2);
        assert!(!peers.contains(&NodeId::new(1)));
    }

    #[test]
    fn test_step_down_clears_vote_on_newer_term() {
        let mut state = RaftState::new(NodeId::new(0), (0..3).map(NodeId::new));
        state.current_term = 2;
        state.voted_for = Some(NodeId::new(0));
        state.role = RaftRole::Leader;

        state.step_down(5);
        assert_eq!(state.current_term, 5);
        assert_eq!(state.role, RaftRole::Follower);
        assert!(state.voted_for.is_none());

        // Same-term step down keeps the vote.
        state.voted_for = Some(NodeId::new(2));
        state.step_down(5);
        assert_eq!(state.voted_for, Some(NodeId::new(2)));
    }
}
