// Term Directory
//
// The cluster-wide map from term to the nodes that index it. The map is
// the Raft state machine: it mutates only by applying committed
// `DirectoryCommand`s, so every node that has applied the same log prefix
// holds an identical directory. The leader answers lookups from its
// applied view; followers keep theirs warm for the next leadership change.

pub mod cache;

pub use cache::DirectoryCache;

use crate::error::Result;
use crate::types::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A replicated directory mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DirectoryCommand {
    /// Record that `node` indexes `term`
    Add { term: String, node: NodeId },

    /// Record that `node` no longer indexes `term`
    Remove { term: String, node: NodeId },
}

impl DirectoryCommand {
    /// The term this command touches.
    pub fn term(&self) -> &str {
        match self {
            DirectoryCommand::Add { term, .. } | DirectoryCommand::Remove { term, .. } => term,
        }
    }

    /// Serialize for the Raft log.
    pub fn encode(&self) -> Result<Vec<u8>> {
        crate::network::message::encode(self)
    }

    /// Deserialize from a Raft log entry.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        crate::network::message::decode(bytes)
    }
}

#[derive(Debug, Default)]
struct DirectoryInner {
    /// term -> nodes that index it
    entries: HashMap<String, BTreeSet<NodeId>>,

    /// Bumped on every applied change
    version: u64,
}

/// Applied view of the term directory.
#[derive(Debug, Default)]
pub struct TermDirectory {
    inner: RwLock<DirectoryInner>,
}

impl TermDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed command. Returns true when the view changed;
    /// duplicate deltas are no-ops so replayed log entries stay harmless.
    pub fn apply(&self, command: &DirectoryCommand) -> bool {
        let mut inner = self.inner.write();
        let changed = match command {
            DirectoryCommand::Add { term, node } => inner
                .entries
                .entry(term.clone())
                .or_default()
                .insert(*node),
            DirectoryCommand::Remove { term, node } => {
                let (removed, emptied) = match inner.entries.get_mut(term) {
                    Some(nodes) => (nodes.remove(node), nodes.is_empty()),
                    None => (false, false),
                };
                if emptied {
                    // Terms with no hosts left are dropped.
                    inner.entries.remove(term);
                }
                removed
            }
        };
        if changed {
            inner.version += 1;
        }
        changed
    }

    /// Nodes that index `term`, when any.
    pub fn nodes(&self, term: &str) -> Option<Vec<NodeId>> {
        self.inner
            .read()
            .entries
            .get(term)
            .map(|nodes| nodes.iter().copied().collect())
    }

    /// Resolve a batch of terms; unknown terms are omitted.
    pub fn lookup(&self, terms: &[String]) -> HashMap<String, Vec<NodeId>> {
        let inner = self.inner.read();
        terms
            .iter()
            .filter_map(|term| {
                inner
                    .entries
                    .get(term)
                    .map(|nodes| (term.clone(), nodes.iter().copied().collect()))
            })
            .collect()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn term_count(&self) -> usize {
        self.inner.read().entries.len()
    }
}
