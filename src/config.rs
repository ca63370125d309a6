// Cluster Configuration
//
// Environment inputs for a node: the fixed cluster membership, this node's
// id, the replication factor, and every protocol timing. All durations are
// configured in milliseconds so that config files stay flat JSON.

use crate::error::{Result, SearchError};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A peer entry in the membership list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Node id, unique within the cluster
    pub id: NodeId,

    /// Transport address (host:port) for the TCP transport
    pub addr: String,
}

/// Full node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's id; must appear in `peers`
    pub node_id: NodeId,

    /// Fixed, ordered cluster membership
    pub peers: Vec<PeerConfig>,

    /// Number of replicas per document (k)
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Election timeout lower bound
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    /// Election timeout upper bound
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,

    /// Leader heartbeat interval; should be well under the minimum
    /// election timeout
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Default deadline for a single inter-node RPC
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Deadline when forwarding a write to the primary; covers the
    /// primary's whole quorum round
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,

    /// Per-replica deadline for ReplicateDoc / RollbackDoc
    #[serde(default = "default_replicate_timeout_ms")]
    pub replicate_timeout_ms: u64,

    /// Per-node deadline for SearchLocal fan-out
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    /// Shorter deadline used for the single replica-fallback retry
    #[serde(default = "default_search_retry_timeout_ms")]
    pub search_retry_timeout_ms: u64,

    /// How long a directory lookup waits for a leader to exist
    #[serde(default = "default_directory_wait_timeout_ms")]
    pub directory_wait_timeout_ms: u64,

    /// TTL for cached directory entries
    #[serde(default = "default_directory_cache_ttl_ms")]
    pub directory_cache_ttl_ms: u64,

    /// Snapshot directory; persistence is disabled when absent
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,

    /// Interval between periodic document/index snapshots
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Replaces the built-in stopword list when set
    #[serde(default)]
    pub stopwords_override: Option<Vec<String>>,
}

fn default_replication_factor() -> usize {
    3
}

fn default_election_timeout_min_ms() -> u64 {
    150
}

fn default_election_timeout_max_ms() -> u64 {
    300
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_rpc_timeout_ms() -> u64 {
    1_000
}

fn default_forward_timeout_ms() -> u64 {
    15_000
}

fn default_replicate_timeout_ms() -> u64 {
    5_000
}

fn default_search_timeout_ms() -> u64 {
    5_000
}

fn default_search_retry_timeout_ms() -> u64 {
    3_000
}

fn default_directory_wait_timeout_ms() -> u64 {
    2_000
}

fn default_directory_cache_ttl_ms() -> u64 {
    10_000
}

fn default_snapshot_interval_ms() -> u64 {
    30_000
}

impl ClusterConfig {
    /// Build a configuration for a node of a cluster with the given
    /// membership and default timings.
    pub fn new(node_id: NodeId, peers: Vec<PeerConfig>) -> Self {
        Self {
            node_id,
            peers,
            replication_factor: default_replication_factor(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            forward_timeout_ms: default_forward_timeout_ms(),
            replicate_timeout_ms: default_replicate_timeout_ms(),
            search_timeout_ms: default_search_timeout_ms(),
            search_retry_timeout_ms: default_search_retry_timeout_ms(),
            directory_wait_timeout_ms: default_directory_wait_timeout_ms(),
            directory_cache_ttl_ms: default_directory_cache_ttl_ms(),
            snapshot_dir: None,
            snapshot_interval_ms: default_snapshot_interval_ms(),
            stopwords_override: None,
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ClusterConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(SearchError::Configuration(
                "membership list is empty".to_string(),
            ));
        }
        if !self.peers.iter().any(|p| p.id == self.node_id) {
            return Err(SearchError::Configuration(format!(
                "node {} is not in the membership list",
                self.node_id
            )));
        }
        let mut ids: Vec<NodeId> = self.peers.iter().map(|p| p.id).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != self.peers.len() {
            return Err(SearchError::Configuration(
                "duplicate node ids in membership list".to_string(),
            ));
        }
        if self.replication_factor == 0 || self.replication_factor > self.peers.len() {
            return Err(SearchError::Configuration(format!(
                "replication factor {} must be in 1..={}",
                self.replication_factor,
                self.peers.len()
            )));
        }
        if self.election_timeout_min_ms == 0
            || self.election_timeout_min_ms > self.election_timeout_max_ms
        {
            return Err(SearchError::Configuration(format!(
                "invalid election timeout range {}..{}",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(SearchError::Configuration(
                "heartbeat interval must be below the minimum election timeout".to_string(),
            ));
        }
        Ok(())
    }

    /// Sorted ids of every cluster member, including this node.
    pub fn member_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.iter().map(|p| p.id).collect();
        ids.sort();
        ids
    }

    /// Quorum size for Raft: a strict majority of the membership.
    pub fn raft_quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// Quorum size for document writes: ceil(k / 2).
    pub fn write_quorum(&self) -> usize {
        self.replication_factor.div_ceil(2)
    }

    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn replicate_timeout(&self) -> Duration {
        Duration::from_millis(self.replicate_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn search_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.search_retry_timeout_ms)
    }

    pub fn directory_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_wait_timeout_ms)
    }

    pub fn directory_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.directory_cache_ttl_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}
