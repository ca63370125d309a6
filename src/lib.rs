// DistriSearch - Distributed Full-Text Search Cluster
// Core library module

pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod directory;
pub mod document_store;
pub mod error;
pub mod index;
pub mod network;
pub mod persistence;
pub mod query;
pub mod replication;
pub mod types;

pub use config::{ClusterConfig, PeerConfig};
pub use coordinator::{Coordinator, NodeStatus};
pub use error::{Result, SearchError};
pub use query::{SearchResponse, SearchResult};
pub use replication::AddReceipt;
pub use types::{DocId, NodeId};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
