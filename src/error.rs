use crate::types::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Quorum failed: {acks} of {needed} required acknowledgments")]
    QuorumFailed { acks: usize, needed: usize },

    #[error("Not primary for this document, primary is node {primary}")]
    NotPrimary { primary: NodeId },

    #[error("Primary not reachable")]
    NoPrimaryReachable,

    #[error("No leader elected")]
    NoLeader,

    #[error("All candidate nodes failed to answer")]
    AllCandidatesFailed,

    #[error("Term conflict: ours {ours}, theirs {theirs}")]
    TermConflict { ours: u64, theirs: u64 },

    #[error("Log inconsistency: {0}")]
    LogInconsistency(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Errors that may be surfaced to clients of the coordinator; everything
    /// else is absorbed by retries inside the cluster protocols.
    pub fn is_client_visible(&self) -> bool {
        matches!(
            self,
            SearchError::QuorumFailed { .. }
                | SearchError::NoLeader
                | SearchError::NoPrimaryReachable
                | SearchError::AllCandidatesFailed
                | SearchError::Timeout(_)
        )
    }

    /// Errors caused by the network rather than by protocol state.
    pub fn is_transport(&self) -> bool {
        matches!(self, SearchError::Transport(_) | SearchError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

// Error conversions for common error types

impl From<bincode::error::EncodeError> for SearchError {
    fn from(e: bincode::error::EncodeError) -> Self {
        SearchError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for SearchError {
    fn from(e: bincode::error::DecodeError) -> Self {
        SearchError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(e: serde_json::Error) -> Self {
        SearchError::Serialization(e.to_string())
    }
}
