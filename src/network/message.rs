// Cluster Message Definitions
//
// The sealed set of messages nodes exchange, one enum variant per message
// kind with a typed payload. The wire format is bincode over serde with a
// standard configuration; every request variant has exactly one reply
// variant (or the generic Ack), and errors travel as an Error frame so a
// remote failure surfaces as the same error type it was raised as.

use crate::consensus::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::directory::DirectoryCommand;
use crate::document_store::Document;
use crate::error::{Result, SearchError};
use crate::replication::AddReceipt;
use crate::types::{DocId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// All message kinds that can cross the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterMessage {
    // Consensus
    RequestVote(VoteRequest),
    RequestVoteReply(VoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesReply(AppendEntriesResponse),

    // Document replication
    ReplicateDoc(ReplicateDocRequest),
    ReplicateDocAck(ReplicateDocAck),
    RollbackDoc(RollbackDocRequest),
    ForwardAdd(ForwardAddRequest),
    AddReply(AddReceipt),

    // Query execution
    SearchLocal(SearchLocalRequest),
    SearchLocalReply(SearchLocalResponse),

    // Term directory
    DirectoryLookup(DirectoryLookupRequest),
    DirectoryLookupReply(DirectoryLookupResponse),
    DirectoryDelta(DirectoryDeltaRequest),
    CacheInvalidate(CacheInvalidateRequest),

    // Liveness
    Ping,
    Pong,

    /// Generic acknowledgment for fire-and-forget requests
    Ack,

    /// A handler-side failure, carried back to the caller
    Error(RemoteError),
}

impl ClusterMessage {
    /// Message kind for logging and dispatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterMessage::RequestVote(_) => "RequestVote",
            ClusterMessage::RequestVoteReply(_) => "RequestVoteReply",
            ClusterMessage::AppendEntries(_) => "AppendEntries",
            ClusterMessage::AppendEntriesReply(_) => "AppendEntriesReply",
            ClusterMessage::ReplicateDoc(_) => "ReplicateDoc",
            ClusterMessage::ReplicateDocAck(_) => "ReplicateDocAck",
            ClusterMessage::RollbackDoc(_) => "RollbackDoc",
            ClusterMessage::ForwardAdd(_) => "ForwardAdd",
            ClusterMessage::AddReply(_) => "AddReply",
            ClusterMessage::SearchLocal(_) => "SearchLocal",
            ClusterMessage::SearchLocalReply(_) => "SearchLocalReply",
            ClusterMessage::DirectoryLookup(_) => "DirectoryLookup",
            ClusterMessage::DirectoryLookupReply(_) => "DirectoryLookupReply",
            ClusterMessage::DirectoryDelta(_) => "DirectoryDelta",
            ClusterMessage::CacheInvalidate(_) => "CacheInvalidate",
            ClusterMessage::Ping => "Ping",
            ClusterMessage::Pong => "Pong",
            ClusterMessage::Ack => "Ack",
            ClusterMessage::Error(_) => "Error",
        }
    }
}

/// Replicate a document onto a secondary replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateDocRequest {
    /// Correlates retries of the same write
    pub request_id: Uuid,

    pub doc: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateDocAck {
    pub node_id: NodeId,

    /// True when the replica already held the document
    pub already_present: bool,
}

/// Undo a tentative replication after a failed quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackDocRequest {
    pub doc_id: DocId,
}

/// A write received by a non-primary, forwarded to the primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardAddRequest {
    pub request_id: Uuid,

    pub doc: Document,
}

/// AND-semantics search against one node's local index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchLocalRequest {
    pub terms: Vec<String>,

    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchLocalResponse {
    pub node_id: NodeId,

    pub hits: Vec<LocalHit>,
}

/// One locally ranked result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalHit {
    pub doc_id: DocId,

    pub score: f64,
}

/// Ask the leader which nodes index the given terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryLookupRequest {
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryLookupResponse {
    /// term -> nodes; terms unknown to the directory are omitted
    pub entries: HashMap<String, Vec<NodeId>>,

    /// Directory version at the answering leader
    pub version: u64,
}

/// Directory mutations submitted to the leader for log replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryDeltaRequest {
    pub deltas: Vec<DirectoryCommand>,
}

/// Drop cached lookup results for the given terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInvalidateRequest {
    pub terms: Vec<String>,
}

/// Error payload carried over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,

    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    QuorumFailed { acks: usize, needed: usize },
    NoLeader,
    NoPrimaryReachable,
    AllCandidatesFailed,
    NotPrimary { primary: NodeId },
    AlreadyExists,
    Timeout,
    Transport,
    Internal,
}

impl From<&SearchError> for RemoteError {
    fn from(e: &SearchError) -> Self {
        let kind = match e {
            SearchError::QuorumFailed { acks, needed } => RemoteErrorKind::QuorumFailed {
                acks: *acks,
                needed: *needed,
            },
            SearchError::NoLeader => RemoteErrorKind::NoLeader,
            SearchError::NoPrimaryReachable => RemoteErrorKind::NoPrimaryReachable,
            SearchError::AllCandidatesFailed => RemoteErrorKind::AllCandidatesFailed,
            SearchError::NotPrimary { primary } => {
                RemoteErrorKind::NotPrimary { primary: *primary }
            }
            SearchError::AlreadyExists(_) => RemoteErrorKind::AlreadyExists,
            SearchError::Timeout(_) => RemoteErrorKind::Timeout,
            SearchError::Transport(_) => RemoteErrorKind::Transport,
            _ => RemoteErrorKind::Internal,
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

impl From<RemoteError> for SearchError {
    fn from(e: RemoteError) -> Self {
        match e.kind {
            RemoteErrorKind::QuorumFailed { acks, needed } => {
                SearchError::QuorumFailed { acks, needed }
            }
            RemoteErrorKind::NoLeader => SearchError::NoLeader,
            RemoteErrorKind::NoPrimaryReachable => SearchError::NoPrimaryReachable,
            RemoteErrorKind::AllCandidatesFailed => SearchError::AllCandidatesFailed,
            RemoteErrorKind::NotPrimary { primary } => SearchError::NotPrimary { primary },
            RemoteErrorKind::AlreadyExists => SearchError::AlreadyExists(e.message),
            RemoteErrorKind::Timeout => SearchError::Timeout(e.message),
            RemoteErrorKind::Transport => SearchError::Transport(e.message),
            RemoteErrorKind::Internal => SearchError::Internal(e.message),
        }
    }
}

/// Frame sent over stream transports: the message plus its sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeId,

    pub message: ClusterMessage,
}

/// Encode a value with the wire configuration.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

/// Decode a value with the wire configuration.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::LogEntry;

    #[test]
    fn test_round_trip_request_vote() {
        let msg = ClusterMessage::RequestVote(VoteRequest {
            term: 7,
            candidate_id: NodeId::new(2),
            last_log_index: 9,
            last_log_term: 6,
        });
        let bytes = encode(&msg).unwrap();
        let back: ClusterMessage = decode(&bytes).unwrap();
        match back {
            ClusterMessage::RequestVote(req) => {
                assert_eq!(req.term, 7);
                assert_eq!(req.candidate_id, NodeId::new(2));
            }
            other => panic!("unexpected variant {}", other.kind()),
        }
    }

    #[test]
    fn test_round_trip_append_entries_with_payload() {
        let msg = ClusterMessage::AppendEntries(AppendEntriesRequest {
            term: 3,
            leader_id: NodeId::new(0),
            prev_log_index: 4,
            prev_log_term: 2,
            entries: vec![LogEntry::new(3, 5, vec![1, 2, 3])],
            leader_commit: 4,
        });
        let bytes = encode(&msg).unwrap();
        let back: ClusterMessage = decode(&bytes).unwrap();
        match back {
            ClusterMessage::AppendEntries(req) => {
                assert_eq!(req.entries.len(), 1);
                assert_eq!(req.entries[0].command, vec![1, 2, 3]);
            }
            other => panic!("unexpected variant {}", other.kind()),
        }
    }

    #[test]
    fn test_round_trip_envelope_with_document() {
        let doc = Document::new(
            DocId::from("doc-1"),
            "raft consensus".to_string(),
            HashMap::new(),
        );
        let envelope = Envelope {
            from: NodeId::new(4),
            message: ClusterMessage::ReplicateDoc(ReplicateDocRequest {
                request_id: Uuid::new_v4(),
                doc: doc.clone(),
            }),
        };
        let bytes = encode(&envelope).unwrap();
        let back: Envelope = decode(&bytes).unwrap();
        assert_eq!(back.from, NodeId::new(4));
        match back.message {
            ClusterMessage::ReplicateDoc(req) => assert_eq!(req.doc, doc),
            other => panic!("unexpected variant {}", other.kind()),
        }
    }

    #[test]
    fn test_error_round_trips_as_same_error() {
        let original = SearchError::QuorumFailed { acks: 1, needed: 2 };
        let remote = RemoteError::from(&original);
        let bytes = encode(&ClusterMessage::Error(remote)).unwrap();
        let back: ClusterMessage = decode(&bytes).unwrap();
        match back {
            ClusterMessage::Error(remote) => {
                let err = SearchError::from(remote);
                assert!(matches!(err, SearchError::QuorumFailed { acks: 1, needed: 2 }));
            }
            other => panic!("unexpected variant {}", other.kind()),
        }
    }
}
