// Quorum Document Replication
//
// The write path of the cluster. The primary for a document id serializes
// its writes, applies the document tentatively, fans ReplicateDoc out to
// the secondaries and commits once ceil(k/2) replicas (itself included)
// acknowledged. A failed quorum rolls the tentative copies back, so no
// replica keeps a partially replicated document. Successful writes push
// directory deltas through the Raft leader.

pub mod placement;

use crate::config::ClusterConfig;
use crate::consensus::RaftNode;
use crate::directory::DirectoryCommand;
use crate::document_store::{Document, DocumentStore};
use crate::error::{Result, SearchError};
use crate::index::{InvertedIndex, Tokenizer};
use crate::network::message::{
    ClusterMessage, DirectoryDeltaRequest, ReplicateDocAck, ReplicateDocRequest,
    RollbackDocRequest,
};
use crate::network::transport::Transport;
use crate::types::{DocId, NodeId};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Successful write acknowledgment returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReceipt {
    pub doc_id: DocId,

    /// The node that coordinated the write
    pub primary: NodeId,

    /// The full replica set, primary first
    pub replicas: Vec<NodeId>,
}

/// Per-node quorum write coordinator.
pub struct QuorumReplicator {
    node_id: NodeId,

    config: Arc<ClusterConfig>,

    /// Sorted cluster membership, the placement ring
    members: Vec<NodeId>,

    tokenizer: Arc<Tokenizer>,

    index: Arc<InvertedIndex>,

    store: Arc<DocumentStore>,

    raft: Arc<RaftNode>,

    transport: Arc<dyn Transport>,

    /// Serializes writes per document id
    doc_locks: DashMap<DocId, Arc<Mutex<()>>>,
}

impl QuorumReplicator {
    pub fn new(
        config: Arc<ClusterConfig>,
        tokenizer: Arc<Tokenizer>,
        index: Arc<InvertedIndex>,
        store: Arc<DocumentStore>,
        raft: Arc<RaftNode>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            node_id: config.node_id,
            members: config.member_ids(),
            config,
            tokenizer,
            index,
            store,
            raft,
            transport,
            doc_locks: DashMap::new(),
        }
    }

    /// The replica set for a document id, primary first.
    pub fn replica_set(&self, doc_id: &DocId) -> Vec<NodeId> {
        placement::replica_set(doc_id, &self.members, self.config.replication_factor)
    }

    /// The primary for a document id.
    pub fn primary_for(&self, doc_id: &DocId) -> NodeId {
        // Membership is validated non-empty at config load.
        placement::replica_set(doc_id, &self.members, self.config.replication_factor)[0]
    }

    fn doc_lock(&self, doc_id: &DocId) -> Arc<Mutex<()>> {
        self.doc_locks
            .entry(doc_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Coordinate a quorum write. Callers must route the document here only
    /// on its primary; anywhere else this fails with `NotPrimary`.
    pub async fn write(&self, doc: Document) -> Result<AddReceipt> {
        let replicas = self.replica_set(&doc.doc_id);
        let primary = replicas[0];
        if primary != self.node_id {
            return Err(SearchError::NotPrimary { primary });
        }

        let lock = self.doc_lock(&doc.doc_id);
        let _guard = lock.lock().await;

        let receipt = AddReceipt {
            doc_id: doc.doc_id.clone(),
            primary,
            replicas: replicas.clone(),
        };

        // Documents are immutable: a repeated write of the same content is
        // acknowledged without a new round, different content is rejected.
        if let Some(existing) = self.store.get(&doc.doc_id) {
            if existing.content == doc.content {
                return Ok(receipt);
            }
            return Err(SearchError::AlreadyExists(format!(
                "document {} exists with different content",
                doc.doc_id
            )));
        }

        let terms = self.tokenizer.tokenize(&doc.content);
        self.store.put(doc.clone());
        self.index.add(&doc.doc_id, &terms);

        let request_id = Uuid::new_v4();
        let secondaries = &replicas[1..];
        let replies = join_all(secondaries.iter().map(|peer| {
            let transport = self.transport.clone();
            let request = ReplicateDocRequest {
                request_id,
                doc: doc.clone(),
            };
            let timeout = self.config.replicate_timeout();
            let peer = *peer;
            async move {
                transport
                    .send(peer, ClusterMessage::ReplicateDoc(request), timeout)
                    .await
            }
        }))
        .await;

        let mut ackers: Vec<NodeId> = Vec::new();
        for (peer, reply) in secondaries.iter().zip(replies) {
            match reply {
                Ok(ClusterMessage::ReplicateDocAck(_)) => ackers.push(*peer),
                Ok(other) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        peer = %peer,
                        kind = other.kind(),
                        "unexpected replication reply"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        node_id = %self.node_id,
                        peer = %peer,
                        error = %e,
                        "replica did not acknowledge"
                    );
                }
            }
        }

        let acks = 1 + ackers.len();
        let needed = self.config.write_quorum();
        if acks < needed {
            self.rollback(&doc.doc_id, &ackers).await;
            tracing::warn!(
                node_id = %self.node_id,
                doc_id = %doc.doc_id,
                acks,
                needed,
                "write rolled back, quorum not reached"
            );
            return Err(SearchError::QuorumFailed { acks, needed });
        }

        tracing::info!(
            node_id = %self.node_id,
            doc_id = %doc.doc_id,
            acks,
            "document replicated"
        );

        let unique_terms = self.tokenizer.unique_terms(&doc.content);
        if let Err(e) = self.push_directory_deltas(&unique_terms, &replicas).await {
            // The write is durable on a quorum; a missed directory push
            // costs discoverability until the terms are reported again.
            tracing::error!(
                node_id = %self.node_id,
                doc_id = %doc.doc_id,
                error = %e,
                "failed to push directory deltas"
            );
        }

        Ok(receipt)
    }

    /// Undo a tentative write locally and on every replica that acked.
    async fn rollback(&self, doc_id: &DocId, ackers: &[NodeId]) {
        self.remove_local(doc_id);
        let replies = join_all(ackers.iter().map(|peer| {
            let transport = self.transport.clone();
            let request = RollbackDocRequest {
                doc_id: doc_id.clone(),
            };
            let timeout = self.config.replicate_timeout();
            let peer = *peer;
            async move {
                transport
                    .send(peer, ClusterMessage::RollbackDoc(request), timeout)
                    .await
            }
        }))
        .await;
        for (peer, reply) in ackers.iter().zip(replies) {
            if let Err(e) = reply {
                tracing::error!(
                    node_id = %self.node_id,
                    doc_id = %doc_id,
                    peer = %peer,
                    error = %e,
                    "rollback not acknowledged"
                );
            }
        }
    }

    /// Report every (term, replica) pair of a committed write to the Raft
    /// leader. Transport failures are retried once against a re-resolved
    /// leader.
    async fn push_directory_deltas(&self, terms: &[String], replicas: &[NodeId]) -> Result<()> {
        let deltas: Vec<DirectoryCommand> = terms
            .iter()
            .flat_map(|term| {
                replicas.iter().map(|node| DirectoryCommand::Add {
                    term: term.clone(),
                    node: *node,
                })
            })
            .collect();
        if deltas.is_empty() {
            return Ok(());
        }

        match self.submit_deltas(&deltas).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::debug!(
                    node_id = %self.node_id,
                    error = %first,
                    "directory push failed, retrying once"
                );
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.submit_deltas(&deltas).await
            }
        }
    }

    async fn submit_deltas(&self, deltas: &[DirectoryCommand]) -> Result<()> {
        let leader = self
            .raft
            .wait_for_leader(self.config.directory_wait_timeout())
            .await?;
        if leader == self.node_id {
            for delta in deltas {
                self.raft.submit(delta.encode()?).await?;
            }
            return Ok(());
        }

        let request = DirectoryDeltaRequest {
            deltas: deltas.to_vec(),
        };
        let reply = self
            .transport
            .send(
                leader,
                ClusterMessage::DirectoryDelta(request),
                self.config.rpc_timeout(),
            )
            .await?;
        match reply {
            ClusterMessage::Ack => Ok(()),
            other => Err(SearchError::InvalidState(format!(
                "unexpected delta reply {}",
                other.kind()
            ))),
        }
    }

    /// Apply a ReplicateDoc from the primary. Idempotent: a replica that
    /// already holds the document acknowledges without reapplying.
    pub async fn handle_replicate(&self, request: ReplicateDocRequest) -> Result<ReplicateDocAck> {
        let doc = request.doc;
        let lock = self.doc_lock(&doc.doc_id);
        let _guard = lock.lock().await;

        if self.store.exists(&doc.doc_id) {
            return Ok(ReplicateDocAck {
                node_id: self.node_id,
                already_present: true,
            });
        }

        let terms = self.tokenizer.tokenize(&doc.content);
        self.store.put(doc.clone());
        self.index.add(&doc.doc_id, &terms);
        tracing::debug!(node_id = %self.node_id, doc_id = %doc.doc_id, "replica stored");

        Ok(ReplicateDocAck {
            node_id: self.node_id,
            already_present: false,
        })
    }

    /// Apply a RollbackDoc; removing an absent document is a no-op.
    pub async fn handle_rollback(&self, request: RollbackDocRequest) -> Result<()> {
        let lock = self.doc_lock(&request.doc_id);
        let _guard = lock.lock().await;
        self.remove_local(&request.doc_id);
        tracing::debug!(node_id = %self.node_id, doc_id = %request.doc_id, "replica rolled back");
        Ok(())
    }

    fn remove_local(&self, doc_id: &DocId) {
        self.index.remove(doc_id);
        self.store.delete(doc_id);
    }
}
