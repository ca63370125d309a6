// Node Coordinator
//
// Composition root of a node. Owns the tokenizer, local index, document
// store, Raft participant, quorum replicator, term directory and its
// cache, and wires them together:
// - public operations: add, search, status
// - inbound dispatch: every transport message lands here and is routed to
//   the owning component
// - Raft apply subscription: committed directory deltas update the local
//   view, and the leader broadcasts cache invalidations
//
// Raft never references the coordinator; the dependency points one way.

use crate::config::ClusterConfig;
use crate::consensus::{AppliedCommand, RaftNode, RaftRole};
use crate::directory::{DirectoryCache, DirectoryCommand, TermDirectory};
use crate::document_store::{Document, DocumentStore};
use crate::error::{Result, SearchError};
use crate::index::{InvertedIndex, Tokenizer};
use crate::network::message::{
    CacheInvalidateRequest, ClusterMessage, DirectoryLookupResponse, ForwardAddRequest,
};
use crate::network::transport::{MessageHandler, Transport};
use crate::persistence::SnapshotStore;
use crate::query::{QueryExecutor, SearchResponse};
use crate::replication::{AddReceipt, QuorumReplicator};
use crate::types::{DocId, NodeId, Term};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Snapshot of a node's health and cluster view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,

    pub raft_role: RaftRole,

    pub term: Term,

    pub leader_id: Option<NodeId>,

    pub known_peers: Vec<NodeId>,

    pub doc_count: usize,

    pub uptime: Duration,
}

/// Per-node orchestrator exposing the public cluster operations.
pub struct Coordinator {
    node_id: NodeId,

    config: Arc<ClusterConfig>,

    index: Arc<InvertedIndex>,

    store: Arc<DocumentStore>,

    raft: Arc<RaftNode>,

    replicator: Arc<QuorumReplicator>,

    directory: Arc<TermDirectory>,

    cache: Arc<DirectoryCache>,

    query: Arc<QueryExecutor>,

    transport: Arc<dyn Transport>,

    snapshots: Option<Arc<SnapshotStore>>,

    started_at: Instant,

    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    /// Build and start a node: restore snapshots when configured, start
    /// the Raft tickers, subscribe to the apply stream.
    pub async fn bootstrap(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);
        let node_id = config.node_id;

        let tokenizer = Arc::new(match &config.stopwords_override {
            Some(words) => Tokenizer::with_stopwords(words.iter().cloned()),
            None => Tokenizer::new(),
        });
        let index = Arc::new(InvertedIndex::new());
        let store = Arc::new(DocumentStore::new());
        let directory = Arc::new(TermDirectory::new());
        let cache = Arc::new(DirectoryCache::new(config.directory_cache_ttl()));

        let snapshots = match &config.snapshot_dir {
            Some(dir) => Some(Arc::new(SnapshotStore::new(dir.clone())?)),
            None => None,
        };

        // Restore the local plane before joining the cluster. Documents
        // are authoritative; the index is rebuilt by re-tokenizing so the
        // postings always agree with the stored content.
        if let Some(snapshots) = &snapshots {
            let documents = snapshots.load_documents()?;
            if !documents.is_empty() {
                tracing::info!(
                    node_id = %node_id,
                    documents = documents.len(),
                    "restoring documents from snapshot"
                );
                for doc in documents {
                    let terms = tokenizer.tokenize(&doc.content);
                    index.add(&doc.doc_id, &terms);
                    store.put(doc);
                }
            }
        }

        let hard_state = snapshots
            .clone()
            .map(|s| s as Arc<dyn crate::consensus::HardStateStore>);
        let (raft, apply_rx) = RaftNode::new(config.clone(), transport.clone(), hard_state)?;

        let replicator = Arc::new(QuorumReplicator::new(
            config.clone(),
            tokenizer.clone(),
            index.clone(),
            store.clone(),
            raft.clone(),
            transport.clone(),
        ));
        let query = Arc::new(QueryExecutor::new(
            config.clone(),
            tokenizer.clone(),
            index.clone(),
            directory.clone(),
            cache.clone(),
            raft.clone(),
            transport.clone(),
        ));

        let (shutdown, _) = watch::channel(false);
        let coordinator = Arc::new(Self {
            node_id,
            config,
            index,
            store,
            raft,
            replicator,
            directory,
            cache,
            query,
            transport,
            snapshots,
            started_at: Instant::now(),
            shutdown,
        });

        coordinator.spawn_apply_loop(apply_rx);
        coordinator.spawn_snapshot_loop();
        coordinator.raft.start().await;

        tracing::info!(
            node_id = %node_id,
            members = coordinator.config.peers.len(),
            replication_factor = coordinator.config.replication_factor,
            "node started"
        );
        Ok(coordinator)
    }

    /// Stop background tasks; in-flight requests drain on their own.
    pub async fn shutdown(&self) {
        self.raft.stop().await;
        let _ = self.shutdown.send(true);
        if let Some(snapshots) = &self.snapshots {
            if let Err(e) = self.write_data_snapshot(snapshots) {
                tracing::warn!(node_id = %self.node_id, error = %e, "final snapshot failed");
            }
        }
        tracing::info!(node_id = %self.node_id, "node stopped");
    }

    /// Add a document to the cluster. Non-primary receivers forward to the
    /// primary and relay its result.
    pub async fn add(
        &self,
        doc_id: impl Into<DocId>,
        content: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Result<AddReceipt> {
        let doc = Document::new(doc_id.into(), content.into(), metadata);
        self.add_document(doc).await
    }

    /// Add a document whose id is the hash of its content.
    pub async fn add_by_content(
        &self,
        content: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Result<AddReceipt> {
        let doc = Document::from_content(content.into(), metadata);
        self.add_document(doc).await
    }

    pub async fn add_document(&self, doc: Document) -> Result<AddReceipt> {
        let primary = self.replicator.primary_for(&doc.doc_id);
        if primary == self.node_id {
            return self.replicator.write(doc).await;
        }

        tracing::debug!(
            node_id = %self.node_id,
            doc_id = %doc.doc_id,
            primary = %primary,
            "forwarding write to primary"
        );
        let request = ForwardAddRequest {
            request_id: Uuid::new_v4(),
            doc,
        };
        let reply = self
            .transport
            .send(
                primary,
                ClusterMessage::ForwardAdd(request),
                self.config.forward_timeout(),
            )
            .await;
        match reply {
            Ok(ClusterMessage::AddReply(receipt)) => Ok(receipt),
            Ok(other) => Err(SearchError::InvalidState(format!(
                "unexpected forward reply {}",
                other.kind()
            ))),
            Err(e) if e.is_transport() => {
                tracing::warn!(
                    node_id = %self.node_id,
                    primary = %primary,
                    error = %e,
                    "primary unreachable"
                );
                Err(SearchError::NoPrimaryReachable)
            }
            Err(e) => Err(e),
        }
    }

    /// Free-text search across the cluster.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        self.query.search(query, top_k).await
    }

    /// This node's view of itself and the cluster.
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id,
            raft_role: self.raft.current_role().await,
            term: self.raft.current_term().await,
            leader_id: self.raft.leader_id().await,
            known_peers: self.config.member_ids(),
            doc_count: self.store.len(),
            uptime: self.started_at.elapsed(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Whether this node currently stores the document.
    pub fn holds_document(&self, doc_id: &DocId) -> bool {
        self.store.exists(doc_id)
    }

    /// The deterministic replica set for a document id.
    pub fn replica_set(&self, doc_id: &DocId) -> Vec<NodeId> {
        self.replicator.replica_set(doc_id)
    }

    fn spawn_apply_loop(self: &Arc<Self>, mut apply_rx: mpsc::Receiver<AppliedCommand>) {
        let coordinator = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    applied = apply_rx.recv() => match applied {
                        Some(applied) => coordinator.apply_directory_command(applied).await,
                        None => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    async fn apply_directory_command(&self, applied: AppliedCommand) {
        // Leader no-op entries carry no command.
        if applied.command.is_empty() {
            return;
        }
        let delta = match DirectoryCommand::decode(&applied.command) {
            Ok(delta) => delta,
            Err(e) => {
                tracing::error!(
                    node_id = %self.node_id,
                    index = applied.index,
                    error = %e,
                    "undecodable command in log"
                );
                return;
            }
        };

        let changed = self.directory.apply(&delta);
        self.cache.invalidate(delta.term());

        // The leader tells the cluster to refetch; followers already
        // invalidated their own entry above.
        if changed && self.raft.is_leader().await {
            let request = CacheInvalidateRequest {
                terms: vec![delta.term().to_string()],
            };
            for peer in self.config.member_ids() {
                if peer == self.node_id {
                    continue;
                }
                let transport = self.transport.clone();
                let request = request.clone();
                let timeout = self.config.rpc_timeout();
                tokio::spawn(async move {
                    let _ = transport
                        .send(peer, ClusterMessage::CacheInvalidate(request), timeout)
                        .await;
                });
            }
        }
    }

    fn spawn_snapshot_loop(self: &Arc<Self>) {
        let Some(snapshots) = self.snapshots.clone() else {
            return;
        };
        let coordinator = self.clone();
        let interval = self.config.snapshot_interval();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so boot stays light.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.write_data_snapshot(&snapshots) {
                            tracing::warn!(
                                node_id = %coordinator.node_id,
                                error = %e,
                                "periodic snapshot failed"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    fn write_data_snapshot(&self, snapshots: &SnapshotStore) -> Result<()> {
        snapshots.write_documents(&self.store.snapshot())?;
        snapshots.write_index(&self.index.postings_snapshot())?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Coordinator {
    async fn handle(&self, from: NodeId, message: ClusterMessage) -> Result<ClusterMessage> {
        match message {
            ClusterMessage::RequestVote(request) => {
                let response = self.raft.handle_request_vote(request).await?;
                Ok(ClusterMessage::RequestVoteReply(response))
            }
            ClusterMessage::AppendEntries(request) => {
                let response = self.raft.handle_append_entries(request).await?;
                Ok(ClusterMessage::AppendEntriesReply(response))
            }
            ClusterMessage::ReplicateDoc(request) => {
                let ack = self.replicator.handle_replicate(request).await?;
                Ok(ClusterMessage::ReplicateDocAck(ack))
            }
            ClusterMessage::RollbackDoc(request) => {
                self.replicator.handle_rollback(request).await?;
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::ForwardAdd(request) => {
                // Writes land on the primary exactly once; a misrouted
                // forward fails rather than bouncing again.
                let receipt = self.replicator.write(request.doc).await?;
                Ok(ClusterMessage::AddReply(receipt))
            }
            ClusterMessage::SearchLocal(request) => {
                let response = self.query.search_local(&request);
                Ok(ClusterMessage::SearchLocalReply(response))
            }
            ClusterMessage::DirectoryLookup(request) => {
                if !self.raft.is_leader().await {
                    return Err(SearchError::NoLeader);
                }
                Ok(ClusterMessage::DirectoryLookupReply(DirectoryLookupResponse {
                    entries: self.directory.lookup(&request.terms),
                    version: self.directory.version(),
                }))
            }
            ClusterMessage::DirectoryDelta(request) => {
                if !self.raft.is_leader().await {
                    return Err(SearchError::NoLeader);
                }
                for delta in &request.deltas {
                    self.raft.submit(delta.encode()?).await?;
                }
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::CacheInvalidate(request) => {
                self.cache.invalidate_many(&request.terms);
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::Ping => Ok(ClusterMessage::Pong),
            other => {
                tracing::warn!(
                    node_id = %self.node_id,
                    from = %from,
                    kind = other.kind(),
                    "unexpected inbound message"
                );
                Err(SearchError::InvalidOperation(format!(
                    "{} is not a request",
                    other.kind()
                )))
            }
        }
    }
}
