// Raft Consensus
//
// Classic Raft over the cluster transport: leader election with randomized
// timeouts, heartbeat-driven log replication, quorum commit. The applied
// state machine is opaque here; committed commands stream to a subscriber
// channel in log order and the coordinator interprets them.
//
// Reference: https://raft.github.io/raft.pdf

pub mod election;
pub mod log;
pub mod replication;
pub mod state;

pub use election::{ElectionManager, VoteRequest, VoteResponse};
pub use log::{LogEntry, RaftLog};
pub use replication::{AppendEntriesRequest, AppendEntriesResponse, LogReplicator};
pub use state::{HardState, HardStateStore, RaftRole, RaftState};

use crate::config::ClusterConfig;
use crate::error::{Result, SearchError};
use crate::network::transport::Transport;
use crate::types::{LogIndex, NodeId, Term};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time;

/// A committed log entry handed to the state-machine subscriber.
#[derive(Debug, Clone)]
pub struct AppliedCommand {
    pub index: LogIndex,
    pub term: Term,
    pub command: Vec<u8>,
}

/// Write the persistent Raft state through the configured store, if any.
/// Callers hold the state and log locks, so the write lands before any
/// reply that depends on it is sent.
pub(crate) fn persist_hard_state(
    store: &Option<Arc<dyn HardStateStore>>,
    state: &RaftState,
    log: &RaftLog,
) -> Result<()> {
    if let Some(store) = store {
        store.persist(&HardState {
            current_term: state.current_term,
            voted_for: state.voted_for,
            entries: log.all_entries(),
        })?;
    }
    Ok(())
}

/// One node's Raft participant.
pub struct RaftNode {
    node_id: NodeId,

    config: Arc<ClusterConfig>,

    state: Arc<RwLock<RaftState>>,

    log: Arc<RwLock<RaftLog>>,

    election: Arc<ElectionManager>,

    replicator: Arc<LogReplicator>,

    hard_state: Option<Arc<dyn HardStateStore>>,

    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl RaftNode {
    /// Build a Raft node, restoring persisted hard state when available.
    /// Returns the node and the receiver of committed commands.
    pub fn new(
        config: Arc<ClusterConfig>,
        transport: Arc<dyn Transport>,
        hard_state: Option<Arc<dyn HardStateStore>>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<AppliedCommand>)> {
        let node_id = config.node_id;
        let mut initial = RaftState::new(node_id, config.member_ids());
        let mut log = RaftLog::new();

        if let Some(store) = &hard_state {
            if let Some(persisted) = store.load()? {
                initial.current_term = persisted.current_term;
                initial.voted_for = persisted.voted_for;
                log = RaftLog::from_entries(persisted.entries)?;
                tracing::info!(
                    node_id = %node_id,
                    term = initial.current_term,
                    log_len = log.len(),
                    "restored raft hard state"
                );
            }
        }

        let state = Arc::new(RwLock::new(initial));
        let log = Arc::new(RwLock::new(log));
        let (apply_tx, apply_rx) = mpsc::channel(1024);

        let election = Arc::new(ElectionManager::new(
            node_id,
            config.clone(),
            state.clone(),
            log.clone(),
            transport.clone(),
            hard_state.clone(),
        ));
        let replicator = Arc::new(LogReplicator::new(
            node_id,
            config.clone(),
            state.clone(),
            log.clone(),
            transport,
            hard_state.clone(),
            apply_tx,
        ));

        let node = Arc::new(Self {
            node_id,
            config,
            state,
            log,
            election,
            replicator,
            hard_state,
            shutdown: Mutex::new(None),
        });
        Ok((node, apply_rx))
    }

    /// Start the election and heartbeat tickers.
    pub async fn start(&self) {
        let (shutdown_tx, _) = watch::channel(false);

        let election = self.election.clone();
        let replicator = self.replicator.clone();
        let node_id = self.node_id;
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(25));
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match election.check_election_timeout().await {
                            Ok(true) => {
                                // Fresh leaders assert themselves at once
                                // and commit a no-op to release the
                                // inherited log prefix.
                                if let Err(e) = replicator.append_noop().await {
                                    tracing::warn!(node_id = %node_id, error = %e, "no-op append failed");
                                }
                                if let Err(e) = replicator.broadcast().await {
                                    tracing::warn!(node_id = %node_id, error = %e, "post-election heartbeat failed");
                                }
                            }
                            Ok(false) => {}
                            Err(e) => {
                                tracing::error!(node_id = %node_id, error = %e, "election check failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        let replicator = self.replicator.clone();
        let state = self.state.clone();
        let node_id = self.node_id;
        let heartbeat = self.config.heartbeat_interval();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = time::interval(heartbeat);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let is_leader = state.read().await.role == RaftRole::Leader;
                        if is_leader {
                            if let Err(e) = replicator.broadcast().await {
                                tracing::warn!(node_id = %node_id, error = %e, "heartbeat round failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *self.shutdown.lock().await = Some(shutdown_tx);
    }

    /// Stop the tickers; in-flight exchanges drain on their own.
    pub async fn stop(&self) {
        if let Some(shutdown_tx) = self.shutdown.lock().await.take() {
            let _ = shutdown_tx.send(true);
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub async fn current_term(&self) -> Term {
        self.state.read().await.current_term
    }

    pub async fn current_role(&self) -> RaftRole {
        self.state.read().await.role
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.role == RaftRole::Leader
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        self.state.read().await.leader_id
    }

    /// Poll until some leader is known, up to the deadline.
    pub async fn wait_for_leader(&self, deadline: Duration) -> Result<NodeId> {
        let start = time::Instant::now();
        loop {
            if let Some(leader) = self.leader_id().await {
                return Ok(leader);
            }
            if start.elapsed() >= deadline {
                return Err(SearchError::NoLeader);
            }
            time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Append a state-machine command to the replicated log. Leader only;
    /// the entry commits asynchronously once a quorum holds it.
    pub async fn submit(&self, command: Vec<u8>) -> Result<LogIndex> {
        let index = {
            let state = self.state.read().await;
            if state.role != RaftRole::Leader {
                return Err(SearchError::NoLeader);
            }
            let mut log = self.log.write().await;
            let index = log.last_index() + 1;
            log.append(LogEntry::new(state.current_term, index, command))?;
            persist_hard_state(&self.hard_state, &state, &log)?;
            index
        };

        self.replicator.broadcast().await?;
        Ok(index)
    }

    /// Route an incoming RequestVote to the election manager.
    pub async fn handle_request_vote(&self, request: VoteRequest) -> Result<VoteResponse> {
        self.election.handle_vote_request(request).await
    }

    /// Route an incoming AppendEntries to the replicator, counting valid
    /// leader contact as election activity.
    pub async fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let live_leader = request.term >= self.state.read().await.current_term;
        let response = self.replicator.handle_append_entries(request).await?;
        if live_leader {
            self.election.record_activity().await;
        }
        Ok(response)
    }
}
