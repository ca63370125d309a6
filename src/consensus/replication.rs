// Raft Log Replication
//
// Leader-side AppendEntries fan-out and follower-side log maintenance:
// - Heartbeats double as replication; entries ride from each follower's
//   next_index
// - Consistency check with conflict-index fast backtracking
// - Commit advancement on quorum match, current-term entries only
// - Committed entries stream to the state-machine subscriber in order

use super::log::{LogEntry, RaftLog};
use super::state::{HardStateStore, RaftRole, RaftState};
use super::{persist_hard_state, AppliedCommand};
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::network::message::ClusterMessage;
use crate::network::transport::Transport;
use crate::types::{LogIndex, NodeId, Term};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// AppendEntries request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub term: Term,

    /// Leader's node id
    pub leader_id: NodeId,

    /// Index of the log entry immediately preceding the new ones
    pub prev_log_index: LogIndex,

    /// Term of the prev_log_index entry
    pub prev_log_term: Term,

    /// Entries to store; empty for a heartbeat
    pub entries: Vec<LogEntry>,

    /// Leader's commit index
    pub leader_commit: LogIndex,
}

/// AppendEntries response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Current term, for the leader to update itself
    pub term: Term,

    /// True if the follower matched prev_log_index/prev_log_term
    pub success: bool,

    /// Follower's last replicated index on success
    pub match_index: LogIndex,

    /// First index of the conflicting term, for fast next_index rollback
    pub conflict_index: Option<LogIndex>,
}

/// Log replicator; owned by the RaftNode and shared with its tick tasks.
pub struct LogReplicator {
    node_id: NodeId,

    config: Arc<ClusterConfig>,

    /// Shared Raft state
    state: Arc<RwLock<RaftState>>,

    /// Shared Raft log
    log: Arc<RwLock<RaftLog>>,

    transport: Arc<dyn Transport>,

    hard_state: Option<Arc<dyn HardStateStore>>,

    /// Committed commands flow to the coordinator through this channel
    apply_tx: mpsc::Sender<AppliedCommand>,

    /// Serializes apply passes so commands reach the subscriber in order
    apply_mutex: Mutex<()>,

    /// Peers with an AppendEntries exchange currently in flight
    inflight: DashMap<NodeId, ()>,
}

impl LogReplicator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        config: Arc<ClusterConfig>,
        state: Arc<RwLock<RaftState>>,
        log: Arc<RwLock<RaftLog>>,
        transport: Arc<dyn Transport>,
        hard_state: Option<Arc<dyn HardStateStore>>,
        apply_tx: mpsc::Sender<AppliedCommand>,
    ) -> Self {
        Self {
            node_id,
            config,
            state,
            log,
            transport,
            hard_state,
            apply_tx,
            apply_mutex: Mutex::new(()),
            inflight: DashMap::new(),
        }
    }

    /// Append a no-op entry as a fresh leader. Raft only commits entries
    /// of the current term directly; the no-op drags the inherited prefix
    /// to commit so the state machine catches up without client traffic.
    pub async fn append_noop(&self) -> Result<()> {
        let state = self.state.read().await;
        if state.role != RaftRole::Leader {
            return Ok(());
        }
        let mut log = self.log.write().await;
        let index = log.last_index() + 1;
        log.append(LogEntry::new(state.current_term, index, Vec::new()))?;
        persist_hard_state(&self.hard_state, &state, &log)?;
        Ok(())
    }

    /// One replication round: send AppendEntries to every peer without an
    /// exchange already in flight. Called by the heartbeat ticker and after
    /// a local append. Also advances the commit index, which for a
    /// single-node cluster is the only commit path.
    pub async fn broadcast(self: &Arc<Self>) -> Result<()> {
        let requests = {
            let state = self.state.read().await;
            if state.role != RaftRole::Leader {
                return Ok(());
            }
            let log = self.log.read().await;
            let peers = state.peers(self.node_id);
            let mut requests = Vec::with_capacity(peers.len());
            for peer in peers {
                let next_index = state.next_index.get(&peer).copied().unwrap_or(1);
                let prev_log_index = next_index.saturating_sub(1);
                let request = AppendEntriesRequest {
                    term: state.current_term,
                    leader_id: self.node_id,
                    prev_log_index,
                    prev_log_term: log.term_at(prev_log_index).unwrap_or(0),
                    entries: log.entries_from(next_index),
                    leader_commit: state.commit_index,
                };
                requests.push((peer, request));
            }
            requests
        };

        if self.try_advance_commit().await? {
            self.apply_committed().await?;
        }

        for (peer, request) in requests {
            if self.inflight.insert(peer, ()).is_some() {
                continue;
            }
            let replicator = self.clone();
            let rpc_timeout = self.config.rpc_timeout();
            tokio::spawn(async move {
                let reply = replicator
                    .transport
                    .send(peer, ClusterMessage::AppendEntries(request), rpc_timeout)
                    .await;
                replicator.inflight.remove(&peer);
                if let Ok(ClusterMessage::AppendEntriesReply(response)) = reply {
                    if let Err(e) = replicator.handle_append_response(peer, response).await {
                        tracing::warn!(
                            node_id = %replicator.node_id,
                            peer = %peer,
                            error = %e,
                            "failed to process append response"
                        );
                    }
                }
            });
        }
        Ok(())
    }

    /// Process a follower's AppendEntries response (as leader).
    async fn handle_append_response(
        &self,
        peer: NodeId,
        response: AppendEntriesResponse,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if response.term > state.current_term {
                state.step_down(response.term);
                let log = self.log.read().await;
                persist_hard_state(&self.hard_state, &state, &log)?;
                return Ok(());
            }
            if state.role != RaftRole::Leader {
                return Ok(());
            }

            if response.success {
                state.next_index.insert(peer, response.match_index + 1);
                state.match_index.insert(peer, response.match_index);
            } else if let Some(conflict_index) = response.conflict_index {
                state.next_index.insert(peer, conflict_index.max(1));
            } else {
                let next = state.next_index.get(&peer).copied().unwrap_or(1);
                state.next_index.insert(peer, next.saturating_sub(1).max(1));
            }
        }

        if response.success && self.try_advance_commit().await? {
            self.apply_committed().await?;
        }
        Ok(())
    }

    /// Advance the commit index to the highest entry replicated on a
    /// quorum; restricted to entries of the current term.
    async fn try_advance_commit(&self) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.role != RaftRole::Leader {
            return Ok(false);
        }
        let log = self.log.read().await;

        let mut advanced = false;
        for n in (state.commit_index + 1)..=log.last_index() {
            let replicas = 1 + state
                .match_index
                .values()
                .filter(|match_index| **match_index >= n)
                .count();
            if replicas < state.quorum() {
                break;
            }
            if log.term_at(n) == Some(state.current_term) {
                state.commit_index = n;
                advanced = true;
            }
        }

        if advanced {
            tracing::debug!(
                node_id = %self.node_id,
                commit_index = state.commit_index,
                "advanced commit index"
            );
        }
        Ok(advanced)
    }

    /// Stream newly committed entries to the subscriber, in log order.
    pub async fn apply_committed(&self) -> Result<()> {
        let _guard = self.apply_mutex.lock().await;
        loop {
            let entry = {
                let mut state = self.state.write().await;
                if state.last_applied >= state.commit_index {
                    break;
                }
                state.last_applied += 1;
                let log = self.log.read().await;
                log.get(state.last_applied).cloned()
            };
            if let Some(entry) = entry {
                let applied = AppliedCommand {
                    index: entry.index,
                    term: entry.term,
                    command: entry.command,
                };
                let _ = self.apply_tx.send(applied).await;
            }
        }
        Ok(())
    }

    /// Handle an AppendEntries request from a leader (as follower).
    pub async fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let (response, commit_moved) = {
            let mut state = self.state.write().await;

            let term_advanced = request.term > state.current_term;
            if term_advanced {
                state.step_down(request.term);
            }
            if request.term < state.current_term {
                return Ok(AppendEntriesResponse {
                    term: state.current_term,
                    success: false,
                    match_index: 0,
                    conflict_index: None,
                });
            }
            // A candidate of the same term yields to the established leader.
            if state.role != RaftRole::Follower {
                state.role = RaftRole::Follower;
            }
            state.leader_id = Some(request.leader_id);

            let mut log = self.log.write().await;

            // Consistency check on the entry preceding the new ones.
            match log.term_at(request.prev_log_index) {
                None => {
                    // Log too short; ask the leader to back up to our tail.
                    persist_hard_state(&self.hard_state, &state, &log)?;
                    return Ok(AppendEntriesResponse {
                        term: state.current_term,
                        success: false,
                        match_index: 0,
                        conflict_index: Some(log.last_index() + 1),
                    });
                }
                Some(term) if term != request.prev_log_term => {
                    // Walk to the first entry of the conflicting term.
                    let mut conflict_index = request.prev_log_index;
                    while conflict_index > 1 && log.term_at(conflict_index - 1) == Some(term) {
                        conflict_index -= 1;
                    }
                    persist_hard_state(&self.hard_state, &state, &log)?;
                    return Ok(AppendEntriesResponse {
                        term: state.current_term,
                        success: false,
                        match_index: 0,
                        conflict_index: Some(conflict_index),
                    });
                }
                Some(_) => {}
            }

            // Append, truncating any conflicting suffix first. Entries the
            // follower already holds with matching terms are skipped so
            // duplicated heartbeats stay idempotent.
            let mut mutated = false;
            for entry in &request.entries {
                match log.term_at(entry.index) {
                    Some(term) if term == entry.term => continue,
                    Some(_) => {
                        log.truncate_from(entry.index);
                        log.append(entry.clone())?;
                        mutated = true;
                    }
                    None => {
                        log.append(entry.clone())?;
                        mutated = true;
                    }
                }
            }

            if mutated || term_advanced {
                persist_hard_state(&self.hard_state, &state, &log)?;
            }

            // The index we can vouch for: the consistency point plus what
            // this request carried, regardless of older entries behind it.
            let match_index = request.prev_log_index + request.entries.len() as u64;
            let mut commit_moved = false;
            if request.leader_commit > state.commit_index {
                let target = request.leader_commit.min(match_index);
                if target > state.commit_index {
                    state.commit_index = target;
                    commit_moved = true;
                }
            }

            (
                AppendEntriesResponse {
                    term: state.current_term,
                    success: true,
                    match_index,
                    conflict_index: None,
                },
                commit_moved,
            )
        };

        if commit_moved {
            self.apply_committed().await?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::network::transport::InMemoryHub;

    fn test_replicator(
        members: u64,
    ) -> (
        Arc<RwLock<RaftState>>,
        Arc<RwLock<RaftLog>>,
        Arc<LogReplicator>,
        mpsc::Receiver<AppliedCommand>,
    ) {
        let peers: Vec<PeerConfig> = (0..members)
            .map(|i| PeerConfig {
                id: NodeId::new(i),
                addr: format!("127.0.0.1:{}", 7950 + i),
            })
            .collect();
        let config = Arc::new(ClusterConfig::new(NodeId::new(0), peers));
        let state = Arc::new(RwLock::new(RaftState::new(
            NodeId::new(0),
            config.member_ids(),
        )));
        let log = Arc::new(RwLock::new(RaftLog::new()));
        let hub = InMemoryHub::new();
        let transport = Arc::new(hub.transport(NodeId::new(0)));
        let (apply_tx, apply_rx) = mpsc::channel(64);
        let replicator = Arc::new(LogReplicator::new(
            NodeId::new(0),
            config,
            state.clone(),
            log.clone(),
            transport,
            None,
            apply_tx,
        ));
        (state, log, replicator, apply_rx)
    }

    #[tokio::test]
    async fn test_append_entries_success() {
        let (_state, _log, replicator, _rx) = test_replicator(3);
        let response = replicator
            .handle_append_entries(AppendEntriesRequest {
                term: 1,
                leader_id: NodeId::new(1),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![LogEntry::new(1, 1, vec![1, 2, 3])],
                leader_commit: 0,
            })
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.match_index, 1);
    }

    #[tokio::test]
    async fn test_append_entries_rejects_stale_term() {
        let (state, _log, replicator, _rx) = test_replicator(3);
        state.write().await.current_term = 5;

        let response = replicator
            .handle_append_entries(AppendEntriesRequest {
                term: 3,
                leader_id: NodeId::new(1),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![],
                leader_commit: 0,
            })
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.term, 5);
    }

    #[tokio::test]
    async fn test_append_entries_conflict_backtracks() {
        let (_state, log, replicator, _rx) = test_replicator(3);
        {
            let mut log = log.write().await;
            log.append(LogEntry::new(1, 1, vec![])).unwrap();
            log.append(LogEntry::new(1, 2, vec![])).unwrap();
        }

        // Leader claims entry 2 has term 2; we stored term 1.
        let response = replicator
            .handle_append_entries(AppendEntriesRequest {
                term: 2,
                leader_id: NodeId::new(1),
                prev_log_index: 2,
                prev_log_term: 2,
                entries: vec![],
                leader_commit: 0,
            })
            .await
            .unwrap();
        assert!(!response.success);
        // First index of the conflicting term run (term 1 starts at 1).
        assert_eq!(response.conflict_index, Some(1));
    }

    #[tokio::test]
    async fn test_append_entries_truncates_conflicting_suffix() {
        let (_state, log, replicator, _rx) = test_replicator(3);
        {
            let mut log = log.write().await;
            log.append(LogEntry::new(1, 1, vec![1])).unwrap();
            log.append(LogEntry::new(1, 2, vec![2])).unwrap();
        }

        let response = replicator
            .handle_append_entries(AppendEntriesRequest {
                term: 2,
                leader_id: NodeId::new(1),
                prev_log_index: 1,
                prev_log_term: 1,
                entries: vec![LogEntry::new(2, 2, vec![9])],
                leader_commit: 0,
            })
            .await
            .unwrap();
        assert!(response.success);
        let log = log.read().await;
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.get(2).unwrap().term, 2);
        assert_eq!(log.get(2).unwrap().command, vec![9]);
    }

    #[tokio::test]
    async fn test_commit_applies_in_order() {
        let (_state, _log, replicator, mut apply_rx) = test_replicator(3);
        replicator
            .handle_append_entries(AppendEntriesRequest {
                term: 1,
                leader_id: NodeId::new(1),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![
                    LogEntry::new(1, 1, vec![1]),
                    LogEntry::new(1, 2, vec![2]),
                ],
                leader_commit: 2,
            })
            .await
            .unwrap();

        let first = apply_rx.recv().await.unwrap();
        let second = apply_rx.recv().await.unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(second.index, 2);
        assert_eq!(second.command, vec![2]);
    }

    #[tokio::test]
    async fn test_single_node_commit_via_broadcast() {
        let (state, log, replicator, mut apply_rx) = test_replicator(1);
        {
            let mut state = state.write().await;
            state.role = RaftRole::Leader;
            state.current_term = 1;
            state.leader_id = Some(NodeId::new(0));
        }
        {
            let mut log = log.write().await;
            log.append(LogEntry::new(1, 1, vec![7])).unwrap();
        }

        replicator.broadcast().await.unwrap();
        let applied = apply_rx.recv().await.unwrap();
        assert_eq!(applied.index, 1);
        assert_eq!(applied.command, vec![7]);
        assert_eq!(state.read().await.commit_index, 1);
    }
}
