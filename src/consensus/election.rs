// Raft Leader Election
//
// Leader election with randomized timeouts:
// - Followers and candidates that hear nothing within their timeout start
//   an election for the next term
// - RequestVote fan-out over the transport, counted as replies arrive so a
//   quorum promotes the candidate without waiting for stragglers
// - Vote grant rules: term check, one vote per term, candidate log at
//   least as up-to-date as ours

use super::log::RaftLog;
use super::state::{HardStateStore, RaftRole, RaftState};
use super::persist_hard_state;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::network::message::ClusterMessage;
use crate::network::transport::Transport;
use crate::types::{LogIndex, NodeId, Term};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Vote request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Candidate's term
    pub term: Term,

    /// Candidate requesting the vote
    pub candidate_id: NodeId,

    /// Index of candidate's last log entry
    pub last_log_index: LogIndex,

    /// Term of candidate's last log entry
    pub last_log_term: Term,
}

/// Vote response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Current term, for the candidate to update itself
    pub term: Term,

    /// True if the candidate received the vote
    pub vote_granted: bool,
}

/// Election manager
pub struct ElectionManager {
    node_id: NodeId,

    config: Arc<ClusterConfig>,

    /// Shared Raft state
    state: Arc<RwLock<RaftState>>,

    /// Shared Raft log
    log: Arc<RwLock<RaftLog>>,

    transport: Arc<dyn Transport>,

    hard_state: Option<Arc<dyn HardStateStore>>,

    /// Current randomized election timeout
    election_timeout: RwLock<Duration>,

    /// Last time we heard from a leader or granted a vote
    last_activity: RwLock<Instant>,
}

impl ElectionManager {
    pub fn new(
        node_id: NodeId,
        config: Arc<ClusterConfig>,
        state: Arc<RwLock<RaftState>>,
        log: Arc<RwLock<RaftLog>>,
        transport: Arc<dyn Transport>,
        hard_state: Option<Arc<dyn HardStateStore>>,
    ) -> Self {
        let timeout = Self::random_election_timeout(&config);
        Self {
            node_id,
            config,
            state,
            log,
            transport,
            hard_state,
            election_timeout: RwLock::new(timeout),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    fn random_election_timeout(config: &ClusterConfig) -> Duration {
        let min = config.election_timeout_min_ms;
        let max = config.election_timeout_max_ms;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    async fn reset_election_timeout(&self) {
        *self.election_timeout.write().await = Self::random_election_timeout(&self.config);
        *self.last_activity.write().await = Instant::now();
    }

    /// Record leader contact or a granted vote.
    pub async fn record_activity(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    /// Called by the election ticker; starts an election when the timeout
    /// elapsed. Returns true when this node became leader.
    pub async fn check_election_timeout(&self) -> Result<bool> {
        let elapsed = self.last_activity.read().await.elapsed();
        let timeout = *self.election_timeout.read().await;
        if elapsed < timeout {
            return Ok(false);
        }

        let role = self.state.read().await.role;
        if role == RaftRole::Leader {
            return Ok(false);
        }
        self.start_election().await
    }

    /// Transition to candidate and solicit votes. Returns true when a
    /// quorum granted the vote and this node became leader.
    pub async fn start_election(&self) -> Result<bool> {
        let (term, quorum, peers, request) = {
            let mut state = self.state.write().await;
            if state.role == RaftRole::Leader {
                return Ok(false);
            }
            state.current_term += 1;
            state.role = RaftRole::Candidate;
            state.voted_for = Some(self.node_id);
            state.leader_id = None;

            let log = self.log.read().await;
            persist_hard_state(&self.hard_state, &state, &log)?;

            let request = VoteRequest {
                term: state.current_term,
                candidate_id: self.node_id,
                last_log_index: log.last_index(),
                last_log_term: log.last_term(),
            };
            (
                state.current_term,
                state.quorum(),
                state.peers(self.node_id),
                request,
            )
        };

        self.reset_election_timeout().await;
        tracing::info!(node_id = %self.node_id, term, "starting election");

        let rpc_timeout = self.config.rpc_timeout();
        let mut pending: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| {
                let transport = self.transport.clone();
                let request = request.clone();
                let peer = *peer;
                async move {
                    transport
                        .send(peer, ClusterMessage::RequestVote(request), rpc_timeout)
                        .await
                }
            })
            .collect();

        let mut granted = 1usize;
        while granted < quorum {
            match pending.next().await {
                Some(Ok(ClusterMessage::RequestVoteReply(reply))) => {
                    if reply.term > term {
                        self.step_down(reply.term).await?;
                        return Ok(false);
                    }
                    if reply.vote_granted {
                        granted += 1;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }

        if granted < quorum {
            tracing::debug!(node_id = %self.node_id, term, granted, "election lost");
            return Ok(false);
        }
        self.become_leader(term).await
    }

    /// Promote to leader for `term` unless the world moved on meanwhile.
    async fn become_leader(&self, term: Term) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.role != RaftRole::Candidate || state.current_term != term {
            return Ok(false);
        }

        state.role = RaftRole::Leader;
        state.leader_id = Some(self.node_id);

        let log = self.log.read().await;
        let next = log.last_index() + 1;
        drop(log);

        let peers = state.peers(self.node_id);
        for peer in peers {
            state.next_index.insert(peer, next);
            state.match_index.insert(peer, 0);
        }

        tracing::info!(node_id = %self.node_id, term, "became leader");
        Ok(true)
    }

    /// Handle a vote request from a candidate.
    pub async fn handle_vote_request(&self, request: VoteRequest) -> Result<VoteResponse> {
        let granted = {
            let mut state = self.state.write().await;
            let log = self.log.read().await;

            if request.term > state.current_term {
                state.step_down(request.term);
                persist_hard_state(&self.hard_state, &state, &log)?;
            }

            if request.term < state.current_term {
                return Ok(VoteResponse {
                    term: state.current_term,
                    vote_granted: false,
                });
            }

            let already_voted = state
                .voted_for
                .is_some_and(|voted| voted != request.candidate_id);
            let log_ok = request.last_log_term > log.last_term()
                || (request.last_log_term == log.last_term()
                    && request.last_log_index >= log.last_index());

            if already_voted || !log_ok {
                false
            } else {
                state.voted_for = Some(request.candidate_id);
                persist_hard_state(&self.hard_state, &state, &log)?;
                true
            }
        };

        if granted {
            self.reset_election_timeout().await;
            tracing::debug!(
                node_id = %self.node_id,
                candidate = %request.candidate_id,
                term = request.term,
                "vote granted"
            );
        }

        Ok(VoteResponse {
            term: request.term,
            vote_granted: granted,
        })
    }

    /// Step down to follower after observing a newer term.
    pub async fn step_down(&self, term: Term) -> Result<()> {
        let mut state = self.state.write().await;
        if term >= state.current_term && state.role != RaftRole::Follower {
            tracing::info!(node_id = %self.node_id, term, "stepping down to follower");
        }
        state.step_down(term);
        let log = self.log.read().await;
        persist_hard_state(&self.hard_state, &state, &log)
    }
}
