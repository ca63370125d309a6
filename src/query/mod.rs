// Distributed Query Execution
//
// Scatter-gather search across the nodes that index the query's terms:
// - Term resolution through the directory cache, falling back to a leader
//   lookup
// - Parallel SearchLocal fan-out to the candidate set
// - One fallback retry against an alternative replica per failed node
// - Score aggregation: sum per document across responding nodes, ties
//   broken by document id, truncated to top_k

use crate::config::ClusterConfig;
use crate::consensus::RaftNode;
use crate::directory::{DirectoryCache, TermDirectory};
use crate::error::{Result, SearchError};
use crate::index::{InvertedIndex, Tokenizer};
use crate::network::message::{
    ClusterMessage, DirectoryLookupRequest, LocalHit, SearchLocalRequest, SearchLocalResponse,
};
use crate::network::transport::Transport;
use crate::types::{DocId, NodeId};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// One aggregated search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: DocId,

    /// Sum of the per-node TF-IDF scores
    pub score: f64,

    /// Nodes that returned this document
    pub node_hits: Vec<NodeId>,
}

/// Aggregated response of a distributed search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,

    /// True when some candidate stayed unreachable and no replica could
    /// cover its terms
    pub partial: bool,
}

impl SearchResponse {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            partial: false,
        }
    }
}

/// Per-node distributed query executor.
pub struct QueryExecutor {
    node_id: NodeId,

    config: Arc<ClusterConfig>,

    tokenizer: Arc<Tokenizer>,

    index: Arc<InvertedIndex>,

    directory: Arc<TermDirectory>,

    cache: Arc<DirectoryCache>,

    raft: Arc<RaftNode>,

    transport: Arc<dyn Transport>,
}

impl QueryExecutor {
    pub fn new(
        config: Arc<ClusterConfig>,
        tokenizer: Arc<Tokenizer>,
        index: Arc<InvertedIndex>,
        directory: Arc<TermDirectory>,
        cache: Arc<DirectoryCache>,
        raft: Arc<RaftNode>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            node_id: config.node_id,
            config,
            tokenizer,
            index,
            directory,
            cache,
            raft,
            transport,
        }
    }

    /// Execute a free-text query across the cluster.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        let terms = self.tokenizer.unique_terms(query);
        if terms.is_empty() || top_k == 0 {
            return Ok(SearchResponse::empty());
        }

        let term_nodes = self.resolve_terms(&terms).await?;
        let candidates: BTreeSet<NodeId> = term_nodes.values().flatten().copied().collect();
        if candidates.is_empty() {
            // No node indexes any of the terms; an empty result, not an
            // error.
            return Ok(SearchResponse::empty());
        }

        let request = SearchLocalRequest {
            terms: terms.clone(),
            top_k,
        };

        let mut responses: Vec<SearchLocalResponse> = Vec::new();
        let mut failed: Vec<NodeId> = Vec::new();
        let fanout = join_all(candidates.iter().map(|node| {
            let node = *node;
            let request = request.clone();
            async move { (node, self.search_on(node, request, self.config.search_timeout()).await) }
        }))
        .await;
        for (node, outcome) in fanout {
            match outcome {
                Ok(response) => responses.push(response),
                Err(e) => {
                    tracing::debug!(
                        node_id = %self.node_id,
                        target = %node,
                        error = %e,
                        "search fan-out failed"
                    );
                    failed.push(node);
                }
            }
        }

        // One fallback round: for each failed node, ask another node the
        // directory reported for any of the same terms.
        if !failed.is_empty() {
            let responded: HashSet<NodeId> = responses.iter().map(|r| r.node_id).collect();
            let failed_set: HashSet<NodeId> = failed.iter().copied().collect();
            let mut tried: HashSet<NodeId> = HashSet::new();

            for node in &failed {
                let alternative = self
                    .shared_term_nodes(*node, &term_nodes)
                    .into_iter()
                    .find(|alt| {
                        !responded.contains(alt) && !failed_set.contains(alt) && !tried.contains(alt)
                    });
                let Some(alternative) = alternative else {
                    continue;
                };
                tried.insert(alternative);
                match self
                    .search_on(
                        alternative,
                        request.clone(),
                        self.config.search_retry_timeout(),
                    )
                    .await
                {
                    Ok(response) => responses.push(response),
                    Err(e) => {
                        tracing::debug!(
                            node_id = %self.node_id,
                            target = %alternative,
                            error = %e,
                            "replica fallback failed"
                        );
                    }
                }
            }
        }

        if responses.is_empty() {
            return Err(SearchError::AllCandidatesFailed);
        }

        // A failed node is covered when every term it was consulted for
        // was answered by some responding node.
        let responded: HashSet<NodeId> = responses.iter().map(|r| r.node_id).collect();
        let partial = failed
            .iter()
            .filter(|node| !responded.contains(node))
            .any(|node| {
                term_nodes
                    .iter()
                    .filter(|(_, nodes)| nodes.contains(node))
                    .any(|(_, nodes)| !nodes.iter().any(|n| responded.contains(n)))
            });

        Ok(Self::aggregate(responses, top_k, partial))
    }

    /// AND-semantics search against the local index only.
    pub fn search_local(&self, request: &SearchLocalRequest) -> SearchLocalResponse {
        let hits = self
            .index
            .search_ranked(&request.terms, request.top_k)
            .into_iter()
            .map(|(doc_id, score)| LocalHit { doc_id, score })
            .collect();
        SearchLocalResponse {
            node_id: self.node_id,
            hits,
        }
    }

    async fn search_on(
        &self,
        node: NodeId,
        request: SearchLocalRequest,
        timeout: Duration,
    ) -> Result<SearchLocalResponse> {
        if node == self.node_id {
            return Ok(self.search_local(&request));
        }
        let reply = self
            .transport
            .send(node, ClusterMessage::SearchLocal(request), timeout)
            .await?;
        match reply {
            ClusterMessage::SearchLocalReply(response) => Ok(response),
            other => Err(SearchError::InvalidState(format!(
                "unexpected search reply {}",
                other.kind()
            ))),
        }
    }

    /// Nodes that share at least one directory term with `node`.
    fn shared_term_nodes(
        &self,
        node: NodeId,
        term_nodes: &HashMap<String, Vec<NodeId>>,
    ) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = term_nodes
            .values()
            .filter(|nodes| nodes.contains(&node))
            .flat_map(|nodes| nodes.iter().copied())
            .filter(|candidate| *candidate != node)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Resolve each term to its indexing nodes, from the cache where fresh
    /// and from the leader otherwise.
    async fn resolve_terms(&self, terms: &[String]) -> Result<HashMap<String, Vec<NodeId>>> {
        let mut resolved: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for term in terms {
            match self.cache.get(term) {
                Some(nodes) => {
                    resolved.insert(term.clone(), nodes);
                }
                None => missing.push(term.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(resolved);
        }

        let entries = match self.lookup_at_leader(&missing).await {
            Ok(entries) => entries,
            Err(e) if e.is_transport() => {
                // The leader may have just changed; resolve it again once.
                self.lookup_at_leader(&missing).await?
            }
            Err(e) => return Err(e),
        };
        for (term, nodes) in entries {
            self.cache.put(term.clone(), nodes.clone());
            resolved.insert(term, nodes);
        }
        Ok(resolved)
    }

    async fn lookup_at_leader(&self, terms: &[String]) -> Result<HashMap<String, Vec<NodeId>>> {
        let leader = self
            .raft
            .wait_for_leader(self.config.directory_wait_timeout())
            .await?;
        if leader == self.node_id {
            return Ok(self.directory.lookup(terms));
        }

        let request = DirectoryLookupRequest {
            terms: terms.to_vec(),
        };
        let reply = self
            .transport
            .send(
                leader,
                ClusterMessage::DirectoryLookup(request),
                self.config.rpc_timeout(),
            )
            .await?;
        match reply {
            ClusterMessage::DirectoryLookupReply(response) => Ok(response.entries),
            other => Err(SearchError::InvalidState(format!(
                "unexpected lookup reply {}",
                other.kind()
            ))),
        }
    }

    /// Merge per-node hits: sum scores per document, collect node hits,
    /// order by score descending with document id as the tie-break.
    fn aggregate(
        responses: Vec<SearchLocalResponse>,
        top_k: usize,
        partial: bool,
    ) -> SearchResponse {
        let mut merged: HashMap<DocId, (f64, Vec<NodeId>)> = HashMap::new();
        for response in responses {
            for hit in response.hits {
                let entry = merged.entry(hit.doc_id).or_insert_with(|| (0.0, Vec::new()));
                entry.0 += hit.score;
                if !entry.1.contains(&response.node_id) {
                    entry.1.push(response.node_id);
                }
            }
        }

        let mut results: Vec<SearchResult> = merged
            .into_iter()
            .map(|(doc_id, (score, mut node_hits))| {
                node_hits.sort();
                SearchResult {
                    doc_id,
                    score,
                    node_hits,
                }
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results.truncate(top_k);

        SearchResponse { results, partial }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(node: u64, hits: Vec<(&str, f64)>) -> SearchLocalResponse {
        SearchLocalResponse {
            node_id: NodeId::new(node),
            hits: hits
                .into_iter()
                .map(|(doc, score)| LocalHit {
                    doc_id: DocId::from(doc),
                    score,
                })
                .collect(),
        }
    }

    #[test]
    fn test_aggregate_sums_scores_across_nodes() {
        let merged = QueryExecutor::aggregate(
            vec![
                response(0, vec![("d1", 1.5), ("d2", 0.5)]),
                response(1, vec![("d1", 1.0)]),
            ],
            10,
            false,
        );

        assert_eq!(merged.results.len(), 2);
        assert_eq!(merged.results[0].doc_id, DocId::from("d1"));
        assert!((merged.results[0].score - 2.5).abs() < 1e-9);
        assert_eq!(
            merged.results[0].node_hits,
            vec![NodeId::new(0), NodeId::new(1)]
        );
    }

    #[test]
    fn test_aggregate_breaks_ties_by_doc_id() {
        let merged = QueryExecutor::aggregate(
            vec![response(0, vec![("zz", 1.0), ("aa", 1.0), ("mm", 1.0)])],
            10,
            false,
        );
        let ids: Vec<&str> = merged
            .results
            .iter()
            .map(|r| r.doc_id.as_str())
            .collect();
        assert_eq!(ids, vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn test_aggregate_truncates_to_top_k() {
        let merged = QueryExecutor::aggregate(
            vec![response(
                0,
                vec![("d1", 5.0), ("d2", 4.0), ("d3", 3.0), ("d4", 2.0)],
            )],
            2,
            false,
        );
        assert_eq!(merged.results.len(), 2);
        assert_eq!(merged.results[0].doc_id, DocId::from("d1"));
    }

    #[test]
    fn test_aggregate_deduplicates_node_hits() {
        let merged = QueryExecutor::aggregate(
            vec![
                response(0, vec![("d1", 1.0)]),
                response(0, vec![("d1", 1.0)]),
            ],
            10,
            false,
        );
        assert_eq!(merged.results[0].node_hits, vec![NodeId::new(0)]);
    }
}
