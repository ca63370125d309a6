// Local Inverted Index
//
// Node-local term index with TF-IDF ranking:
// - Postings: term -> ordered set of document ids
// - Reverse map: document id -> term frequencies, so removal is
//   proportional to the document's own term count
// - OR and AND search over postings
// - TF-IDF scoring with node-local corpus statistics
//
// Readers never block each other; the interior lock is only held for the
// duration of a map operation, never across I/O.

pub mod stopwords;
pub mod tokenizer;

pub use tokenizer::Tokenizer;

use crate::types::DocId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default)]
struct IndexInner {
    /// term -> document ids holding it
    postings: HashMap<String, BTreeSet<DocId>>,

    /// document id -> term -> raw frequency
    doc_terms: HashMap<DocId, HashMap<String, u32>>,
}

/// Node-local inverted index.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    inner: RwLock<IndexInner>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document under the given terms (duplicates carry frequency).
    /// Re-adding a document replaces its previous postings.
    pub fn add(&self, doc_id: &DocId, terms: &[String]) {
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *freqs.entry(term.clone()).or_insert(0) += 1;
        }

        let mut inner = self.inner.write();
        if inner.doc_terms.contains_key(doc_id) {
            Self::remove_locked(&mut inner, doc_id);
        }
        for term in freqs.keys() {
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .insert(doc_id.clone());
        }
        inner.doc_terms.insert(doc_id.clone(), freqs);
    }

    /// Remove a document from every posting list it appears in.
    pub fn remove(&self, doc_id: &DocId) {
        let mut inner = self.inner.write();
        Self::remove_locked(&mut inner, doc_id);
    }

    fn remove_locked(inner: &mut IndexInner, doc_id: &DocId) {
        if let Some(freqs) = inner.doc_terms.remove(doc_id) {
            for term in freqs.keys() {
                let emptied = match inner.postings.get_mut(term) {
                    Some(postings) => {
                        postings.remove(doc_id);
                        postings.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    inner.postings.remove(term);
                }
            }
        }
    }

    /// Union of the posting sets (OR semantics).
    pub fn search(&self, terms: &[String]) -> BTreeSet<DocId> {
        let inner = self.inner.read();
        let mut out = BTreeSet::new();
        for term in terms {
            if let Some(postings) = inner.postings.get(term) {
                out.extend(postings.iter().cloned());
            }
        }
        out
    }

    /// Intersection of the posting sets (AND semantics); empty input yields
    /// an empty result.
    pub fn search_all(&self, terms: &[String]) -> BTreeSet<DocId> {
        let inner = self.inner.read();
        let mut result: Option<BTreeSet<DocId>> = None;
        for term in terms {
            let postings = match inner.postings.get(term) {
                Some(p) => p,
                None => return BTreeSet::new(),
            };
            result = Some(match result {
                None => postings.clone(),
                Some(acc) => acc.intersection(postings).cloned().collect(),
            });
            if result.as_ref().is_some_and(|r| r.is_empty()) {
                return BTreeSet::new();
            }
        }
        result.unwrap_or_default()
    }

    /// TF-IDF scores for the candidates against this node's corpus.
    ///
    /// TF is the raw term frequency; IDF is `ln(n / df)` over this node's
    /// local statistics, so a term present in every local document
    /// contributes nothing and such candidates tie at zero. Candidates
    /// missing any of the query terms are skipped, which keeps AND
    /// semantics even if the caller passed a wider set. Output is
    /// descending by score; ties break on ascending document id.
    pub fn rank(&self, candidates: &BTreeSet<DocId>, terms: &[String]) -> Vec<(DocId, f64)> {
        let inner = self.inner.read();
        let n_docs = inner.doc_terms.len() as f64;
        if n_docs == 0.0 {
            return Vec::new();
        }

        let idf: HashMap<&String, f64> = terms
            .iter()
            .filter_map(|term| {
                inner
                    .postings
                    .get(term)
                    .map(|p| (term, (n_docs / p.len() as f64).ln()))
            })
            .collect();

        let mut scored: Vec<(DocId, f64)> = candidates
            .iter()
            .filter_map(|doc_id| {
                let freqs = inner.doc_terms.get(doc_id)?;
                let mut score = 0.0;
                for term in terms {
                    let tf = *freqs.get(term)? as f64;
                    score += tf * idf.get(term)?;
                }
                Some((doc_id.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }

    /// AND-search followed by ranking, the local half of a query.
    pub fn search_ranked(&self, terms: &[String], top_k: usize) -> Vec<(DocId, f64)> {
        let candidates = self.search_all(terms);
        let mut ranked = self.rank(&candidates, terms);
        ranked.truncate(top_k);
        ranked
    }

    pub fn contains_doc(&self, doc_id: &DocId) -> bool {
        self.inner.read().doc_terms.contains_key(doc_id)
    }

    pub fn doc_count(&self) -> usize {
        self.inner.read().doc_terms.len()
    }

    pub fn term_count(&self) -> usize {
        self.inner.read().postings.len()
    }

    /// Distinct terms of an indexed document.
    pub fn terms_of(&self, doc_id: &DocId) -> Vec<String> {
        self.inner
            .read()
            .doc_terms
            .get(doc_id)
            .map(|freqs| freqs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Stable view of the postings for snapshotting.
    pub fn postings_snapshot(&self) -> BTreeMap<String, Vec<DocId>> {
        let inner = self.inner.read();
        inner
            .postings
            .iter()
            .map(|(term, docs)| (term.clone(), docs.iter().cloned().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_add_and_search_union() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("d1"), &terms(&["raft", "consensus"]));
        index.add(&DocId::from("d2"), &terms(&["raft", "election"]));

        let hits = index.search(&terms(&["consensus", "election"]));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_search_all_intersection() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("d1"), &terms(&["raft", "consensus"]));
        index.add(&DocId::from("d2"), &terms(&["raft", "election"]));

        let hits = index.search_all(&terms(&["raft", "consensus"]));
        assert_eq!(hits.len(), 1);
        assert!(hits.contains(&DocId::from("d1")));

        let miss = index.search_all(&terms(&["raft", "absent"]));
        assert!(miss.is_empty());
    }

    #[test]
    fn test_remove_drops_all_postings() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("d1"), &terms(&["raft", "consensus"]));
        index.remove(&DocId::from("d1"));

        assert!(!index.contains_doc(&DocId::from("d1")));
        assert!(index.search(&terms(&["raft"])).is_empty());
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn test_readd_replaces_postings() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("d1"), &terms(&["old", "terms"]));
        index.add(&DocId::from("d1"), &terms(&["new"]));

        assert!(index.search(&terms(&["old"])).is_empty());
        assert_eq!(index.search(&terms(&["new"])).len(), 1);
    }

    #[test]
    fn test_rank_orders_by_frequency() {
        let index = InvertedIndex::new();
        // d1 mentions the term five times, d2 and d3 once; d4 keeps the
        // document frequency below the corpus size so IDF is positive.
        index.add(
            &DocId::from("d1"),
            &terms(&["distributed"; 5]),
        );
        index.add(&DocId::from("d2"), &terms(&["distributed", "engine"]));
        index.add(&DocId::from("d3"), &terms(&["distributed", "system"]));
        index.add(&DocId::from("d4"), &terms(&["storage", "engine"]));

        let query = terms(&["distributed"]);
        let candidates = index.search_all(&query);
        let ranked = index.rank(&candidates, &query);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, DocId::from("d1"));
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn test_rank_ties_break_lexicographically() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("zeta"), &terms(&["shard"]));
        index.add(&DocId::from("alpha"), &terms(&["shard"]));
        index.add(&DocId::from("mid"), &terms(&["shard"]));

        let query = terms(&["shard"]);
        let ranked = index.rank(&index.search_all(&query), &query);

        let ids: Vec<&str> = ranked.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_rank_score_positive_for_discriminating_term() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("match"), &terms(&["raft", "consensus"]));
        index.add(&DocId::from("other"), &terms(&["storage", "engine"]));

        let query = terms(&["consensus"]);
        let ranked = index.rank(&index.search_all(&query), &query);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].1 > 0.0);
    }

    #[test]
    fn test_rank_term_in_every_doc_scores_zero() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("d1"), &terms(&["cluster", "alpha"]));
        index.add(&DocId::from("d2"), &terms(&["cluster", "beta"]));

        // df equals the corpus size, so ln(n/df) contributes nothing and
        // the candidates tie at zero in document id order.
        let query = terms(&["cluster"]);
        let ranked = index.rank(&index.search_all(&query), &query);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].1, 0.0);
        assert_eq!(ranked[1].1, 0.0);
        assert_eq!(ranked[0].0, DocId::from("d1"));
    }

    #[test]
    fn test_rank_skips_docs_missing_a_term() {
        let index = InvertedIndex::new();
        index.add(&DocId::from("full"), &terms(&["raft", "log"]));
        index.add(&DocId::from("half"), &terms(&["raft"]));

        let query = terms(&["raft", "log"]);
        let mut wide = BTreeSet::new();
        wide.insert(DocId::from("full"));
        wide.insert(DocId::from("half"));

        let ranked = index.rank(&wide, &query);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, DocId::from("full"));
    }

    #[test]
    fn test_search_ranked_truncates() {
        let index = InvertedIndex::new();
        for i in 0..10 {
            index.add(&DocId::from(format!("d{i:02}")), &terms(&["common"]));
        }
        let hits = index.search_ranked(&terms(&["common"]), 3);
        assert_eq!(hits.len(), 3);
    }
}
