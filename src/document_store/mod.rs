// Document Store
//
// Authoritative local copy of the documents this node replicates. Keyed by
// document id; concurrent reads are lock-free, writes serialize per key
// through the map's shard locks.

pub mod document;

pub use document::Document;

use crate::types::DocId;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: DashMap<DocId, Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub fn put(&self, doc: Document) {
        self.documents.insert(doc.doc_id.clone(), doc);
    }

    pub fn get(&self, doc_id: &DocId) -> Option<Document> {
        self.documents.get(doc_id).map(|entry| entry.clone())
    }

    /// Remove a document; returns it when it was present.
    pub fn delete(&self, doc_id: &DocId) -> Option<Document> {
        self.documents.remove(doc_id).map(|(_, doc)| doc)
    }

    pub fn exists(&self, doc_id: &DocId) -> bool {
        self.documents.contains_key(doc_id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Stable snapshot of every stored document, ordered by id.
    pub fn snapshot(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        docs
    }
}
