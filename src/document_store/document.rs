// Document Model
//
// Immutable document carried through replication and indexing. Identity is
// the document id; content and metadata never change after the first
// successful write (updates are modeled as delete + add).

use crate::types::DocId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Globally unique id; a content hash when the caller supplies none
    pub doc_id: DocId,

    /// UTF-8 body that gets tokenized and indexed
    pub content: String,

    /// Opaque caller metadata, stored and returned verbatim
    pub metadata: HashMap<String, String>,

    /// Creation timestamp at the primary
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(doc_id: DocId, content: String, metadata: HashMap<String, String>) -> Self {
        Self {
            doc_id,
            content,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Build a document whose id is the SHA-256 hash of its content.
    pub fn from_content(content: String, metadata: HashMap<String, String>) -> Self {
        let doc_id = DocId::new(Self::content_hash(&content));
        Self::new(doc_id, content, metadata)
    }

    /// Hex SHA-256 of a content string.
    pub fn content_hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}
