// Snapshot Persistence
//
// Optional JSON snapshots of a node's state, one directory per node:
// - documents.json: every stored document
// - index.json: term -> document ids
// - raft.json: persistent Raft state (term, vote, log)
//
// Writes go to a temp file in the same directory and rename into place, so
// readers never observe a torn file. Load tolerates missing files; the
// documents are authoritative and the index is rebuilt from them on boot.

use crate::consensus::{HardState, HardStateStore};
use crate::document_store::Document;
use crate::error::Result;
use crate::types::DocId;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const DOCUMENTS_FILE: &str = "documents.json";
const INDEX_FILE: &str = "index.json";
const RAFT_FILE: &str = "raft.json";

#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_documents(&self, documents: &[Document]) -> Result<()> {
        let json = serde_json::to_vec_pretty(documents)?;
        self.write_atomic(DOCUMENTS_FILE, &json)
    }

    /// Stored documents, or empty when no snapshot exists yet.
    pub fn load_documents(&self) -> Result<Vec<Document>> {
        let path = self.dir.join(DOCUMENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn write_index(&self, postings: &BTreeMap<String, Vec<DocId>>) -> Result<()> {
        let json = serde_json::to_vec_pretty(postings)?;
        self.write_atomic(INDEX_FILE, &json)
    }

    pub fn load_index(&self) -> Result<Option<BTreeMap<String, Vec<DocId>>>> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let path = self.dir.join(name);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl HardStateStore for SnapshotStore {
    fn persist(&self, hard: &HardState) -> Result<()> {
        let json = serde_json::to_vec_pretty(hard)?;
        self.write_atomic(RAFT_FILE, &json)
    }

    fn load(&self) -> Result<Option<HardState>> {
        let path = self.dir.join(RAFT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::LogEntry;
    use crate::types::NodeId;
    use std::collections::HashMap;

    #[test]
    fn test_documents_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf()).unwrap();

        let docs = vec![
            Document::new(DocId::from("a"), "raft".to_string(), HashMap::new()),
            Document::new(DocId::from("b"), "search".to_string(), HashMap::new()),
        ];
        store.write_documents(&docs).unwrap();
        let loaded = store.load_documents().unwrap();
        assert_eq!(loaded, docs);
    }

    #[test]
    fn test_missing_files_load_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf()).unwrap();

        assert!(store.load_documents().unwrap().is_empty());
        assert!(store.load_index().unwrap().is_none());
        assert!(HardStateStore::load(&store).unwrap().is_none());
    }

    #[test]
    fn test_index_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf()).unwrap();

        let mut postings = BTreeMap::new();
        postings.insert(
            "raft".to_string(),
            vec![DocId::from("a"), DocId::from("b")],
        );
        store.write_index(&postings).unwrap();
        assert_eq!(store.load_index().unwrap().unwrap(), postings);
    }

    #[test]
    fn test_raft_hard_state_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf()).unwrap();

        let hard = HardState {
            current_term: 7,
            voted_for: Some(NodeId::new(2)),
            entries: vec![LogEntry::new(3, 1, vec![1, 2, 3])],
        };
        store.persist(&hard).unwrap();
        let loaded = HardStateStore::load(&store).unwrap().unwrap();
        assert_eq!(loaded.current_term, 7);
        assert_eq!(loaded.voted_for, Some(NodeId::new(2)));
        assert_eq!(loaded.entries, hard.entries);
    }

    #[test]
    fn test_rewrite_replaces_previous_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf()).unwrap();

        store
            .write_documents(&[Document::new(
                DocId::from("a"),
                "one".to_string(),
                HashMap::new(),
            )])
            .unwrap();
        store.write_documents(&[]).unwrap();
        assert!(store.load_documents().unwrap().is_empty());
    }
}
