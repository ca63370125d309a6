// Raft Log Management
//
// Append-only replicated log. Entries carry the term they were created in,
// a contiguous index, and an opaque state-machine command. Conflicting
// suffixes are truncated when a leader overwrites them; the committed
// prefix is never rewritten.

use crate::error::{Result, SearchError};
use crate::types::{LogIndex, Term};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::SystemTime;

/// Log entry in the Raft log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term when entry was received by leader
    pub term: Term,

    /// Index of this entry in the log
    pub index: LogIndex,

    /// Serialized state-machine command
    pub command: Vec<u8>,

    /// Timestamp when entry was created
    pub timestamp: SystemTime,
}

impl LogEntry {
    pub fn new(term: Term, index: LogIndex, command: Vec<u8>) -> Self {
        Self {
            term,
            index,
            command,
            timestamp: SystemTime::now(),
        }
    }
}

/// Raft log structure; index 0 is reserved for "before the log".
#[derive(Debug, Default)]
pub struct RaftLog {
    entries: VecDeque<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries; indices must be contiguous
    /// and start at 1.
    pub fn from_entries(entries: Vec<LogEntry>) -> Result<Self> {
        let mut log = Self::new();
        for entry in entries {
            log.append(entry)?;
        }
        Ok(log)
    }

    /// Index of the last log entry, 0 when empty.
    pub fn last_index(&self) -> LogIndex {
        self.entries.back().map(|e| e.index).unwrap_or(0)
    }

    /// Term of the last log entry, 0 when empty.
    pub fn last_term(&self) -> Term {
        self.entries.back().map(|e| e.term).unwrap_or(0)
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 || index > self.last_index() {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// Term of the entry at `index`; index 0 maps to term 0.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.get(index).map(|entry| entry.term)
    }

    /// Append a new entry; its index must directly follow the current tail.
    pub fn append(&mut self, entry: LogEntry) -> Result<()> {
        if entry.index != self.last_index() + 1 {
            return Err(SearchError::InvalidState(format!(
                "log entry index mismatch: expected {}, got {}",
                self.last_index() + 1,
                entry.index
            )));
        }
        self.entries.push_back(entry);
        Ok(())
    }

    pub fn append_entries(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        for entry in entries {
            self.append(entry)?;
        }
        Ok(())
    }

    /// Drop every entry at `index` and above (log conflict resolution).
    pub fn truncate_from(&mut self, index: LogIndex) {
        if index == 0 {
            self.entries.clear();
        } else {
            self.entries.truncate((index - 1) as usize);
        }
    }

    /// Entries in the inclusive range [from, to].
    pub fn get_range(&self, from: LogIndex, to: LogIndex) -> Vec<LogEntry> {
        if from == 0 || from > to {
            return Vec::new();
        }
        let to = to.min(self.last_index());
        if from > to {
            return Vec::new();
        }
        self.entries
            .iter()
            .skip((from - 1) as usize)
            .take((to - from + 1) as usize)
            .cloned()
            .collect()
    }

    /// Every entry from `from` to the tail.
    pub fn entries_from(&self, from: LogIndex) -> Vec<LogEntry> {
        self.get_range(from, self.last_index())
    }

    /// Full clone of the log for persistence.
    pub fn all_entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = RaftLog::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.term_at(0), Some(0));
        assert!(log.is_empty());
    }

    #[test]
    fn test_append_entries() {
        let mut log = RaftLog::new();
        log.append(LogEntry::new(1, 1, vec![1])).unwrap();
        log.append(LogEntry::new(1, 2, vec![2])).unwrap();

        assert_eq!(log.last_index(), 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).unwrap().command, vec![1]);
    }

    #[test]
    fn test_append_with_gap_fails() {
        let mut log = RaftLog::new();
        assert!(log.append(LogEntry::new(1, 5, vec![])).is_err());
    }

    #[test]
    fn test_truncate_from() {
        let mut log = RaftLog::new();
        log.append(LogEntry::new(1, 1, vec![1])).unwrap();
        log.append(LogEntry::new(1, 2, vec![2])).unwrap();
        log.append(LogEntry::new(2, 3, vec![3])).unwrap();

        log.truncate_from(2);
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_get_range_inclusive() {
        let mut log = RaftLog::new();
        for i in 1..=5 {
            log.append(LogEntry::new(1, i, vec![i as u8])).unwrap();
        }

        let range = log.get_range(2, 4);
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].index, 2);
        assert_eq!(range[2].index, 4);

        assert!(log.get_range(3, 2).is_empty());
        assert_eq!(log.get_range(4, 99).len(), 2);
    }

    #[test]
    fn test_from_entries_round_trip() {
        let mut log = RaftLog::new();
        log.append(LogEntry::new(1, 1, vec![1])).unwrap();
        log.append(LogEntry::new(2, 2, vec![2])).unwrap();

        let rebuilt = RaftLog::from_entries(log.all_entries()).unwrap();
        assert_eq!(rebuilt.last_index(), 2);
        assert_eq!(rebuilt.last_term(), 2);
    }

    #[test]
    fn test_from_entries_rejects_gaps() {
        let entries = vec![LogEntry::new(1, 2, vec![])];
        assert!(RaftLog::from_entries(entries).is_err());
    }
}
