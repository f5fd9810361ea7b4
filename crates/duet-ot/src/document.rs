//! Document state and its committed operation log.

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// An operation after the sequencing authority assigned it a version.
///
/// `operation` holds the effective (transformed) operation; its
/// `authored_version` still records what the author saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedOperation {
    /// Version this operation produced.
    pub version: u64,
    /// The effective operation.
    pub operation: Operation,
    /// Unix timestamp in milliseconds when the authority committed it.
    pub committed_at: u64,
}

/// Point-in-time copy of a document, used to seed or reset replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    /// Full content.
    pub content: String,
    /// Version of the content.
    pub version: u64,
    /// Author of the last committed operation.
    pub last_modified_by: Option<String>,
    /// When the last operation was committed.
    pub last_modified_at: Option<u64>,
}

impl Default for DocumentSnapshot {
    fn default() -> Self {
        Self {
            content: String::new(),
            version: 0,
            last_modified_by: None,
            last_modified_at: None,
        }
    }
}

/// The canonical state of a shared document.
///
/// Only the transform engine mutates it; the version increases by exactly
/// one per committed operation.
#[derive(Debug, Clone, Default)]
pub struct DocumentState {
    content: String,
    version: u64,
    log: Vec<CommittedOperation>,
    last_modified_by: Option<String>,
    last_modified_at: Option<u64>,
}

impl DocumentState {
    /// Creates an empty document at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document with initial content at version 0.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Current content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Every committed operation in version order.
    pub fn log(&self) -> &[CommittedOperation] {
        &self.log
    }

    /// Committed operations with a version greater than `version`.
    pub fn since(&self, version: u64) -> &[CommittedOperation] {
        // Log entry i holds version i + 1.
        let start = (version as usize).min(self.log.len());
        &self.log[start..]
    }

    /// Author of the most recent commit.
    pub fn last_modified_by(&self) -> Option<&str> {
        self.last_modified_by.as_deref()
    }

    /// Takes a snapshot of the current content and version.
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            content: self.content.clone(),
            version: self.version,
            last_modified_by: self.last_modified_by.clone(),
            last_modified_at: self.last_modified_at,
        }
    }

    /// Applies an already transformed operation as the next version.
    pub(crate) fn commit(&mut self, operation: Operation, committed_at: u64) -> CommittedOperation {
        operation.apply_to(&mut self.content);
        self.version += 1;
        self.last_modified_by = Some(operation.author_id.clone());
        self.last_modified_at = Some(committed_at);

        let committed = CommittedOperation {
            version: self.version,
            operation,
            committed_at,
        };
        self.log.push(committed.clone());
        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_increments_version() {
        let mut doc = DocumentState::new();
        let c1 = doc.commit(Operation::insert("a", 0, 0, "hi"), 1);
        let c2 = doc.commit(Operation::insert("a", 1, 2, "!"), 2);

        assert_eq!(c1.version, 1);
        assert_eq!(c2.version, 2);
        assert_eq!(doc.version(), 2);
        assert_eq!(doc.content(), "hi!");
        assert_eq!(doc.log().len(), 2);
        assert_eq!(doc.last_modified_by(), Some("a"));
    }

    #[test]
    fn test_since_returns_unseen_suffix() {
        let mut doc = DocumentState::with_content("x");
        for i in 0..5 {
            doc.commit(Operation::insert("a", i, 0, "y"), i);
        }

        assert_eq!(doc.since(0).len(), 5);
        assert_eq!(doc.since(3).len(), 2);
        assert_eq!(doc.since(3)[0].version, 4);
        assert!(doc.since(5).is_empty());
        assert!(doc.since(42).is_empty());
    }

    #[test]
    fn test_snapshot() {
        let mut doc = DocumentState::with_content("fn main() {}");
        doc.commit(Operation::delete("bob", 0, 0, 3), 7);
        let snap = doc.snapshot();
        assert_eq!(snap.content, "main() {}");
        assert_eq!(snap.version, 1);
        assert_eq!(snap.last_modified_by.as_deref(), Some("bob"));
        assert_eq!(snap.last_modified_at, Some(7));
    }
}
