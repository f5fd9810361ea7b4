//! The per-session sequencing authority.

use duet_types::now_millis;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::document::{CommittedOperation, DocumentSnapshot, DocumentState};
use crate::operation::Operation;
use crate::transform::transform;
use crate::{OtError, Result};

/// Capacity of the committed-operation broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Single writer of a session's canonical document.
///
/// Commits are serialized behind one lock, so versions are assigned strictly
/// one at a time. The broadcast is sent while the lock is held, which keeps
/// subscribers seeing commits in version order.
#[derive(Debug)]
pub struct SequencingAuthority {
    session_id: String,
    state: Mutex<AuthorityState>,
    committed_tx: broadcast::Sender<CommittedOperation>,
}

#[derive(Debug, Default)]
struct AuthorityState {
    document: DocumentState,
    /// Last version each author acknowledged.
    authors: HashMap<String, u64>,
}

impl SequencingAuthority {
    /// Creates an authority for an empty document.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_document(session_id, DocumentState::new())
    }

    /// Creates an authority seeded with initial content.
    pub fn with_content(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_document(session_id, DocumentState::with_content(content))
    }

    fn with_document(session_id: impl Into<String>, document: DocumentState) -> Self {
        let (committed_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            session_id: session_id.into(),
            state: Mutex::new(AuthorityState {
                document,
                authors: HashMap::new(),
            }),
            committed_tx,
        }
    }

    /// Session this authority sequences.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Allows `author_id` to commit and returns the snapshot it starts from.
    pub fn register_author(&self, author_id: &str) -> DocumentSnapshot {
        let mut state = self.state.lock();
        let version = state.document.version();
        state
            .authors
            .entry(author_id.to_string())
            .or_insert(version);
        debug!(session_id = %self.session_id, author_id = %author_id, version, "Author registered");
        state.document.snapshot()
    }

    /// Revokes commit rights. Returns false if the author was unknown.
    pub fn remove_author(&self, author_id: &str) -> bool {
        let removed = self.state.lock().authors.remove(author_id).is_some();
        if removed {
            debug!(session_id = %self.session_id, author_id = %author_id, "Author removed");
        }
        removed
    }

    /// Returns true if `author_id` may commit.
    pub fn is_author(&self, author_id: &str) -> bool {
        self.state.lock().authors.contains_key(author_id)
    }

    /// Records that `author_id` has applied everything up to `version`.
    pub fn acknowledge(&self, author_id: &str, version: u64) -> Result<()> {
        let mut state = self.state.lock();
        let current = state.document.version();
        if version > current {
            return Err(OtError::InvalidVersion {
                author_id: author_id.to_string(),
                authored: version,
                reason: format!("acknowledged version is ahead of authority version {current}"),
            });
        }

        let acked = state.authors.get_mut(author_id).ok_or_else(|| {
            OtError::UnauthorizedOperation {
                session_id: self.session_id.clone(),
                author_id: author_id.to_string(),
            }
        })?;
        *acked = (*acked).max(version);
        Ok(())
    }

    /// Lowest version acknowledged by any current author.
    pub fn min_acknowledged_version(&self) -> Option<u64> {
        self.state.lock().authors.values().copied().min()
    }

    /// Commits one operation, transforming it past everything its author had
    /// not yet seen.
    pub fn commit(&self, operation: Operation) -> Result<CommittedOperation> {
        operation.validate()?;
        let mut state = self.state.lock();
        self.commit_locked(&mut state, operation)
    }

    /// Commits a batch of concurrently received operations.
    ///
    /// The batch is ordered by authored version, then author id, then
    /// timestamp before committing, so the result does not depend on the
    /// order the operations arrived in. Results are returned in commit order.
    pub fn commit_batch(&self, mut operations: Vec<Operation>) -> Vec<Result<CommittedOperation>> {
        operations.sort_by(|a, b| {
            a.authored_version
                .cmp(&b.authored_version)
                .then_with(|| a.author_id.cmp(&b.author_id))
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        let mut state = self.state.lock();
        operations
            .into_iter()
            .map(|op| {
                op.validate()?;
                self.commit_locked(&mut state, op)
            })
            .collect()
    }

    fn commit_locked(
        &self,
        state: &mut AuthorityState,
        operation: Operation,
    ) -> Result<CommittedOperation> {
        let acked = *state.authors.get(&operation.author_id).ok_or_else(|| {
            OtError::UnauthorizedOperation {
                session_id: self.session_id.clone(),
                author_id: operation.author_id.clone(),
            }
        })?;

        let current = state.document.version();
        if operation.authored_version > current {
            return Err(OtError::InvalidVersion {
                author_id: operation.author_id.clone(),
                authored: operation.authored_version,
                reason: format!("ahead of authority version {current}"),
            });
        }
        if operation.authored_version < acked {
            return Err(OtError::InvalidVersion {
                author_id: operation.author_id.clone(),
                authored: operation.authored_version,
                reason: format!("older than acknowledged version {acked}"),
            });
        }

        let authored = operation.authored_version;
        let effective = state
            .document
            .since(authored)
            .iter()
            .fold(operation, |op, committed| {
                transform(&op, &committed.operation)
            });

        let committed = state.document.commit(effective, now_millis());
        if let Some(acked) = state.authors.get_mut(&committed.operation.author_id) {
            *acked = (*acked).max(authored);
        }

        // No receivers is fine.
        let _ = self.committed_tx.send(committed.clone());

        debug!(
            session_id = %self.session_id,
            author_id = %committed.operation.author_id,
            version = committed.version,
            rebased_over = current - authored,
            "Operation committed"
        );

        Ok(committed)
    }

    /// Committed operations newer than `version`, for catch-up after a gap.
    pub fn operations_since(&self, version: u64) -> Vec<CommittedOperation> {
        self.state.lock().document.since(version).to_vec()
    }

    /// Snapshot of the canonical document.
    pub fn snapshot(&self) -> DocumentSnapshot {
        self.state.lock().document.snapshot()
    }

    /// Current canonical version.
    pub fn version(&self) -> u64 {
        self.state.lock().document.version()
    }

    /// Number of registered authors.
    pub fn author_count(&self) -> usize {
        self.state.lock().authors.len()
    }

    /// Subscribes to committed operations in version order.
    pub fn subscribe(&self) -> broadcast::Receiver<CommittedOperation> {
        self.committed_tx.subscribe()
    }

    /// Revokes every author; later commits are rejected.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.authors.clear();
        info!(
            session_id = %self.session_id,
            version = state.document.version(),
            "Sequencing authority closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn authority_with(authors: &[&str]) -> SequencingAuthority {
        let authority = SequencingAuthority::new("s1");
        for author in authors {
            authority.register_author(author);
        }
        authority
    }

    #[test]
    fn test_first_commit_unchanged_second_transformed() {
        let authority = authority_with(&["alice", "bob"]);

        let a = authority
            .commit(Operation::insert("alice", 0, 0, "foo"))
            .unwrap();
        assert_eq!(a.version, 1);
        assert_eq!(a.operation.position, 0);

        let b = authority
            .commit(Operation::insert("bob", 0, 0, "bar"))
            .unwrap();
        assert_eq!(b.version, 2);
        assert_eq!(b.operation.position, 3);
        assert_eq!(authority.snapshot().content, "foobar");
    }

    #[test]
    fn test_batch_order_ignores_arrival_order() {
        let forward = authority_with(&["alice", "bob"]);
        let reverse = authority_with(&["alice", "bob"]);

        let a = Operation::insert("alice", 0, 0, "foo").with_timestamp(2);
        let b = Operation::insert("bob", 0, 0, "bar").with_timestamp(1);

        forward.commit_batch(vec![a.clone(), b.clone()]);
        reverse.commit_batch(vec![b, a]);

        assert_eq!(forward.snapshot().content, "foobar");
        assert_eq!(reverse.snapshot().content, "foobar");
    }

    #[test]
    fn test_stale_operation_is_rebased_not_rejected() {
        let authority = SequencingAuthority::with_content("s1", "0123456789");
        authority.register_author("a");
        authority.register_author("b");

        for v in 0..4 {
            authority
                .commit(Operation::retain("a", v, 0, 1))
                .unwrap();
        }
        // Version 5 deletes [2,5).
        authority.commit(Operation::delete("a", 4, 2, 3)).unwrap();

        let late = authority
            .commit(Operation::insert("b", 4, 6, "X"))
            .unwrap();
        assert_eq!(late.operation.position, 3);
        assert_eq!(late.version, 6);
        assert_eq!(authority.snapshot().content, "015X6789");
    }

    #[test]
    fn test_insert_inside_committed_delete_survives() {
        let authority = SequencingAuthority::with_content("s1", "abcdef");
        authority.register_author("alice");
        authority.register_author("bob");

        authority.commit(Operation::delete("alice", 0, 1, 3)).unwrap();
        let insert = authority
            .commit(Operation::insert("bob", 0, 2, "XY"))
            .unwrap();
        assert_eq!(insert.operation.position, 1);
        assert_eq!(authority.snapshot().content, "aXYef");
    }

    #[test]
    fn test_delete_around_committed_insert_keeps_it() {
        let authority = SequencingAuthority::with_content("s1", "abcdef");
        authority.register_author("alice");
        authority.register_author("bob");

        authority.commit(Operation::insert("bob", 0, 2, "XY")).unwrap();
        let delete = authority
            .commit(Operation::delete("alice", 0, 1, 3))
            .unwrap();
        assert_eq!(delete.operation.deleted_len(), 3);
        assert_eq!(delete.operation.kept.len(), 1);
        assert_eq!(authority.snapshot().content, "aXYef");
    }

    #[test]
    fn test_unknown_author_rejected() {
        let authority = authority_with(&["alice"]);
        let err = authority
            .commit(Operation::insert("mallory", 0, 0, "x"))
            .unwrap_err();
        assert!(matches!(err, OtError::UnauthorizedOperation { .. }));
        assert_eq!(authority.version(), 0);
    }

    #[test]
    fn test_removed_author_rejected() {
        let authority = authority_with(&["alice"]);
        assert!(authority.remove_author("alice"));
        assert!(!authority.remove_author("alice"));
        assert!(authority
            .commit(Operation::insert("alice", 0, 0, "x"))
            .is_err());
    }

    #[test]
    fn test_future_version_rejected() {
        let authority = authority_with(&["alice"]);
        let err = authority
            .commit(Operation::insert("alice", 3, 0, "x"))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_version");
    }

    #[test]
    fn test_version_below_acknowledged_rejected() {
        let authority = authority_with(&["alice", "bob"]);
        authority.commit(Operation::insert("bob", 0, 0, "a")).unwrap();
        authority.commit(Operation::insert("bob", 1, 1, "b")).unwrap();
        authority.acknowledge("alice", 2).unwrap();

        let err = authority
            .commit(Operation::insert("alice", 1, 0, "x"))
            .unwrap_err();
        assert!(matches!(err, OtError::InvalidVersion { authored: 1, .. }));
        assert!(authority.acknowledge("alice", 9).is_err());
    }

    #[test]
    fn test_out_of_range_insert_clamps() {
        let authority = SequencingAuthority::with_content("s1", "abc");
        authority.register_author("a");
        authority.commit(Operation::insert("a", 0, 500, "!")).unwrap();
        authority.commit(Operation::delete("a", 1, 2, 500)).unwrap();
        assert_eq!(authority.snapshot().content, "ab");
    }

    #[test]
    fn test_close_revokes_everyone() {
        let authority = authority_with(&["alice", "bob"]);
        authority.close();
        assert_eq!(authority.author_count(), 0);
        assert!(authority
            .commit(Operation::insert("bob", 0, 0, "x"))
            .is_err());
    }

    #[tokio::test]
    async fn test_subscribers_receive_commits_in_order() {
        let authority = authority_with(&["alice"]);
        let mut rx = authority.subscribe();

        for v in 0..3 {
            authority
                .commit(Operation::insert("alice", v, 0, "x"))
                .unwrap();
        }

        for expected in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().version, expected);
        }
    }

    #[test]
    fn test_concurrent_commits_assign_unique_versions() {
        let authority = Arc::new(SequencingAuthority::new("s1"));
        let authors: Vec<String> = (0..8).map(|i| format!("user{i}")).collect();
        for author in &authors {
            authority.register_author(author);
        }

        let handles: Vec<_> = authors
            .iter()
            .cloned()
            .map(|author| {
                let authority = Arc::clone(&authority);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            authority
                                .commit(Operation::insert(author.as_str(), 0, 0, "x"))
                                .unwrap()
                                .version
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut versions: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        versions.sort_unstable();

        assert_eq!(versions, (1..=400).collect::<Vec<_>>());
        assert_eq!(authority.snapshot().content.len(), 400);
    }

    proptest! {
        /// Property: replaying the committed log reproduces the canonical content.
        #[test]
        fn prop_log_replay_matches_canonical(
            seed in "[a-z]{0,10}",
            edits in prop::collection::vec((0usize..3, 0usize..15, 0usize..4, "[a-z]{1,3}"), 1..30)
        ) {
            let authority = SequencingAuthority::with_content("s", seed.clone());
            let authors = ["a", "b", "c"];
            for author in authors {
                authority.register_author(author);
            }

            for (who, pos, kind, text) in edits {
                let version = authority.version();
                // Author against an arbitrary earlier version.
                let authored = version.saturating_sub((pos % 3) as u64);
                let author = authors[who];
                let op = match kind {
                    0 | 1 => Operation::insert(author, authored, pos, text),
                    2 => Operation::delete(author, authored, pos, 1 + pos % 3),
                    _ => Operation::retain(author, authored, pos, 1),
                };
                // Rejections for acknowledged-version violations are fine here.
                let _ = authority.commit(op);
            }

            let mut replay = seed;
            for committed in authority.operations_since(0) {
                committed.operation.apply_to(&mut replay);
            }
            prop_assert_eq!(replay, authority.snapshot().content);
        }
    }
}
