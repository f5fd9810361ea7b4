//! Participant-side document replica.

use std::collections::VecDeque;
use tracing::debug;

use crate::document::{CommittedOperation, DocumentSnapshot};
use crate::operation::Operation;
use crate::transform::transform_with_priority;
use crate::{OtError, Result};

/// A participant's local copy of the shared document.
///
/// Local edits apply immediately to the visible content. At most one edit is
/// in flight to the authority at a time; later edits wait in a buffer and
/// are released one by one as the authority commits the previous one.
/// Remote commits are applied to the confirmed content and every pending
/// edit is rebased past them.
#[derive(Debug, Clone)]
pub struct Replica {
    author_id: String,
    confirmed: String,
    version: u64,
    inflight: Option<Operation>,
    buffer: VecDeque<Operation>,
    visible: String,
}

impl Replica {
    /// Creates a replica from a snapshot.
    pub fn new(author_id: impl Into<String>, snapshot: &DocumentSnapshot) -> Self {
        Self {
            author_id: author_id.into(),
            confirmed: snapshot.content.clone(),
            version: snapshot.version,
            inflight: None,
            buffer: VecDeque::new(),
            visible: snapshot.content.clone(),
        }
    }

    /// Author this replica edits as.
    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    /// Content including pending local edits.
    pub fn content(&self) -> &str {
        &self.visible
    }

    /// Content as committed by the authority.
    pub fn confirmed_content(&self) -> &str {
        &self.confirmed
    }

    /// Last committed version applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns true if local edits are awaiting commit.
    pub fn has_pending(&self) -> bool {
        self.inflight.is_some() || !self.buffer.is_empty()
    }

    /// Number of local edits awaiting commit.
    pub fn pending_count(&self) -> usize {
        self.inflight.iter().count() + self.buffer.len()
    }

    /// Inserts text locally. Returns the operation to send, if any.
    pub fn insert(&mut self, position: usize, text: &str) -> Result<Option<Operation>> {
        let op = Operation::insert(self.author_id.clone(), self.version, position, text);
        self.local_edit(op)
    }

    /// Deletes text locally. Returns the operation to send, if any.
    pub fn delete(&mut self, position: usize, length: usize) -> Result<Option<Operation>> {
        let op = Operation::delete(self.author_id.clone(), self.version, position, length);
        self.local_edit(op)
    }

    /// Applies a locally authored edit optimistically.
    ///
    /// The edit's position is relative to the visible content. Returns the
    /// operation to send when nothing else is in flight; otherwise the edit
    /// is buffered and released by a later [`Replica::receive`].
    pub fn local_edit(&mut self, mut op: Operation) -> Result<Option<Operation>> {
        if op.author_id != self.author_id {
            return Err(OtError::InvalidOperation(format!(
                "replica of {} cannot author as {}",
                self.author_id, op.author_id
            )));
        }
        op.validate()?;

        op.apply_to(&mut self.visible);
        op.authored_version = self.version;

        if self.inflight.is_none() {
            self.inflight = Some(op.clone());
            Ok(Some(op))
        } else {
            self.buffer.push_back(op);
            Ok(None)
        }
    }

    /// Applies a committed operation received from the authority.
    ///
    /// Returns the next buffered edit to send when the commit acknowledges
    /// this replica's in-flight edit. Commits at or below the current
    /// version are ignored; a commit skipping a version fails with
    /// [`OtError::VersionGap`] and changes nothing.
    pub fn receive(&mut self, committed: &CommittedOperation) -> Result<Option<Operation>> {
        if committed.version <= self.version {
            return Ok(None);
        }
        if committed.version != self.version + 1 {
            return Err(OtError::VersionGap {
                expected: self.version + 1,
                received: committed.version,
            });
        }

        committed.operation.apply_to(&mut self.confirmed);
        self.version = committed.version;

        let own = self.inflight.is_some() && committed.operation.author_id == self.author_id;
        let next = if own {
            self.inflight = self.buffer.pop_front().map(|mut op| {
                op.authored_version = self.version;
                op
            });
            self.inflight.clone()
        } else {
            self.rebase(&committed.operation);
            None
        };

        self.recompute_visible();
        debug!(
            author_id = %self.author_id,
            version = self.version,
            own,
            pending = self.pending_count(),
            "Replica applied commit"
        );

        Ok(next)
    }

    fn rebase(&mut self, remote: &Operation) {
        let mut remote = remote.clone();
        let pending = self.inflight.iter_mut().chain(self.buffer.iter_mut());
        for op in pending {
            let rebased = transform_with_priority(op, &remote, true);
            remote = transform_with_priority(&remote, op, false);
            *op = rebased;
        }
    }

    fn recompute_visible(&mut self) {
        let mut visible = self.confirmed.clone();
        for op in self.inflight.iter().chain(self.buffer.iter()) {
            op.apply_to(&mut visible);
        }
        self.visible = visible;
    }

    /// Drops every pending local edit. Returns how many were dropped.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending_count();
        self.inflight = None;
        self.buffer.clear();
        self.visible = self.confirmed.clone();
        dropped
    }

    /// Replaces the replica state with a fresh snapshot, dropping pending edits.
    pub fn reset(&mut self, snapshot: &DocumentSnapshot) {
        self.confirmed = snapshot.content.clone();
        self.visible = snapshot.content.clone();
        self.version = snapshot.version;
        self.inflight = None;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SequencingAuthority;
    use proptest::prelude::*;

    fn committed(version: u64, operation: Operation) -> CommittedOperation {
        CommittedOperation {
            version,
            operation,
            committed_at: 0,
        }
    }

    #[test]
    fn test_local_edit_is_optimistic() {
        let mut replica = Replica::new("alice", &DocumentSnapshot::default());
        let sent = replica.insert(0, "hello").unwrap();
        assert!(sent.is_some());
        assert_eq!(replica.content(), "hello");
        assert_eq!(replica.confirmed_content(), "");

        // Second edit waits behind the first.
        assert!(replica.insert(5, "!").unwrap().is_none());
        assert_eq!(replica.content(), "hello!");
        assert_eq!(replica.pending_count(), 2);
    }

    #[test]
    fn test_ack_releases_next_buffered_edit() {
        let mut replica = Replica::new("alice", &DocumentSnapshot::default());
        let first = replica.insert(0, "ab").unwrap().unwrap();
        replica.insert(2, "c").unwrap();

        let next = replica.receive(&committed(1, first)).unwrap().unwrap();
        assert_eq!(next.authored_version, 1);
        assert_eq!(next.position, 2);
        assert_eq!(replica.confirmed_content(), "ab");
        assert_eq!(replica.content(), "abc");
    }

    #[test]
    fn test_remote_delete_rebases_pending_insert() {
        let snapshot = DocumentSnapshot {
            content: "0123456789".to_string(),
            version: 4,
            ..Default::default()
        };
        let mut replica = Replica::new("bob", &snapshot);
        replica.insert(6, "X").unwrap();

        replica
            .receive(&committed(5, Operation::delete("alice", 4, 2, 3)))
            .unwrap();

        assert_eq!(replica.confirmed_content(), "0156789");
        assert_eq!(replica.content(), "015X6789");
    }

    #[test]
    fn test_pending_insert_inside_remote_delete_survives() {
        let authority = SequencingAuthority::with_content("s1", "abcdef");
        let mut alice = Replica::new("alice", &authority.register_author("alice"));
        let mut bob = Replica::new("bob", &authority.register_author("bob"));

        let delete = alice.delete(1, 3).unwrap().unwrap();
        let insert = bob.insert(2, "XY").unwrap().unwrap();
        // Typed after the insert, so it rebases past the split delete.
        bob.insert(6, "!").unwrap();
        assert_eq!(bob.content(), "abXYcd!ef");

        let c1 = authority.commit(delete).unwrap();
        bob.receive(&c1).unwrap();
        assert_eq!(bob.content(), "aXY!ef");

        let c2 = authority.commit(insert).unwrap();
        let next = bob.receive(&c2).unwrap().unwrap();
        let c3 = authority.commit(next).unwrap();
        bob.receive(&c3).unwrap();
        for commit in [&c1, &c2, &c3] {
            alice.receive(commit).unwrap();
        }

        assert_eq!(authority.snapshot().content, "aXY!ef");
        assert_eq!(alice.content(), "aXY!ef");
        assert_eq!(bob.content(), "aXY!ef");
    }

    #[test]
    fn test_gap_is_rejected_without_change() {
        let mut replica = Replica::new("bob", &DocumentSnapshot::default());
        let err = replica
            .receive(&committed(2, Operation::insert("alice", 1, 0, "x")))
            .unwrap_err();
        assert_eq!(
            err,
            OtError::VersionGap {
                expected: 1,
                received: 2
            }
        );
        assert_eq!(replica.version(), 0);
        assert_eq!(replica.content(), "");
    }

    #[test]
    fn test_duplicate_commit_ignored() {
        let mut replica = Replica::new("bob", &DocumentSnapshot::default());
        let op = committed(1, Operation::insert("alice", 0, 0, "x"));
        replica.receive(&op).unwrap();
        replica.receive(&op).unwrap();
        assert_eq!(replica.content(), "x");
    }

    #[test]
    fn test_discard_pending_restores_confirmed() {
        let mut replica = Replica::new("bob", &DocumentSnapshot::default());
        replica.insert(0, "draft").unwrap();
        replica.insert(0, "more").unwrap();
        assert_eq!(replica.discard_pending(), 2);
        assert_eq!(replica.content(), "");
        assert!(!replica.has_pending());
    }

    #[test]
    fn test_cannot_author_as_someone_else() {
        let mut replica = Replica::new("bob", &DocumentSnapshot::default());
        let result = replica.local_edit(Operation::insert("alice", 0, 0, "x"));
        assert!(result.is_err());
    }

    #[test]
    fn test_two_replicas_same_position_converge() {
        let authority = SequencingAuthority::new("s1");
        let mut a = Replica::new("alice", &authority.register_author("alice"));
        let mut b = Replica::new("bob", &authority.register_author("bob"));

        let op_a = a.insert(0, "foo").unwrap().unwrap();
        let op_b = b.insert(0, "bar").unwrap().unwrap();

        let c1 = authority.commit(op_a).unwrap();
        let c2 = authority.commit(op_b).unwrap();

        for replica in [&mut a, &mut b] {
            replica.receive(&c1).unwrap();
            replica.receive(&c2).unwrap();
        }

        assert_eq!(a.content(), "foobar");
        assert_eq!(b.content(), "foobar");
        assert_eq!(authority.snapshot().content, "foobar");
    }

    #[derive(Debug, Clone)]
    enum Step {
        Edit { client: usize, pos: usize, insert: bool, text: String },
        Upload { client: usize },
        Download { client: usize },
    }

    fn step_strategy(clients: usize) -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..clients, 0usize..20, any::<bool>(), "[a-z]{1,3}").prop_map(
                |(client, pos, insert, text)| Step::Edit { client, pos, insert, text }
            ),
            (0..clients).prop_map(|client| Step::Upload { client }),
            (0..clients).prop_map(|client| Step::Download { client }),
        ]
    }

    enum Upstream {
        Op(Operation),
        Ack(u64),
    }

    struct Sim {
        authority: SequencingAuthority,
        replicas: Vec<Replica>,
        up: Vec<VecDeque<Upstream>>,
        down: Vec<VecDeque<CommittedOperation>>,
    }

    impl Sim {
        fn new(clients: usize, seed: &str) -> Self {
            let authority = SequencingAuthority::with_content("sim", seed);
            let replicas = (0..clients)
                .map(|i| {
                    let id = format!("user{i}");
                    let snapshot = authority.register_author(&id);
                    Replica::new(id, &snapshot)
                })
                .collect();
            Self {
                authority,
                replicas,
                up: (0..clients).map(|_| VecDeque::new()).collect(),
                down: (0..clients).map(|_| VecDeque::new()).collect(),
            }
        }

        fn run(&mut self, step: Step) {
            match step {
                Step::Edit { client, pos, insert, text } => {
                    let replica = &mut self.replicas[client];
                    let len = replica.content().chars().count();
                    let sent = if insert || len == 0 {
                        replica.insert(pos.min(len), &text).unwrap()
                    } else {
                        let pos = pos % len;
                        replica.delete(pos, 1 + (text.len() % (len - pos))).unwrap()
                    };
                    if let Some(op) = sent {
                        self.up[client].push_back(Upstream::Op(op));
                    }
                }
                Step::Upload { client } => match self.up[client].pop_front() {
                    Some(Upstream::Op(op)) => {
                        let committed = self.authority.commit(op).unwrap();
                        for queue in &mut self.down {
                            queue.push_back(committed.clone());
                        }
                    }
                    Some(Upstream::Ack(version)) => {
                        let author = self.replicas[client].author_id().to_string();
                        self.authority.acknowledge(&author, version).unwrap();
                    }
                    None => {}
                },
                Step::Download { client } => {
                    if let Some(committed) = self.down[client].pop_front() {
                        let replica = &mut self.replicas[client];
                        let next = replica.receive(&committed).unwrap();
                        self.up[client].push_back(Upstream::Ack(replica.version()));
                        if let Some(op) = next {
                            self.up[client].push_back(Upstream::Op(op));
                        }
                    }
                }
            }
        }

        fn quiesce(&mut self) {
            loop {
                let busy = self.up.iter().any(|q| !q.is_empty())
                    || self.down.iter().any(|q| !q.is_empty());
                if !busy {
                    break;
                }
                for client in 0..self.replicas.len() {
                    self.run(Step::Upload { client });
                    self.run(Step::Download { client });
                }
            }
        }
    }

    proptest! {
        /// Property: every replica converges to the canonical content once all
        /// messages are delivered, whatever the interleaving.
        #[test]
        fn prop_replicas_converge(
            seed in "[a-z]{0,8}",
            steps in prop::collection::vec(step_strategy(3), 1..60),
        ) {
            let mut sim = Sim::new(3, &seed);
            for step in steps {
                sim.run(step);
            }
            sim.quiesce();

            let canonical = sim.authority.snapshot();
            for replica in &sim.replicas {
                prop_assert!(!replica.has_pending());
                prop_assert_eq!(replica.version(), canonical.version);
                prop_assert_eq!(replica.content(), canonical.content.as_str());
            }
        }
    }
}
