//! Positional transform of concurrent operations.
//!
//! Rules for `op` transformed against `other`:
//!
//! - `other` is a RETAIN: nothing changes.
//! - `other` is an INSERT of `n` characters at `q`: anything positioned after
//!   `q` shifts forward by `n`. At `q` itself an insert shifts only when
//!   `other` is ordered first; a delete or retain starting at `q` always
//!   shifts. A delete whose span strictly contains `q` keeps the inserted
//!   text as a kept range; a retain grows by `n`.
//! - `other` is a DELETE: positions inside a removed range collapse to its
//!   start, positions after it shift back. A delete loses whatever part
//!   `other` already removed. An insert strictly inside a removed range
//!   keeps its text and lands where the range was.
//!
//! The pair `(transform(a, b), transform(b, a))` with opposite priorities
//! always satisfies `apply(apply(s, a), b') == apply(apply(s, b), a')`.

use std::cmp::Ordering;
use std::iter;
use std::ops::Range;

use crate::operation::{KeptRange, Operation, OperationKind};

/// Transforms an incoming operation against one already committed.
///
/// The committed operation precedes the incoming one in commit order, so it
/// wins ties at the same position.
pub fn transform(incoming: &Operation, committed: &Operation) -> Operation {
    transform_with_priority(incoming, committed, true)
}

/// Transforms two concurrent, uncommitted operations against each other.
///
/// Ties are broken by author id, then by authoring timestamp. Returns
/// `(a', b')` where `a'` applies after `b` and `b'` applies after `a`.
pub fn transform_concurrent(a: &Operation, b: &Operation) -> (Operation, Operation) {
    let a_first = precedes(a, b);
    (
        transform_with_priority(a, b, !a_first),
        transform_with_priority(b, a, a_first),
    )
}

/// Deterministic order of two concurrent operations.
fn precedes(a: &Operation, b: &Operation) -> bool {
    match a.author_id.cmp(&b.author_id) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => a.timestamp <= b.timestamp,
    }
}

/// Transforms `op` so it applies after `other`.
///
/// `other_first` decides which insert goes first when both insert at the
/// same position.
pub fn transform_with_priority(op: &Operation, other: &Operation, other_first: bool) -> Operation {
    match other.kind {
        OperationKind::Retain => op.clone(),
        OperationKind::Insert => past_insert(op, other, other_first),
        OperationKind::Delete => past_delete(op, other),
    }
}

fn past_insert(op: &Operation, insert: &Operation, insert_first: bool) -> Operation {
    let shift = insert.inserted_len();
    if shift == 0 {
        return op.clone();
    }

    let q = insert.position;
    let p = op.position;
    let len = op.length.unwrap_or(0);

    match op.kind {
        OperationKind::Insert => {
            if q < p || (q == p && insert_first) {
                op.at_position(p + shift)
            } else {
                op.clone()
            }
        }
        OperationKind::Delete => {
            if q <= p {
                op.at_position(p + shift)
            } else if q < p + len {
                let mut mask = delete_mask(op);
                let at = q - p;
                mask.splice(at..at, iter::repeat(false).take(shift));
                from_mask(op, p, &mask)
            } else {
                op.clone()
            }
        }
        OperationKind::Retain => {
            if q <= p {
                op.at_position(p + shift)
            } else if q < p + len {
                let mut grown = op.clone();
                grown.length = Some(len + shift);
                grown
            } else {
                op.clone()
            }
        }
    }
}

fn past_delete(op: &Operation, delete: &Operation) -> Operation {
    let removed = delete.removed_ranges();
    if removed.is_empty() {
        return op.clone();
    }
    let map = |x: usize| x - removed_before(&removed, x);

    match op.kind {
        OperationKind::Insert => op.at_position(map(op.position)),
        OperationKind::Delete => {
            let p = op.position;
            let mask: Vec<bool> = delete_mask(op)
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !removed.iter().any(|r| r.contains(&(p + i))))
                .map(|(_, deleted)| deleted)
                .collect();
            from_mask(op, map(p), &mask)
        }
        OperationKind::Retain => {
            let start = op.position;
            let end = start + op.length.unwrap_or(0);
            let new_start = map(start);
            let mut moved = op.at_position(new_start);
            moved.length = Some(map(end) - new_start);
            moved
        }
    }
}

/// Number of removed characters before position `x`.
fn removed_before(removed: &[Range<usize>], x: usize) -> usize {
    removed
        .iter()
        .map(|r| r.end.min(x).saturating_sub(r.start))
        .sum()
}

/// One flag per character of a delete's span, true where it is removed.
fn delete_mask(op: &Operation) -> Vec<bool> {
    let len = op.length.unwrap_or(0);
    let mut mask = vec![true; len];
    for kept in &op.kept {
        let end = (kept.offset + kept.length).min(len);
        for flag in mask.iter_mut().take(end).skip(kept.offset) {
            *flag = false;
        }
    }
    mask
}

/// Rebuilds a delete from its span mask starting at `position`. Kept
/// characters at either edge fall outside the new span.
fn from_mask(op: &Operation, position: usize, mask: &[bool]) -> Operation {
    let mut moved = op.clone();
    moved.kept = Vec::new();

    let (Some(first), Some(last)) = (mask.iter().position(|&d| d), mask.iter().rposition(|&d| d)) else {
        moved.position = position;
        moved.length = Some(0);
        return moved;
    };

    let span = &mask[first..=last];
    let mut run: Option<usize> = None;
    for (i, &deleted) in span.iter().enumerate() {
        match (deleted, run) {
            (false, None) => run = Some(i),
            (true, Some(start)) => {
                moved.kept.push(KeptRange {
                    offset: start,
                    length: i - start,
                });
                run = None;
            }
            _ => {}
        }
    }
    moved.position = position + first;
    moved.length = Some(span.len());
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn apply(doc: &str, op: &Operation) -> String {
        let mut s = doc.to_string();
        op.apply_to(&mut s);
        s
    }

    #[test]
    fn test_insert_before_shifts_forward() {
        let incoming = Operation::insert("b", 0, 5, "x");
        let committed = Operation::insert("a", 0, 2, "abc");
        assert_eq!(transform(&incoming, &committed).position, 8);
    }

    #[test]
    fn test_insert_after_does_not_shift() {
        let incoming = Operation::insert("b", 0, 1, "x");
        let committed = Operation::insert("a", 0, 2, "abc");
        assert_eq!(transform(&incoming, &committed).position, 1);
    }

    #[test]
    fn test_same_position_committed_goes_first() {
        let a = Operation::insert("alice", 0, 0, "foo");
        let b = Operation::insert("bob", 0, 0, "bar");

        let b_prime = transform(&b, &a);
        assert_eq!(b_prime.position, 3);
        assert_eq!(apply(&apply("", &a), &b_prime), "foobar");

        let a_prime = transform(&a, &b);
        assert_eq!(a_prime.position, 3);
        assert_eq!(apply(&apply("", &b), &a_prime), "barfoo");
    }

    #[test]
    fn test_delete_before_shifts_back() {
        // DELETE [2,5) committed, pending INSERT at 6 moves to 3.
        let pending = Operation::insert("b", 4, 6, "x");
        let committed = Operation::delete("a", 4, 2, 3);
        assert_eq!(transform(&pending, &committed).position, 3);
    }

    #[test]
    fn test_delete_overlap_clamps_to_start() {
        let incoming = Operation::retain("b", 0, 3, 0);
        let committed = Operation::delete("a", 0, 1, 5);
        assert_eq!(transform(&incoming, &committed).position, 1);

        let at_zero = Operation::insert("b", 0, 0, "x");
        let wipe = Operation::delete("a", 0, 0, 10);
        assert_eq!(transform(&at_zero, &wipe).position, 0);
    }

    #[test]
    fn test_retain_never_shifts() {
        let incoming = Operation::insert("b", 0, 4, "x");
        let committed = Operation::retain("a", 0, 0, 10);
        assert_eq!(transform(&incoming, &committed), incoming);
    }

    #[test]
    fn test_overlapping_deletes_shrink() {
        // "abcdefgh": a deletes [2,6), b deletes [4,8).
        let a = Operation::delete("a", 0, 2, 4);
        let b = Operation::delete("b", 0, 4, 4);
        let b_prime = transform(&b, &a);
        assert_eq!(b_prime.position, 2);
        assert_eq!(b_prime.length, Some(2));
        assert_eq!(apply(&apply("abcdefgh", &a), &b_prime), "ab");
    }

    #[test]
    fn test_insert_inside_concurrent_delete_keeps_text() {
        let delete = Operation::delete("a", 0, 1, 3);
        let insert = Operation::insert("b", 0, 2, "XY");

        let (d_prime, i_prime) = transform_concurrent(&delete, &insert);
        assert_eq!(i_prime.position, 1);
        assert_eq!(i_prime.content.as_deref(), Some("XY"));
        assert_eq!(d_prime.length, Some(5));
        assert_eq!(d_prime.kept, vec![KeptRange { offset: 1, length: 2 }]);

        let left = apply(&apply("abcdef", &delete), &i_prime);
        let right = apply(&apply("abcdef", &insert), &d_prime);
        assert_eq!(left, "aXYef");
        assert_eq!(left, right);
    }

    #[test]
    fn test_delete_with_kept_range_shrinks_past_delete() {
        // "abXYcdef" minus "b" and "cd", then someone removes "Yc".
        let mut split = Operation::delete("a", 0, 1, 5);
        split.kept = vec![KeptRange { offset: 1, length: 2 }];
        let other = Operation::delete("b", 0, 3, 2);

        let split_prime = transform(&split, &other);
        let other_prime = transform(&other, &split);
        let left = apply(&apply("abXYcdef", &other), &split_prime);
        let right = apply(&apply("abXYcdef", &split), &other_prime);
        assert_eq!(left, "aXef");
        assert_eq!(left, right);
        assert_eq!(split_prime.kept, vec![KeptRange { offset: 1, length: 1 }]);

        // An insert between the kept text and the next removed run.
        let insert = Operation::insert("c", 0, 4, "!");
        let insert_prime = transform(&insert, &split);
        assert_eq!(apply(&apply("abXYcdef", &split), &insert_prime), "aXY!ef");
    }

    #[test]
    fn test_delete_emptied_by_overlap() {
        let mut split = Operation::delete("a", 0, 1, 5);
        split.kept = vec![KeptRange { offset: 1, length: 2 }];
        let wipe = Operation::delete("b", 0, 0, 8);

        let emptied = transform(&split, &wipe);
        assert_eq!(emptied.deleted_len(), 0);
        assert!(emptied.kept.is_empty());
        assert_eq!(apply("", &emptied), "");
    }

    #[test]
    fn test_concurrent_tie_break_by_author() {
        let a = Operation::insert("alice", 0, 0, "foo").with_timestamp(5);
        let b = Operation::insert("bob", 0, 0, "bar").with_timestamp(1);
        let (a_prime, b_prime) = transform_concurrent(&a, &b);

        assert_eq!(apply(&apply("", &a), &b_prime), "foobar");
        assert_eq!(apply(&apply("", &b), &a_prime), "foobar");

        let (b2, a2) = transform_concurrent(&b, &a);
        assert_eq!(b2, b_prime);
        assert_eq!(a2, a_prime);
    }

    fn op_strategy(author: &'static str, max_pos: usize) -> impl Strategy<Value = Operation> {
        prop_oneof![
            (0..=max_pos, "[a-z]{1,4}")
                .prop_map(move |(pos, text)| Operation::insert(author, 0, pos, text)),
            (0..=max_pos, 1..5usize)
                .prop_map(move |(pos, len)| Operation::delete(author, 0, pos, len)),
            (0..=max_pos, 1..3usize, 1..3usize, 1..3usize).prop_map(
                move |(pos, head, keep, tail)| {
                    let mut op = Operation::delete(author, 0, pos, head + keep + tail);
                    op.kept = vec![KeptRange { offset: head, length: keep }];
                    op
                }
            ),
            (0..=max_pos, 0..5usize)
                .prop_map(move |(pos, len)| Operation::retain(author, 0, pos, len)),
        ]
    }

    proptest! {
        /// Property: transform is a pure function of its arguments.
        #[test]
        fn prop_transform_is_deterministic(
            a in op_strategy("alice", 12),
            b in op_strategy("bob", 12),
        ) {
            prop_assert_eq!(transform(&a, &b), transform(&a, &b));
            prop_assert_eq!(transform_concurrent(&a, &b), transform_concurrent(&a, &b));
        }

        /// Property: both application orders of a concurrent pair converge.
        #[test]
        fn prop_concurrent_pair_converges(
            doc in "[a-z]{0,12}",
            a in op_strategy("alice", 14),
            b in op_strategy("bob", 14),
        ) {
            let len = doc.chars().count();
            let clamp = |op: Operation| {
                let pos = op.position.min(len);
                let mut op = op.at_position(pos);
                if op.is_delete() {
                    op.length = op.length.map(|l| l.min(len - pos).max(1));
                }
                op
            };
            let a = clamp(a);
            let b = clamp(b);
            prop_assume!(!(a.is_delete() && a.position >= len));
            prop_assume!(!(b.is_delete() && b.position >= len));

            let (a_prime, b_prime) = transform_concurrent(&a, &b);
            let left = apply(&apply(&doc, &a), &b_prime);
            let right = apply(&apply(&doc, &b), &a_prime);
            prop_assert_eq!(left, right);
        }
    }
}
