//! Document edit operations.

use duet_types::now_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::{OtError, Result};

/// Kind of a document edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Insert text at a position.
    Insert,
    /// Delete a run of characters starting at a position.
    Delete,
    /// Move over characters without changing them.
    Retain,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Retain => write!(f, "retain"),
        }
    }
}

/// A run of characters inside a delete's span that the delete leaves in
/// place.
///
/// Offsets are relative to the delete's position. A delete gains kept
/// ranges when text is inserted strictly inside it concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeptRange {
    pub offset: usize,
    pub length: usize,
}

/// An atomic edit of a shared document.
///
/// Positions and lengths count Unicode scalar values, not bytes. An operation
/// is immutable once authored; transforming it yields a new operation with an
/// adjusted effective position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// What the operation does.
    pub kind: OperationKind,
    /// Character offset at authoring time.
    pub position: usize,
    /// Inserted text (inserts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Number of characters deleted or retained. For a delete this is the
    /// whole span, kept ranges included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Characters inside a delete's span that survive it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kept: Vec<KeptRange>,
    /// Author of the operation.
    pub author_id: String,
    /// Unix timestamp in milliseconds when the operation was authored.
    #[serde(default)]
    pub timestamp: u64,
    /// Document version the operation was authored against.
    pub authored_version: u64,
}

impl Operation {
    /// Creates an insert operation.
    pub fn insert(
        author_id: impl Into<String>,
        authored_version: u64,
        position: usize,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: OperationKind::Insert,
            position,
            content: Some(text.into()),
            length: None,
            kept: Vec::new(),
            author_id: author_id.into(),
            timestamp: now_millis(),
            authored_version,
        }
    }

    /// Creates a delete operation.
    pub fn delete(
        author_id: impl Into<String>,
        authored_version: u64,
        position: usize,
        length: usize,
    ) -> Self {
        Self {
            kind: OperationKind::Delete,
            position,
            content: None,
            length: Some(length),
            kept: Vec::new(),
            author_id: author_id.into(),
            timestamp: now_millis(),
            authored_version,
        }
    }

    /// Creates a retain operation.
    pub fn retain(
        author_id: impl Into<String>,
        authored_version: u64,
        position: usize,
        length: usize,
    ) -> Self {
        Self {
            kind: OperationKind::Retain,
            position,
            content: None,
            length: Some(length),
            kept: Vec::new(),
            author_id: author_id.into(),
            timestamp: now_millis(),
            authored_version,
        }
    }

    /// Returns a copy with a fixed timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns a copy authored against a different version.
    pub fn with_authored_version(mut self, authored_version: u64) -> Self {
        self.authored_version = authored_version;
        self
    }

    /// Returns a copy at a different effective position.
    pub fn at_position(&self, position: usize) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }

    /// Number of characters inserted, zero for non-inserts.
    pub fn inserted_len(&self) -> usize {
        match self.kind {
            OperationKind::Insert => self
                .content
                .as_deref()
                .map(|s| s.chars().count())
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Number of characters deleted, zero for non-deletes.
    pub fn deleted_len(&self) -> usize {
        self.removed_ranges().iter().map(|r| r.len()).sum()
    }

    /// Absolute character ranges a delete removes, in ascending order and
    /// relative to the content before it applies. Empty for non-deletes.
    pub fn removed_ranges(&self) -> Vec<Range<usize>> {
        if self.kind != OperationKind::Delete {
            return Vec::new();
        }
        let start = self.position;
        let end = start + self.length.unwrap_or(0);

        let mut ranges = Vec::new();
        let mut cursor = start;
        for kept in &self.kept {
            let kept_start = (start + kept.offset).min(end);
            if kept_start > cursor {
                ranges.push(cursor..kept_start);
            }
            cursor = cursor.max(kept_start + kept.length).min(end);
        }
        if end > cursor {
            ranges.push(cursor..end);
        }
        ranges
    }

    /// Returns true for inserts.
    pub fn is_insert(&self) -> bool {
        self.kind == OperationKind::Insert
    }

    /// Returns true for deletes.
    pub fn is_delete(&self) -> bool {
        self.kind == OperationKind::Delete
    }

    /// Checks that the payload matches the kind.
    pub fn validate(&self) -> Result<()> {
        if self.author_id.trim().is_empty() {
            return Err(OtError::InvalidOperation(
                "operation has no author".to_string(),
            ));
        }

        match self.kind {
            OperationKind::Insert => {
                if !self.kept.is_empty() {
                    return Err(OtError::InvalidOperation(
                        "insert with kept ranges".to_string(),
                    ));
                }
                if self.content.is_none() {
                    return Err(OtError::InvalidOperation(
                        "insert without content".to_string(),
                    ));
                }
            }
            OperationKind::Delete => match self.length {
                None => {
                    return Err(OtError::InvalidOperation(
                        "delete without length".to_string(),
                    ))
                }
                Some(0) => {
                    return Err(OtError::InvalidOperation(
                        "delete of zero characters".to_string(),
                    ))
                }
                Some(length) => validate_kept(&self.kept, length)?,
            },
            OperationKind::Retain => {
                if !self.kept.is_empty() {
                    return Err(OtError::InvalidOperation(
                        "retain with kept ranges".to_string(),
                    ));
                }
                if self.length.is_none() {
                    return Err(OtError::InvalidOperation(
                        "retain without length".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Applies the operation to `content`, clamping out-of-range positions.
    ///
    /// Inserts past the end land at the end; deletes past the end remove
    /// only what is available.
    pub fn apply_to(&self, content: &mut String) {
        let char_len = content.chars().count();
        let position = self.position.min(char_len);

        match self.kind {
            OperationKind::Insert => {
                if let Some(text) = &self.content {
                    let at = byte_offset(content, position);
                    content.insert_str(at, text);
                }
            }
            OperationKind::Delete => {
                // Back to front, so earlier ranges keep their offsets.
                for range in self.removed_ranges().into_iter().rev() {
                    let from = range.start.min(char_len);
                    let to = range.end.min(char_len);
                    if from < to {
                        let start = byte_offset(content, from);
                        let end = byte_offset(content, to);
                        content.replace_range(start..end, "");
                    }
                }
            }
            OperationKind::Retain => {}
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperationKind::Insert => write!(
                f,
                "insert({}, {:?}) by {}@v{}",
                self.position,
                self.content.as_deref().unwrap_or_default(),
                self.author_id,
                self.authored_version
            ),
            _ => {
                write!(f, "{}({}, {}", self.kind, self.position, self.length.unwrap_or(0))?;
                if !self.kept.is_empty() {
                    write!(f, ", keeping {}", self.kept.len())?;
                }
                write!(f, ") by {}@v{}", self.author_id, self.authored_version)
            }
        }
    }
}

/// Kept ranges must be non-empty, ordered, separated by deleted characters,
/// and strictly inside the span.
fn validate_kept(kept: &[KeptRange], span: usize) -> Result<()> {
    let mut min_offset = 1;
    for range in kept {
        let end = range.offset + range.length;
        if range.length == 0 || range.offset < min_offset || end >= span {
            return Err(OtError::InvalidOperation(format!(
                "kept range {}..{} does not fit inside a delete of {}",
                range.offset, end, span
            )));
        }
        min_offset = end + 1;
    }
    Ok(())
}

/// Byte offset of the character at `char_pos`, or the end of the string.
fn byte_offset(s: &str, char_pos: usize) -> usize {
    s.char_indices()
        .nth(char_pos)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_apply() {
        let mut doc = "hello world".to_string();
        Operation::insert("a", 0, 5, ",").apply_to(&mut doc);
        assert_eq!(doc, "hello, world");
    }

    #[test]
    fn test_insert_past_end_clamps() {
        let mut doc = "abc".to_string();
        Operation::insert("a", 0, 99, "!").apply_to(&mut doc);
        assert_eq!(doc, "abc!");
    }

    #[test]
    fn test_delete_apply_and_clamp() {
        let mut doc = "abcdef".to_string();
        Operation::delete("a", 0, 2, 3).apply_to(&mut doc);
        assert_eq!(doc, "abf");

        Operation::delete("a", 0, 1, 100).apply_to(&mut doc);
        assert_eq!(doc, "a");

        Operation::delete("a", 0, 10, 3).apply_to(&mut doc);
        assert_eq!(doc, "a");
    }

    #[test]
    fn test_retain_is_noop() {
        let mut doc = "abc".to_string();
        Operation::retain("a", 0, 1, 2).apply_to(&mut doc);
        assert_eq!(doc, "abc");
    }

    #[test]
    fn test_multibyte_positions_count_chars() {
        let mut doc = "héllo".to_string();
        Operation::insert("a", 0, 2, "X").apply_to(&mut doc);
        assert_eq!(doc, "héXllo");
        Operation::delete("a", 0, 1, 1).apply_to(&mut doc);
        assert_eq!(doc, "hXllo");
    }

    #[test]
    fn test_validate() {
        assert!(Operation::insert("a", 0, 0, "x").validate().is_ok());
        assert!(Operation::delete("a", 0, 0, 1).validate().is_ok());
        assert!(Operation::delete("a", 0, 0, 0).validate().is_err());
        assert!(Operation::insert("", 0, 0, "x").validate().is_err());

        let mut bad = Operation::insert("a", 0, 0, "x");
        bad.content = None;
        assert!(matches!(
            bad.validate(),
            Err(OtError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_delete_leaves_kept_ranges() {
        // "abXYcdef": remove "b" and "cd", keep "XY".
        let mut op = Operation::delete("a", 0, 1, 5);
        op.kept = vec![KeptRange { offset: 1, length: 2 }];
        assert!(op.validate().is_ok());
        assert_eq!(op.deleted_len(), 3);
        assert_eq!(op.removed_ranges(), vec![1..2, 4..6]);

        let mut doc = "abXYcdef".to_string();
        op.apply_to(&mut doc);
        assert_eq!(doc, "aXYef");

        // Past the end only the available characters go.
        let mut short = "abXY".to_string();
        op.apply_to(&mut short);
        assert_eq!(short, "aXY");
    }

    #[test]
    fn test_validate_rejects_misplaced_kept_ranges() {
        let with = |kept: Vec<KeptRange>| {
            let mut op = Operation::delete("a", 0, 0, 6);
            op.kept = kept;
            op.validate()
        };
        assert!(with(vec![KeptRange { offset: 0, length: 2 }]).is_err());
        assert!(with(vec![KeptRange { offset: 2, length: 4 }]).is_err());
        assert!(with(vec![KeptRange { offset: 2, length: 0 }]).is_err());
        assert!(with(vec![
            KeptRange { offset: 1, length: 1 },
            KeptRange { offset: 2, length: 1 },
        ])
        .is_err());
        assert!(with(vec![
            KeptRange { offset: 1, length: 1 },
            KeptRange { offset: 3, length: 1 },
        ])
        .is_ok());

        let mut insert = Operation::insert("a", 0, 0, "x");
        insert.kept = vec![KeptRange { offset: 1, length: 1 }];
        assert!(insert.validate().is_err());
    }

    #[test]
    fn test_wire_format() {
        let op = Operation::insert("alice", 3, 7, "fn").with_timestamp(10);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "INSERT");
        assert_eq!(json["position"], 7);
        assert_eq!(json["content"], "fn");
        assert_eq!(json["authorId"], "alice");
        assert_eq!(json["authoredVersion"], 3);
        assert!(json.get("length").is_none());

        let del = Operation::delete("bob", 1, 2, 4);
        let json = serde_json::to_value(&del).unwrap();
        assert_eq!(json["kind"], "DELETE");
        assert_eq!(json["length"], 4);
        assert!(json.get("content").is_none());
        assert!(json.get("kept").is_none());

        let mut split = Operation::delete("bob", 1, 2, 5);
        split.kept = vec![KeptRange { offset: 1, length: 2 }];
        let json = serde_json::to_value(&split).unwrap();
        assert_eq!(json["kept"][0]["offset"], 1);
        assert_eq!(json["kept"][0]["length"], 2);
    }
}
