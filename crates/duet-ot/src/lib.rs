//! Operation log and transform engine for Duet shared documents.
//!
//! Every session has exactly one [`SequencingAuthority`] owning the canonical
//! [`DocumentState`]. Participants keep a local [`Replica`], apply their own
//! edits optimistically, and send them to the authority. The authority
//! assigns each incoming [`Operation`] the next version, transforming it
//! against everything committed since the version it was authored against,
//! and broadcasts the result. Replicas that apply the committed sequence in
//! version order converge to identical content.
//!
//! ## Example
//!
//! ```rust
//! use duet_ot::{Operation, SequencingAuthority};
//!
//! let authority = SequencingAuthority::new("session-1");
//! authority.register_author("alice");
//! authority.register_author("bob");
//!
//! // Both authored against version 0.
//! authority.commit(Operation::insert("alice", 0, 0, "foo")).unwrap();
//! authority.commit(Operation::insert("bob", 0, 0, "bar")).unwrap();
//!
//! assert_eq!(authority.snapshot().content, "foobar");
//! assert_eq!(authority.version(), 2);
//! ```

mod authority;
mod document;
mod error;
mod operation;
mod replica;
mod transform;

pub use authority::SequencingAuthority;
pub use document::{CommittedOperation, DocumentSnapshot, DocumentState};
pub use error::OtError;
pub use operation::{KeptRange, Operation, OperationKind};
pub use replica::Replica;
pub use transform::{transform, transform_concurrent, transform_with_priority};

/// Result type for transform engine operations.
pub type Result<T> = std::result::Result<T, OtError>;
