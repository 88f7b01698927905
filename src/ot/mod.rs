//! Operational transform text engine.
//!
//! Pure, no I/O. All positions and lengths are code-point counts, never
//! byte offsets; `Snippet` stores `Vec<char>` internally for exactly this
//! reason.

mod apply;
mod component;
mod diff;
mod snippet;
mod transform;

pub use component::{Component, Op};
pub use snippet::Snippet;

pub use apply::apply;
pub use diff::diff;
pub use transform::{transform, Side};

use thiserror::Error;

/// Failures from `apply`/`transform`/`diff`. All are fatal for the offending
/// client: the caller's local state has diverged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OtError {
    #[error("insertion position {position} exceeds snapshot length {len}")]
    InsertOutOfBounds { position: usize, len: usize },

    #[error("deletion at {position} does not match snapshot content")]
    DeleteMismatch { position: usize },

    #[error("comment at {position} does not match snapshot content")]
    CommentMismatch { position: usize },

    #[error("deletion and deletion target different text at overlapping range")]
    DeleteOpsDeleteDifferentText,

    #[error("comment op encountered but comment components are not supported by this deployment")]
    CommentsUnsupported,
}
