//! Error types for the cursor subsystem.

use thiserror::Error;

use crate::fetch::WindowId;
use crate::mail::types::MessageUid;

/// Structural failures inside the cursor. Never surfaced to users; callers
/// degrade to "no next/previous available".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorError {
    /// The row reference no longer resolves in the observed model
    #[error("row reference is stale")]
    StaleReference,
}

/// Misuse of a `HeaderList` by the component that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("index {index} out of range for list of {len} rows")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("reorder is not a permutation of {len} rows")]
    InvalidPermutation { len: usize },
}

/// Why a fetch failed. Reported once to the caller of open/next/previous/reload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or disk failure while retrieving the message
    #[error("transport error: {0}")]
    Transport(String),

    /// Going online failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store has no message with this uid
    #[error("message {0} not found")]
    NotFound(MessageUid),

    /// Another window is already retrieving or showing this message
    #[error("message is already open in window {window}")]
    InUse { window: WindowId },

    /// The fetch service went away (actor stopped)
    #[error("fetch service unavailable")]
    ServiceUnavailable,
}
