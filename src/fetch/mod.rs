//! Resolving headers into fully fetched messages.
//!
//! - `mod.rs` - collaborator traits and request/outcome types
//! - `registry.rs` - process-wide "header in use" table
//! - `coordinator.rs` - the cache/connectivity/confirm/connect/fetch state machine

mod coordinator;
mod registry;

use std::fmt;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::mail::types::{FolderId, HeaderRef, Message, MessageUid};
use crate::model::RowReference;

pub use coordinator::{Completion, FetchCoordinator};
pub use registry::{HeaderRegistry, InUseRegistry, WindowId};

/// What to fetch: a header from a list, or a bare identifier
#[derive(Debug, Clone)]
pub enum FetchTarget {
    Header(HeaderRef),
    Uid { folder: FolderId, uid: MessageUid },
}

impl FetchTarget {
    pub fn uid(&self) -> &MessageUid {
        match self {
            Self::Header(header) => &header.uid,
            Self::Uid { uid, .. } => uid,
        }
    }

    pub fn folder(&self) -> &FolderId {
        match self {
            Self::Header(header) => &header.folder,
            Self::Uid { folder, .. } => folder,
        }
    }

    pub fn header(&self) -> Option<&HeaderRef> {
        match self {
            Self::Header(header) => Some(header),
            Self::Uid { .. } => None,
        }
    }
}

/// One navigation/open action
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub target: FetchTarget,
    pub row: Option<RowReference>,
}

impl FetchRequest {
    pub fn new(target: FetchTarget, row: Option<RowReference>) -> Self {
        Self { target, row }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// "Retrieve this message now?" was answered no
    UserDeclined,
    /// Connection picker dismissed
    ConnectionDismissed,
    /// The window closed while the fetch was pending
    WindowClosed,
    /// A newer open/next/previous replaced this one
    Superseded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UserDeclined => "declined by user",
            Self::ConnectionDismissed => "connection dismissed",
            Self::WindowClosed => "window closed",
            Self::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Resolved { message: Message, header: HeaderRef },
    Canceled(CancelReason),
    Failed(FetchError),
}

impl FetchOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }

    pub fn uid(&self) -> Option<&MessageUid> {
        match self {
            Self::Resolved { header, .. } => Some(&header.uid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchState {
    #[default]
    Idle,
    CheckingCache,
    CheckingConnectivity,
    ConfirmingDownload,
    Connecting,
    Fetching,
    Resolved,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResult {
    Connected,
    Failed(String),
    /// The user dismissed the connection dialog
    Canceled,
}

/// Transport and storage layer, consumed as an opaque capability
#[async_trait(?Send)]
pub trait FetchService {
    async fn fetch(&self, target: &FetchTarget) -> Result<Message, FetchError>;

    /// Whether the body can be read without the network
    fn is_cached(&self, target: &FetchTarget) -> bool;

    fn is_online(&self) -> bool;

    /// Bring the device online so the fetch can be retried
    async fn connect(&self) -> ConnectResult;
}

/// Asks the user whether to download a message that is not available offline
#[async_trait(?Send)]
pub trait RetrievalPrompt {
    async fn confirm_retrieval(&self, target: &FetchTarget) -> bool;
}

/// Prompt with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait(?Send)]
impl RetrievalPrompt for FixedAnswer {
    async fn confirm_retrieval(&self, _target: &FetchTarget) -> bool {
        self.0
    }
}
