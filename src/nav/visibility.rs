//! Which headers count for next/previous navigation.

use std::fmt;
use std::rc::Rc;

use crate::mail::types::Header;

/// Send-queue state of a message sitting in the outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendStatus {
    #[default]
    Normal,
    Sending,
    Failed,
}

/// Looks up the send-queue status of an outbox header
pub trait SendQueueStatus {
    fn status(&self, header: &Header) -> SendStatus;
}

/// Lookup for contexts without a send queue
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSendQueue;

impl SendQueueStatus for NoSendQueue {
    fn status(&self, _header: &Header) -> SendStatus {
        SendStatus::Normal
    }
}

pub fn is_visible(header: &Header, outbox_context: bool, lookup: &dyn SendQueueStatus) -> bool {
    if header.is_deleted() {
        return false;
    }
    if !outbox_context {
        return true;
    }
    !matches!(lookup.status(header), SendStatus::Sending | SendStatus::Failed)
}

/// The navigation filter, captured once per window. Cursor search and model
/// repair both go through `accepts` so they never disagree.
#[derive(Clone)]
pub struct Visibility {
    outbox_context: bool,
    send_queue: Rc<dyn SendQueueStatus>,
}

impl Visibility {
    pub fn new(outbox_context: bool, send_queue: Rc<dyn SendQueueStatus>) -> Self {
        Self {
            outbox_context,
            send_queue,
        }
    }

    /// Filter for ordinary folders: only deleted headers are skipped
    pub fn plain() -> Self {
        Self::new(false, Rc::new(NoSendQueue))
    }

    pub fn is_outbox_context(&self) -> bool {
        self.outbox_context
    }

    pub fn accepts(&self, header: &Header) -> bool {
        is_visible(header, self.outbox_context, self.send_queue.as_ref())
    }
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Visibility")
            .field("outbox_context", &self.outbox_context)
            .finish_non_exhaustive()
    }
}
