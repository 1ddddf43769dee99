//! Message store behind the fetch service: an actor owning message bodies,
//! reached through a cloneable command channel.

mod actor;

use serde::{Deserialize, Serialize};

use crate::mail::types::{FolderId, Header, HeaderFlags, HeaderRef, MessageBody, MessageUid};

pub use actor::{StoreCommand, StoreHandle, spawn_store_actor};

/// A message as the store keeps it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub uid: MessageUid,
    pub folder: FolderId,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: String,
    /// Unix timestamp
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub html: Option<String>,
    /// Body already available locally
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl StoredMessage {
    pub fn new(
        uid: impl Into<String>,
        folder: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            uid: MessageUid::new(uid),
            folder: FolderId::new(folder),
            subject: subject.into(),
            from: String::new(),
            date: 0,
            body: String::new(),
            html: None,
            cached: false,
            deleted: false,
        }
    }

    pub fn flags(&self) -> HeaderFlags {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::CACHED, self.cached);
        flags.set(HeaderFlags::DELETED, self.deleted);
        flags
    }

    /// An empty text part counts as missing
    pub fn message_body(&self) -> MessageBody {
        MessageBody {
            text: (!self.body.is_empty()).then(|| self.body.clone()),
            html: self.html.clone(),
        }
    }

    /// Fresh header for list views
    pub fn header(&self) -> HeaderRef {
        Header::new(self.uid.clone(), self.folder.clone(), self.subject.as_str())
            .with_sender(self.from.as_str(), self.date)
            .with_flags(self.flags())
            .into_ref()
    }
}
