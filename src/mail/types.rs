use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct HeaderFlags: u32 {
        const SEEN = 0b00000001;
        const DELETED = 0b00000010;
        const HIGH_PRIORITY = 0b00000100;
        const LOW_PRIORITY = 0b00001000;
        /// Body is available locally, no network round-trip needed
        const CACHED = 0b00010000;
    }
}

/// Unique message identifier within an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageUid(pub String);

impl MessageUid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the folder a header lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(pub String);

impl FolderId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Folder names compare case-insensitively ("INBOX" == "inbox")
    pub fn matches(&self, other: &FolderId) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata-only view of a message.
///
/// Headers are shared between the list view and any window displaying them,
/// so flags use interior mutability: marking a message seen changes the
/// header, not the list it sits in.
#[derive(Debug)]
pub struct Header {
    pub uid: MessageUid,
    pub folder: FolderId,
    pub subject: String,
    pub from_addr: String,
    pub date: i64,
    flags: Cell<HeaderFlags>,
}

pub type HeaderRef = Rc<Header>;

impl Header {
    pub fn new(uid: MessageUid, folder: FolderId, subject: impl Into<String>) -> Self {
        Self {
            uid,
            folder,
            subject: subject.into(),
            from_addr: String::new(),
            date: 0,
            flags: Cell::new(HeaderFlags::empty()),
        }
    }

    pub fn with_flags(self, flags: HeaderFlags) -> Self {
        self.flags.set(flags);
        self
    }

    pub fn with_sender(mut self, from_addr: impl Into<String>, date: i64) -> Self {
        self.from_addr = from_addr.into();
        self.date = date;
        self
    }

    pub fn into_ref(self) -> HeaderRef {
        Rc::new(self)
    }

    pub fn flags(&self) -> HeaderFlags {
        self.flags.get()
    }

    pub fn set_flags(&self, flags: HeaderFlags) {
        self.flags.set(flags);
    }

    pub fn insert_flag(&self, flag: HeaderFlags) {
        self.flags.set(self.flags.get() | flag);
    }

    pub fn is_seen(&self) -> bool {
        self.flags().contains(HeaderFlags::SEEN)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags().contains(HeaderFlags::DELETED)
    }

    pub fn is_cached(&self) -> bool {
        self.flags().contains(HeaderFlags::CACHED)
    }

    pub fn display_date(&self) -> String {
        chrono::DateTime::from_timestamp(self.date, 0)
            .map(|dt| dt.format("%b %d, %Y at %H:%M").to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    pub text: Option<String>,
    pub html: Option<String>,
}

impl MessageBody {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            html: None,
        }
    }

    /// Text shown by a viewer that doesn't render HTML
    pub fn display_text(&self) -> &str {
        self.text
            .as_deref()
            .or(self.html.as_deref())
            .unwrap_or("[No content]")
    }
}

/// A fully materialized message: header plus body
#[derive(Debug, Clone)]
pub struct Message {
    pub header: HeaderRef,
    pub body: MessageBody,
}

impl Message {
    pub fn uid(&self) -> &MessageUid {
        &self.header.uid
    }
}
