pub mod types;

pub use types::{FolderId, Header, HeaderFlags, HeaderRef, Message, MessageBody, MessageUid};
