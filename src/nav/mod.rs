//! Message-window navigation: which row is displayed, what comes next, and
//! how that survives the list changing underneath.

pub mod cursor;
pub mod facade;
pub mod observer;
pub mod visibility;

pub use cursor::{CursorState, CursorTracker};
pub use facade::{FacadeOptions, NavEvent, NavServices, NavigationFacade, OpenTarget};
pub use observer::{ModelChangeObserver, Reaction};
pub use visibility::{NoSendQueue, SendQueueStatus, SendStatus, Visibility};
