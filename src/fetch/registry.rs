use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::mail::types::MessageUid;

/// Identifies a message window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which window is currently retrieving or showing a header
pub trait HeaderRegistry {
    fn register_in_use(&self, uid: &MessageUid, window: WindowId);
    fn unregister_in_use(&self, uid: &MessageUid);
    fn find_in_use(&self, uid: &MessageUid) -> Option<WindowId>;
}

/// In-memory registry, created once at startup and shared by all windows.
/// Registrations are counted so overlapping fetches from one window release
/// the entry only when the last one finishes.
#[derive(Debug, Default)]
pub struct InUseRegistry {
    entries: RefCell<HashMap<MessageUid, (WindowId, usize)>>,
}

impl InUseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl HeaderRegistry for InUseRegistry {
    fn register_in_use(&self, uid: &MessageUid, window: WindowId) {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.entry(uid.clone()).or_insert((window, 0));
        if entry.0 != window {
            tracing::warn!(
                "Message {} taken over by window {} from window {}",
                uid,
                window,
                entry.0
            );
            *entry = (window, 0);
        }
        entry.1 += 1;
    }

    fn unregister_in_use(&self, uid: &MessageUid) {
        let mut entries = self.entries.borrow_mut();
        if let Some(entry) = entries.get_mut(uid) {
            entry.1 = entry.1.saturating_sub(1);
            if entry.1 == 0 {
                entries.remove(uid);
            }
        }
    }

    fn find_in_use(&self, uid: &MessageUid) -> Option<WindowId> {
        self.entries.borrow().get(uid).map(|(window, _)| *window)
    }
}

/// Holds an in-use registration and releases it on drop, so every exit path
/// of a fetch (success, failure, cancellation, or the future being dropped)
/// unregisters exactly once.
pub(crate) struct InUseGuard {
    registry: Rc<dyn HeaderRegistry>,
    uid: MessageUid,
}

impl InUseGuard {
    pub(crate) fn register(
        registry: Rc<dyn HeaderRegistry>,
        uid: &MessageUid,
        window: WindowId,
    ) -> Self {
        registry.register_in_use(uid, window);
        tracing::trace!("Registered {} in use by window {}", uid, window);
        Self {
            registry,
            uid: uid.clone(),
        }
    }
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        self.registry.unregister_in_use(&self.uid);
        tracing::trace!("Released in-use registration for {}", self.uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_find() {
        let registry = InUseRegistry::new();
        let uid = MessageUid::new("1");
        assert_eq!(registry.find_in_use(&uid), None);

        registry.register_in_use(&uid, WindowId(7));
        assert_eq!(registry.find_in_use(&uid), Some(WindowId(7)));

        registry.unregister_in_use(&uid);
        assert_eq!(registry.find_in_use(&uid), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_nested_registrations_from_one_window() {
        let registry = InUseRegistry::new();
        let uid = MessageUid::new("1");
        registry.register_in_use(&uid, WindowId(1));
        registry.register_in_use(&uid, WindowId(1));
        registry.unregister_in_use(&uid);
        assert_eq!(registry.find_in_use(&uid), Some(WindowId(1)));
        registry.unregister_in_use(&uid);
        assert_eq!(registry.find_in_use(&uid), None);
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let registry = InUseRegistry::new();
        registry.unregister_in_use(&MessageUid::new("missing"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = Rc::new(InUseRegistry::new());
        let uid = MessageUid::new("1");
        {
            let _guard = InUseGuard::register(registry.clone(), &uid, WindowId(3));
            assert_eq!(registry.find_in_use(&uid), Some(WindowId(3)));
        }
        assert_eq!(registry.find_in_use(&uid), None);
    }
}
