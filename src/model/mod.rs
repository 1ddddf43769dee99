//! Ordered, observable header list.
//!
//! The list is owned by the list view. Everything else observes it through
//! subscriptions and holds `RowReference`s, never indices or headers.

mod row_ref;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use tokio::sync::mpsc;

use crate::error::ModelError;
use crate::mail::types::{FolderId, HeaderFlags, HeaderRef, MessageUid};

pub use row_ref::RowReference;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one list instance. A re-synced folder gets a new list and
/// therefore a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(u64);

impl ModelId {
    fn next() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Stable identity of a row for the lifetime of its list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEvent {
    Inserted { index: usize, row: RowId },
    Removed { index: usize, row: RowId },
    RowChanged { index: usize, row: RowId },
    Reordered,
}

impl ListEvent {
    fn kind(&self) -> EventMask {
        match self {
            Self::Inserted { .. } => EventMask::INSERTED,
            Self::Removed { .. } => EventMask::REMOVED,
            Self::RowChanged { .. } => EventMask::CHANGED,
            Self::Reordered => EventMask::REORDERED,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u8 {
        const INSERTED = 0b0001;
        const REMOVED = 0b0010;
        const CHANGED = 0b0100;
        const REORDERED = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription. Dropping it ends the subscription; the
/// list prunes the closed sender on its next emit.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    model: ModelId,
    rx: mpsc::UnboundedReceiver<ListEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    /// Next queued event, in emit order
    pub fn try_next(&mut self) -> Option<ListEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. `None` once the list is gone.
    pub async fn recv(&mut self) -> Option<ListEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    mask: EventMask,
    tx: mpsc::UnboundedSender<ListEvent>,
}

#[derive(Debug)]
struct Row {
    id: RowId,
    header: HeaderRef,
}

#[derive(Debug)]
pub struct HeaderList {
    id: ModelId,
    folder: FolderId,
    rows: Vec<Row>,
    /// RowId -> current index, rebuilt after every structural change
    positions: HashMap<RowId, usize>,
    next_row: u64,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

pub type SharedHeaderList = Rc<RefCell<HeaderList>>;

impl HeaderList {
    pub fn new(folder: FolderId) -> Self {
        Self {
            id: ModelId::next(),
            folder,
            rows: Vec::new(),
            positions: HashMap::new(),
            next_row: 0,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn from_headers(folder: FolderId, headers: impl IntoIterator<Item = HeaderRef>) -> Self {
        let mut list = Self::new(folder);
        for header in headers {
            let row = list.allocate_row();
            list.rows.push(Row { id: row, header });
        }
        list.reindex();
        list
    }

    pub fn into_shared(self) -> SharedHeaderList {
        Rc::new(RefCell::new(self))
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn folder(&self) -> &FolderId {
        &self.folder
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HeaderRef> {
        self.rows.get(index).map(|r| &r.header)
    }

    pub fn uid_at(&self, index: usize) -> Option<&MessageUid> {
        self.get(index).map(|h| &h.uid)
    }

    pub fn row_at(&self, index: usize) -> Option<RowId> {
        self.rows.get(index).map(|r| r.id)
    }

    pub fn position_of(&self, row: RowId) -> Option<usize> {
        self.positions.get(&row).copied()
    }

    pub fn header_for(&self, row: RowId) -> Option<&HeaderRef> {
        self.position_of(row).and_then(|idx| self.get(idx))
    }

    pub fn find_uid(&self, uid: &MessageUid) -> Option<usize> {
        self.rows.iter().position(|r| &r.header.uid == uid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderRef> {
        self.rows.iter().map(|r| &r.header)
    }

    pub fn insert(&mut self, index: usize, header: HeaderRef) -> Result<RowId, ModelError> {
        if index > self.rows.len() {
            return Err(ModelError::IndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        let row = self.allocate_row();
        self.rows.insert(index, Row { id: row, header });
        self.reindex();
        self.emit(ListEvent::Inserted { index, row });
        Ok(row)
    }

    pub fn push(&mut self, header: HeaderRef) -> RowId {
        let index = self.rows.len();
        let row = self.allocate_row();
        self.rows.push(Row { id: row, header });
        self.positions.insert(row, index);
        self.emit(ListEvent::Inserted { index, row });
        row
    }

    pub fn remove(&mut self, index: usize) -> Result<HeaderRef, ModelError> {
        if index >= self.rows.len() {
            return Err(ModelError::IndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        let removed = self.rows.remove(index);
        self.reindex();
        self.emit(ListEvent::Removed {
            index,
            row: removed.id,
        });
        Ok(removed.header)
    }

    /// Reorder rows. `new_order[i]` is the old index of the row that ends up at `i`.
    pub fn reorder(&mut self, new_order: &[usize]) -> Result<(), ModelError> {
        let len = self.rows.len();
        let mut seen = vec![false; len];
        for &old in new_order {
            if old >= len || seen[old] {
                return Err(ModelError::InvalidPermutation { len });
            }
            seen[old] = true;
        }
        if new_order.len() != len {
            return Err(ModelError::InvalidPermutation { len });
        }

        let mut old_rows: Vec<Option<Row>> = self.rows.drain(..).map(Some).collect();
        self.rows = new_order
            .iter()
            .filter_map(|&old| old_rows[old].take())
            .collect();
        self.reindex();
        self.emit(ListEvent::Reordered);
        Ok(())
    }

    /// Replace a header's flags and notify observers that the row changed
    pub fn set_flags(&mut self, index: usize, flags: HeaderFlags) -> Result<(), ModelError> {
        let Some(row) = self.rows.get(index) else {
            return Err(ModelError::IndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        };
        row.header.set_flags(flags);
        let row = row.id;
        self.emit(ListEvent::RowChanged { index, row });
        Ok(())
    }

    pub fn subscribe(&mut self, mask: EventMask) -> Subscription {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(Subscriber { id, mask, tx });
        Subscription {
            id,
            model: self.id,
            rx,
        }
    }

    /// Change which events a subscription receives. Returns false if it is gone.
    pub fn set_mask(&mut self, id: SubscriptionId, mask: EventMask) -> bool {
        match self.subscribers.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.mask = mask;
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }

    fn allocate_row(&mut self) -> RowId {
        let row = RowId(self.next_row);
        self.next_row += 1;
        row
    }

    fn reindex(&mut self) {
        self.positions.clear();
        for (idx, row) in self.rows.iter().enumerate() {
            self.positions.insert(row.id, idx);
        }
    }

    fn emit(&mut self, event: ListEvent) {
        let kind = event.kind();
        self.subscribers.retain(|sub| {
            if sub.mask.contains(kind) {
                sub.tx.send(event).is_ok()
            } else {
                !sub.tx.is_closed()
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::types::Header;

    fn header(uid: &str) -> HeaderRef {
        Header::new(MessageUid::new(uid), FolderId::new("INBOX"), format!("Subject {}", uid))
            .into_ref()
    }

    fn list(uids: &[&str]) -> HeaderList {
        HeaderList::from_headers(FolderId::new("INBOX"), uids.iter().map(|u| header(u)))
    }

    fn uids(list: &HeaderList) -> Vec<String> {
        list.iter().map(|h| h.uid.0.clone()).collect()
    }

    #[test]
    fn test_models_have_distinct_identities() {
        let a = list(&["1"]);
        let b = list(&["1"]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_insert_shifts_positions() {
        let mut list = list(&["1", "2"]);
        let second = list.row_at(1).unwrap();
        list.insert(0, header("0")).unwrap();
        assert_eq!(uids(&list), vec!["0", "1", "2"]);
        assert_eq!(list.position_of(second), Some(2));
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut list = list(&["1"]);
        assert_eq!(
            list.insert(5, header("x")),
            Err(ModelError::IndexOutOfRange { index: 5, len: 1 })
        );
    }

    #[test]
    fn test_remove_forgets_row() {
        let mut list = list(&["1", "2", "3"]);
        let row = list.row_at(1).unwrap();
        let removed = list.remove(1).unwrap();
        assert_eq!(removed.uid.as_str(), "2");
        assert_eq!(list.position_of(row), None);
        assert_eq!(list.find_uid(&MessageUid::new("3")), Some(1));
    }

    #[test]
    fn test_reorder_moves_rows() {
        let mut list = list(&["a", "b", "c"]);
        let a = list.row_at(0).unwrap();
        list.reorder(&[2, 0, 1]).unwrap();
        assert_eq!(uids(&list), vec!["c", "a", "b"]);
        assert_eq!(list.position_of(a), Some(1));
    }

    #[test]
    fn test_reorder_rejects_non_permutation() {
        let mut list = list(&["a", "b", "c"]);
        assert!(list.reorder(&[0, 0, 1]).is_err());
        assert!(list.reorder(&[0, 1]).is_err());
        assert!(list.reorder(&[0, 1, 3]).is_err());
        assert_eq!(uids(&list), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_subscription_respects_mask() {
        let mut list = list(&["1"]);
        let mut sub = list.subscribe(EventMask::INSERTED);
        list.remove(0).unwrap();
        let row = list.push(header("2"));
        assert_eq!(sub.try_next(), Some(ListEvent::Inserted { index: 0, row }));
        assert_eq!(sub.try_next(), None);

        assert!(list.set_mask(sub.id(), EventMask::all()));
        list.reorder(&[0]).unwrap();
        assert_eq!(sub.try_next(), Some(ListEvent::Reordered));
    }

    #[test]
    fn test_events_arrive_in_emit_order() {
        let mut list = list(&["1", "2"]);
        let mut sub = list.subscribe(EventMask::all());
        let removed_row = list.row_at(0).unwrap();
        list.remove(0).unwrap();
        list.set_flags(0, HeaderFlags::SEEN).unwrap();
        list.reorder(&[0]).unwrap();

        assert!(matches!(
            sub.try_next(),
            Some(ListEvent::Removed { index: 0, row }) if row == removed_row
        ));
        assert!(matches!(sub.try_next(), Some(ListEvent::RowChanged { index: 0, .. })));
        assert_eq!(sub.try_next(), Some(ListEvent::Reordered));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_dropped_subscriptions_are_pruned() {
        let mut list = list(&["1"]);
        let sub = list.subscribe(EventMask::INSERTED);
        let _kept = list.subscribe(EventMask::REMOVED);
        assert_eq!(list.subscriber_count(), 2);
        drop(sub);
        list.push(header("2"));
        assert_eq!(list.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_recv_waits_for_events_and_ends_with_list() {
        let mut list = list(&["1"]);
        let mut sub = list.subscribe(EventMask::REORDERED);
        list.reorder(&[0]).unwrap();
        assert_eq!(sub.recv().await, Some(ListEvent::Reordered));
        drop(list);
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_set_flags_changes_shared_header() {
        let mut list = list(&["1"]);
        let header = Rc::clone(list.get(0).unwrap());
        list.set_flags(0, HeaderFlags::DELETED).unwrap();
        assert!(header.is_deleted());
    }
}
