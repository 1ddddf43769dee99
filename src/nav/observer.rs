//! Keeps the cursor consistent with a list it does not own.
//!
//! Binding is two-phase: until the displayed header shows up in the model,
//! only insertions are observed. Once bound, removals, row changes and
//! reorders are observed too.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::mail::types::{FolderId, MessageUid};
use crate::model::{
    EventMask, HeaderList, ListEvent, ModelId, RowId, RowReference, SharedHeaderList,
    Subscription,
};

use super::cursor::CursorTracker;

/// Outcome of handling one list event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing relevant changed
    Ignored,
    /// The displayed header appeared in the model and the cursor is now bound to it
    Bound(RowReference),
    /// Navigation availability may have changed
    DimmingChanged,
    /// The precomputed successor was replaced
    NextRecomputed(Option<RowReference>),
    /// The cursor lost its row; no replacement was guessed
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInsert,
    Attached,
}

#[derive(Debug)]
pub struct ModelChangeObserver {
    model: Weak<RefCell<HeaderList>>,
    model_id: ModelId,
    folder: FolderId,
    subscription: Option<Subscription>,
    phase: Phase,
}

impl ModelChangeObserver {
    /// Observe everything on a model the cursor is already bound to
    pub fn attach(model: &SharedHeaderList) -> Self {
        Self::subscribe(model, Phase::Attached)
    }

    /// Observe only insertions until the displayed header appears
    pub fn await_insert(model: &SharedHeaderList) -> Self {
        Self::subscribe(model, Phase::AwaitingInsert)
    }

    fn subscribe(model: &SharedHeaderList, phase: Phase) -> Self {
        let mut list = model.borrow_mut();
        let mask = match phase {
            Phase::AwaitingInsert => EventMask::INSERTED,
            Phase::Attached => EventMask::all(),
        };
        let subscription = list.subscribe(mask);
        tracing::debug!("Observing {} ({}) with {:?}", list.id(), list.folder(), mask);
        Self {
            model: Rc::downgrade(model),
            model_id: list.id(),
            folder: list.folder().clone(),
            subscription: Some(subscription),
            phase,
        }
    }

    pub fn model(&self) -> Option<SharedHeaderList> {
        self.model.upgrade()
    }

    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn folder(&self) -> &FolderId {
        &self.folder
    }

    pub fn is_attached(&self) -> bool {
        self.phase == Phase::Attached && self.subscription.is_some()
    }

    pub fn is_awaiting_insert(&self) -> bool {
        self.phase == Phase::AwaitingInsert && self.subscription.is_some()
    }

    pub fn poll_event(&mut self) -> Option<ListEvent> {
        self.subscription.as_mut().and_then(|s| s.try_next())
    }

    /// Stop observing the model
    pub fn detach(&mut self) {
        // If the list is busy the closed channel is pruned on its next emit
        if let Some(sub) = self.subscription.take()
            && let Some(model) = self.model.upgrade()
            && let Ok(mut list) = model.try_borrow_mut()
        {
            list.unsubscribe(sub.id());
        }
    }

    /// Bind immediately if `uid` is already present in the model. Used right
    /// after subscribing to a replacement model.
    pub fn bind_existing(
        &mut self,
        tracker: &mut CursorTracker,
        uid: &MessageUid,
    ) -> Option<RowReference> {
        let model = self.model.upgrade()?;
        let list = model.borrow();
        let row = list
            .find_uid(uid)
            .and_then(|idx| RowReference::create(&list, idx))?;
        drop(list);
        self.complete_binding(&model, tracker, row);
        Some(row)
    }

    pub fn handle(
        &mut self,
        event: ListEvent,
        tracker: &mut CursorTracker,
        displayed: Option<&MessageUid>,
    ) -> Reaction {
        let Some(model) = self.model.upgrade() else {
            tracing::debug!("Observed model {} is gone, detaching cursor", self.model_id);
            self.subscription = None;
            tracker.clear();
            return Reaction::Detached;
        };

        match event {
            ListEvent::Inserted { row, .. } => self.on_inserted(&model, row, tracker, displayed),
            ListEvent::Removed { .. } | ListEvent::RowChanged { .. } => Reaction::DimmingChanged,
            ListEvent::Reordered => self.on_reordered(&model, tracker),
        }
    }

    fn on_inserted(
        &mut self,
        model: &SharedHeaderList,
        row: RowId,
        tracker: &mut CursorTracker,
        displayed: Option<&MessageUid>,
    ) -> Reaction {
        if tracker.is_bound() {
            return Reaction::DimmingChanged;
        }
        let Some(displayed) = displayed else {
            return Reaction::Ignored;
        };

        // The row may have moved or vanished since the event was queued
        let list = model.borrow();
        let Some(index) = list.position_of(row) else {
            return Reaction::Ignored;
        };
        if list.uid_at(index) != Some(displayed) {
            return Reaction::Ignored;
        }
        let Some(reference) = RowReference::create(&list, index) else {
            return Reaction::Ignored;
        };
        drop(list);

        self.complete_binding(model, tracker, reference);
        Reaction::Bound(reference)
    }

    fn complete_binding(
        &mut self,
        model: &SharedHeaderList,
        tracker: &mut CursorTracker,
        row: RowReference,
    ) {
        let mut list = model.borrow_mut();
        tracker.bind(&list, row);
        if let Some(sub) = &self.subscription {
            list.set_mask(sub.id(), EventMask::all());
        }
        self.phase = Phase::Attached;
        tracing::debug!("Cursor bound in {}", self.model_id);
    }

    fn on_reordered(&mut self, model: &SharedHeaderList, tracker: &mut CursorTracker) -> Reaction {
        let Some(current) = tracker.current() else {
            return Reaction::Ignored;
        };
        let list = model.borrow();
        if !current.valid(&list) {
            tracing::debug!("Current row vanished before reorder, detaching cursor");
            tracker.clear();
            return Reaction::Detached;
        }

        let expected = tracker.successor_of(&list, &current);
        if tracker.next() == expected {
            return Reaction::DimmingChanged;
        }
        tracker.set_next(expected);
        tracing::trace!("Successor recomputed after reorder");
        Reaction::NextRecomputed(expected)
    }
}

impl Drop for ModelChangeObserver {
    fn drop(&mut self) {
        self.detach();
    }
}
