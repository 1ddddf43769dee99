//! Public navigation surface for a message window.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::fetch::{
    CancelReason, FetchCoordinator, FetchOutcome, FetchRequest, FetchService, FetchState,
    FetchTarget, HeaderRegistry, RetrievalPrompt, WindowId,
};
use crate::mail::types::{FolderId, HeaderRef, MessageUid};
use crate::model::{EventMask, ListEvent, ModelId, RowReference, SharedHeaderList, Subscription};

use super::cursor::{CursorState, CursorTracker};
use super::observer::{ModelChangeObserver, Reaction};
use super::visibility::{SendQueueStatus, Visibility};

/// What a window can be asked to open
pub type OpenTarget = FetchTarget;

/// Notifications for the window hosting the facade
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavEvent {
    /// A fetch started; the window may show a progress title
    Fetching { uid: MessageUid },
    /// A new message is displayed
    MessageChanged {
        model: Option<ModelId>,
        row: Option<RowReference>,
        uid: MessageUid,
    },
    /// A fetch was declined or failed; restore the previous title
    FetchAbandoned { uid: MessageUid },
    ReadStateChanged { uid: MessageUid, seen: bool },
    /// Recheck next/previous availability
    DimmingChanged,
    CursorBound { row: RowReference },
    CursorDetached,
}

/// Collaborators injected into each facade
#[derive(Clone)]
pub struct NavServices {
    pub fetch: Rc<dyn FetchService>,
    pub prompt: Rc<dyn RetrievalPrompt>,
    pub registry: Rc<dyn HeaderRegistry>,
    pub send_queue: Rc<dyn SendQueueStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacadeOptions {
    pub outbox_context: bool,
    pub cycle_next: bool,
    pub confirm_offline_download: bool,
}

impl Default for FacadeOptions {
    fn default() -> Self {
        Self {
            outbox_context: false,
            cycle_next: true,
            confirm_offline_download: true,
        }
    }
}

impl FacadeOptions {
    /// Options for a window opened on `folder`
    pub fn from_config(config: &Config, folder: &FolderId) -> Self {
        Self {
            outbox_context: folder.matches(&FolderId::new(&config.navigation.outbox_folder)),
            cycle_next: config.navigation.cycle_next,
            confirm_offline_download: config.fetch.confirm_offline_download,
        }
    }
}

pub struct NavigationFacade {
    coordinator: FetchCoordinator,
    tracker: RefCell<CursorTracker>,
    observer: RefCell<Option<ModelChangeObserver>>,
    /// Signalled whenever the observed model changes
    observer_changed: Notify,
    displayed: RefCell<Option<HeaderRef>>,
    /// Bumped per fetch; a completion whose generation is behind was superseded
    generation: Cell<u64>,
    closed: CancellationToken,
    events: mpsc::UnboundedSender<NavEvent>,
}

impl NavigationFacade {
    pub fn new(
        window: WindowId,
        services: NavServices,
        options: FacadeOptions,
    ) -> (Self, mpsc::UnboundedReceiver<NavEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let visibility = Visibility::new(options.outbox_context, services.send_queue);
        let facade = Self {
            coordinator: FetchCoordinator::new(
                window,
                services.fetch,
                services.prompt,
                services.registry,
                options.confirm_offline_download,
            ),
            tracker: RefCell::new(CursorTracker::new(visibility, options.cycle_next)),
            observer: RefCell::new(None),
            observer_changed: Notify::new(),
            displayed: RefCell::new(None),
            generation: Cell::new(0),
            closed: CancellationToken::new(),
            events,
        };
        (facade, event_rx)
    }

    pub fn window(&self) -> WindowId {
        self.coordinator.window()
    }

    pub fn fetch_state(&self) -> FetchState {
        self.coordinator.state()
    }

    pub fn cursor(&self) -> CursorState {
        self.tracker.borrow().state().clone()
    }

    pub fn displayed(&self) -> Option<HeaderRef> {
        self.displayed.borrow().clone()
    }

    /// The model the cursor observes, if it is still alive
    pub fn model(&self) -> Option<SharedHeaderList> {
        self.observer.borrow().as_ref().and_then(|o| o.model())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Open a header (or bare uid). With `source`, the cursor binds to that
    /// row of that model once the message is fetched.
    pub async fn open(
        &self,
        target: OpenTarget,
        source: Option<(SharedHeaderList, RowReference)>,
    ) -> FetchOutcome {
        self.process_model_events();
        let (model, row) = match source {
            Some((model, row)) => (Some(model), Some(row)),
            None => (None, None),
        };
        self.run(FetchRequest::new(target, row), model).await
    }

    /// Fetch the precomputed successor. `None` if there is nothing to go to.
    pub async fn next(&self) -> Option<FetchOutcome> {
        self.process_model_events();
        let (model, row, header) = self.next_target()?;
        Some(
            self.run(FetchRequest::new(FetchTarget::Header(header), Some(row)), Some(model))
                .await,
        )
    }

    /// Walk backward from the cursor, fetching each visible header until one
    /// resolves or is canceled. `None` if there was no candidate at all.
    pub async fn previous(&self) -> Option<FetchOutcome> {
        self.process_model_events();
        let model = self.model()?;
        let mut from = self.tracker.borrow().current()?;
        let mut last_failure = None;

        loop {
            let candidate = {
                let list = model.borrow();
                let tracker = self.tracker.borrow();
                tracker
                    .predecessor_of(&list, &from)
                    .and_then(|row| row.header(&list).ok().map(|h| (row, Rc::clone(h))))
            };
            let Some((row, header)) = candidate else {
                break;
            };

            let request = FetchRequest::new(FetchTarget::Header(header), Some(row));
            let generation = self.generation.get() + 1;
            match self.run(request, Some(Rc::clone(&model))).await {
                FetchOutcome::Failed(_) if self.generation.get() != generation => {
                    tracing::debug!("Previous scan overtaken by a newer request");
                    return Some(FetchOutcome::Canceled(CancelReason::Superseded));
                }
                FetchOutcome::Failed(e) => {
                    tracing::debug!("Previous candidate failed ({}), trying further back", e);
                    from = row;
                    last_failure = Some(FetchOutcome::Failed(e));
                }
                outcome => return Some(outcome),
            }
        }
        last_failure
    }

    /// Fetch the displayed message again, keeping the cursor's row
    pub async fn reload(&self) -> Option<FetchOutcome> {
        self.process_model_events();
        let header = self.displayed()?;
        let row = self.tracker.borrow().current();
        Some(
            self.run(FetchRequest::new(FetchTarget::Header(header), row), None)
                .await,
        )
    }

    pub fn is_first(&self) -> bool {
        self.process_model_events();
        match self.model() {
            Some(model) => self.tracker.borrow().is_first(&model.borrow()),
            None => true,
        }
    }

    pub fn is_last(&self) -> bool {
        self.process_model_events();
        match self.model() {
            Some(model) => self.tracker.borrow().is_last(&model.borrow()),
            None => true,
        }
    }

    /// The list view switched to a different model instance.
    ///
    /// A model for another folder detaches the cursor for as long as the
    /// current message stays displayed. A fresh model for the displayed
    /// message's folder replaces the observed one: the cursor is released and
    /// re-bound when the displayed header appears in it.
    pub fn on_model_replaced(&self, model: &SharedHeaderList) {
        let Some(displayed) = self.displayed() else {
            return;
        };
        let (new_id, related) = {
            let list = model.borrow();
            (list.id(), list.folder().matches(&displayed.folder))
        };
        if self
            .observer
            .borrow()
            .as_ref()
            .is_some_and(|o| o.model_id() == new_id)
        {
            return;
        }

        let was_bound = self.tracker.borrow().is_bound();
        self.set_observer(None);
        self.tracker.borrow_mut().clear();
        if was_bound {
            self.emit(NavEvent::CursorDetached);
        }
        if !related {
            tracing::debug!("{} shows another folder, navigation detached", new_id);
            self.emit(NavEvent::DimmingChanged);
            return;
        }

        let mut observer = ModelChangeObserver::await_insert(model);
        let bound = observer.bind_existing(&mut self.tracker.borrow_mut(), &displayed.uid);
        self.set_observer(Some(observer));

        match bound {
            Some(row) => self.emit(NavEvent::CursorBound { row }),
            None => tracing::debug!("Waiting for {} to appear in {}", displayed.uid, new_id),
        }
        self.emit(NavEvent::DimmingChanged);
    }

    /// Apply queued list events in order. Returns how many were handled.
    pub fn process_model_events(&self) -> usize {
        let displayed = self.displayed.borrow().as_ref().map(|h| h.uid.clone());
        let mut observer = self.observer.borrow_mut();
        let Some(observer) = observer.as_mut() else {
            return 0;
        };
        let mut tracker = self.tracker.borrow_mut();

        let mut handled = 0;
        while let Some(event) = observer.poll_event() {
            handled += 1;
            match observer.handle(event, &mut tracker, displayed.as_ref()) {
                Reaction::Ignored => {}
                Reaction::Bound(row) => {
                    self.emit(NavEvent::CursorBound { row });
                    self.emit(NavEvent::DimmingChanged);
                }
                Reaction::DimmingChanged | Reaction::NextRecomputed(_) => {
                    self.emit(NavEvent::DimmingChanged);
                }
                Reaction::Detached => self.emit(NavEvent::CursorDetached),
            }
        }
        handled
    }

    /// Handle list events as they arrive until the window closes.
    ///
    /// Meant to run next to the window's other work, e.g. in a `select!` or
    /// on a `LocalSet`. Follows the observed model across replacements.
    pub async fn watch_model(&self) {
        let mut wake: Option<Subscription> = None;
        let mut watching = None;

        loop {
            let observed = self.model();
            let observed_id = observed.as_ref().map(|m| m.borrow().id());
            if observed_id != watching {
                wake = observed
                    .as_ref()
                    .map(|m| m.borrow_mut().subscribe(EventMask::all()));
                watching = observed_id;
                // Anything queued before the wake subscription existed
                self.process_model_events();
            }

            let event = tokio::select! {
                biased;
                _ = self.closed.cancelled() => break,
                _ = self.observer_changed.notified() => continue,
                event = next_wake(&mut wake) => event,
            };
            if event.is_none() {
                tracing::debug!("Observed model dropped");
                wake = None;
            }
            self.process_model_events();
        }
        tracing::debug!("Stopped watching model for window {}", self.window());
    }

    /// The window is going away. Pending fetches resolve as canceled and
    /// only run their cleanup.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        tracing::info!("Window {} closed", self.window());
        self.closed.cancel();
        self.set_observer(None);
        self.tracker.borrow_mut().clear();
    }

    fn set_observer(&self, observer: Option<ModelChangeObserver>) {
        *self.observer.borrow_mut() = observer;
        self.observer_changed.notify_one();
    }

    fn next_target(&self) -> Option<(SharedHeaderList, RowReference, HeaderRef)> {
        let next = self.tracker.borrow().next()?;
        let model = self.model()?;

        let header = {
            let list = model.borrow();
            let header = next.header(&list).ok().map(Rc::clone);
            if header.is_none() {
                tracing::debug!("Successor went stale, recomputing");
                self.tracker.borrow_mut().recompute_next(&list);
            }
            header
        };
        match header {
            Some(header) => Some((model, next, header)),
            None => {
                self.emit(NavEvent::DimmingChanged);
                None
            }
        }
    }

    async fn run(&self, request: FetchRequest, model: Option<SharedHeaderList>) -> FetchOutcome {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let uid = request.target.uid().clone();
        self.emit(NavEvent::Fetching { uid: uid.clone() });

        let outcome = match self.coordinator.resolve(&request, &self.closed).await {
            FetchOutcome::Resolved { .. } if self.closed.is_cancelled() => {
                FetchOutcome::Canceled(CancelReason::WindowClosed)
            }
            FetchOutcome::Resolved { .. } if self.generation.get() != generation => {
                tracing::debug!("Fetch of {} superseded, dropping result", uid);
                FetchOutcome::Canceled(CancelReason::Superseded)
            }
            outcome => outcome,
        };

        match &outcome {
            FetchOutcome::Resolved { header, .. } => self.apply(header, &request, model),
            FetchOutcome::Canceled(CancelReason::WindowClosed | CancelReason::Superseded) => {}
            FetchOutcome::Canceled(_) | FetchOutcome::Failed(_) => {
                self.emit(NavEvent::FetchAbandoned { uid });
            }
        }
        outcome
    }

    fn apply(&self, header: &HeaderRef, request: &FetchRequest, source: Option<SharedHeaderList>) {
        let model = source.or_else(|| {
            self.model()
                .filter(|m| m.borrow().folder().matches(&header.folder))
        });

        let completion = {
            let mut tracker = self.tracker.borrow_mut();
            let list = model.as_ref().map(|m| m.borrow());
            self.coordinator
                .complete(header, request, &mut tracker, list.as_deref())
        };
        *self.displayed.borrow_mut() = Some(Rc::clone(header));

        match (&model, completion.bound) {
            (Some(model), Some(_)) => {
                let id = model.borrow().id();
                let keep = self
                    .observer
                    .borrow()
                    .as_ref()
                    .is_some_and(|o| o.model_id() == id && o.is_attached());
                if !keep {
                    self.set_observer(Some(ModelChangeObserver::attach(model)));
                }
            }
            (Some(model), None) => {
                self.set_observer(Some(ModelChangeObserver::await_insert(model)));
            }
            (None, _) => self.set_observer(None),
        }

        if completion.newly_seen {
            self.emit(NavEvent::ReadStateChanged {
                uid: header.uid.clone(),
                seen: true,
            });
        }
        self.emit(NavEvent::MessageChanged {
            model: model.as_ref().map(|m| m.borrow().id()),
            row: completion.bound,
            uid: header.uid.clone(),
        });
    }

    fn emit(&self, event: NavEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Navigation event receiver dropped");
        }
    }
}

async fn next_wake(wake: &mut Option<Subscription>) -> Option<ListEvent> {
    match wake {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

impl Drop for NavigationFacade {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
