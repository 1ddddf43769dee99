//! Fetch state machine.
//!
//! ```text
//! Idle -> CheckingCache -(cached)----------------------------------> Fetching
//!                       -> CheckingConnectivity -(online)----------> Fetching
//!                                               -> ConfirmingDownload -> Connecting -> Fetching
//! Fetching -> Resolved | Failed | Canceled
//! ```
//!
//! Both suspension points (the prompt and the transport) race against the
//! window's cancellation token.

use std::cell::Cell;
use std::rc::Rc;

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::mail::types::{HeaderFlags, HeaderRef};
use crate::model::{HeaderList, RowReference};
use crate::nav::cursor::CursorTracker;

use super::registry::InUseGuard;
use super::{
    CancelReason, ConnectResult, FetchOutcome, FetchRequest, FetchService, FetchState,
    FetchTarget, HeaderRegistry, RetrievalPrompt, WindowId,
};

pub struct FetchCoordinator {
    window: WindowId,
    service: Rc<dyn FetchService>,
    prompt: Rc<dyn RetrievalPrompt>,
    registry: Rc<dyn HeaderRegistry>,
    confirm_offline_download: bool,
    state: Cell<FetchState>,
}

/// Effects of applying a resolved fetch to the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The header was unseen and is now marked seen
    pub newly_seen: bool,
    /// Row the cursor is now bound to, if the target still resolves
    pub bound: Option<RowReference>,
}

impl FetchCoordinator {
    pub fn new(
        window: WindowId,
        service: Rc<dyn FetchService>,
        prompt: Rc<dyn RetrievalPrompt>,
        registry: Rc<dyn HeaderRegistry>,
        confirm_offline_download: bool,
    ) -> Self {
        Self {
            window,
            service,
            prompt,
            registry,
            confirm_offline_download,
            state: Cell::new(FetchState::Idle),
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn state(&self) -> FetchState {
        self.state.get()
    }

    fn transition(&self, next: FetchState) {
        let prev = self.state.replace(next);
        if prev != next {
            tracing::trace!("Fetch state {:?} -> {:?}", prev, next);
        }
    }

    /// Drive a request to its outcome.
    ///
    /// The in-use registration is taken before anything else and released
    /// when this returns, whatever the outcome. Nothing here touches the
    /// cursor; see [`FetchCoordinator::complete`].
    pub async fn resolve(
        &self,
        request: &FetchRequest,
        closed: &CancellationToken,
    ) -> FetchOutcome {
        let uid = request.target.uid();
        if closed.is_cancelled() {
            self.transition(FetchState::Canceled);
            return FetchOutcome::Canceled(CancelReason::WindowClosed);
        }
        if let Some(owner) = self.registry.find_in_use(uid)
            && owner != self.window
        {
            tracing::info!("Message {} already in use by window {}", uid, owner);
            self.transition(FetchState::Failed);
            return FetchOutcome::Failed(FetchError::InUse { window: owner });
        }

        let _guard = InUseGuard::register(Rc::clone(&self.registry), uid, self.window);
        let outcome = self.drive(&request.target, closed).await;
        self.transition(match &outcome {
            FetchOutcome::Resolved { .. } => FetchState::Resolved,
            FetchOutcome::Canceled(_) => FetchState::Canceled,
            FetchOutcome::Failed(_) => FetchState::Failed,
        });
        match &outcome {
            FetchOutcome::Resolved { .. } => tracing::debug!("Fetched message {}", uid),
            FetchOutcome::Canceled(reason) => {
                tracing::debug!("Fetch of {} canceled: {}", uid, reason)
            }
            FetchOutcome::Failed(e) => tracing::warn!("Fetch of {} failed: {}", uid, e),
        }
        outcome
    }

    async fn drive(&self, target: &FetchTarget, closed: &CancellationToken) -> FetchOutcome {
        self.transition(FetchState::CheckingCache);
        let cached =
            target.header().is_some_and(|h| h.is_cached()) || self.service.is_cached(target);

        if !cached {
            self.transition(FetchState::CheckingConnectivity);
            if !self.service.is_online() {
                if self.confirm_offline_download {
                    self.transition(FetchState::ConfirmingDownload);
                    let confirmed = tokio::select! {
                        biased;
                        _ = closed.cancelled() => {
                            return FetchOutcome::Canceled(CancelReason::WindowClosed);
                        }
                        answer = self.prompt.confirm_retrieval(target) => answer,
                    };
                    if !confirmed {
                        return FetchOutcome::Canceled(CancelReason::UserDeclined);
                    }
                }

                self.transition(FetchState::Connecting);
                let connected = tokio::select! {
                    biased;
                    _ = closed.cancelled() => {
                        return FetchOutcome::Canceled(CancelReason::WindowClosed);
                    }
                    result = self.service.connect() => result,
                };
                match connected {
                    ConnectResult::Connected => {}
                    ConnectResult::Failed(e) => {
                        return FetchOutcome::Failed(FetchError::Connection(e));
                    }
                    ConnectResult::Canceled => {
                        return FetchOutcome::Canceled(CancelReason::ConnectionDismissed);
                    }
                }
            }
        }

        self.transition(FetchState::Fetching);
        let result = tokio::select! {
            biased;
            _ = closed.cancelled() => {
                return FetchOutcome::Canceled(CancelReason::WindowClosed);
            }
            result = self.service.fetch(target) => result,
        };

        match result {
            Ok(message) => {
                let header = match target {
                    FetchTarget::Header(header) => Rc::clone(header),
                    FetchTarget::Uid { .. } => Rc::clone(&message.header),
                };
                FetchOutcome::Resolved { message, header }
            }
            Err(e) => FetchOutcome::Failed(e),
        }
    }

    /// Apply a resolved fetch: mark the header seen, move the cursor to the
    /// request's row and recompute its successor.
    ///
    /// `list` is the model currently in view. The request's row is checked
    /// again here since the list may have changed while the fetch was
    /// suspended; a stale row leaves the cursor unbound. Bare-uid requests
    /// are looked up by uid instead.
    pub fn complete(
        &self,
        header: &HeaderRef,
        request: &FetchRequest,
        tracker: &mut CursorTracker,
        list: Option<&HeaderList>,
    ) -> Completion {
        let newly_seen = !header.is_seen();
        if newly_seen {
            header.insert_flag(HeaderFlags::SEEN);
        }

        let row = list.and_then(|list| match request.row {
            Some(row) => row.valid(list).then_some(row),
            None => list
                .find_uid(&header.uid)
                .and_then(|idx| RowReference::create(list, idx)),
        });

        match (row, list) {
            (Some(row), Some(list)) => tracker.bind(list, row),
            _ => {
                if request.row.is_some() {
                    tracing::debug!("Row for {} went stale during fetch", header.uid);
                }
                tracker.clear();
            }
        }

        Completion {
            newly_seen,
            bound: tracker.current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use async_trait::async_trait;

    use crate::fetch::{FixedAnswer, InUseRegistry};
    use crate::mail::types::{FolderId, Header, Message, MessageBody, MessageUid};
    use crate::nav::visibility::Visibility;

    #[derive(Default)]
    struct Service {
        online: bool,
        cached: bool,
        connect: Option<ConnectResult>,
        fail_with: Option<FetchError>,
        calls: RefCell<Vec<&'static str>>,
    }

    #[async_trait(?Send)]
    impl FetchService for Service {
        async fn fetch(&self, target: &FetchTarget) -> Result<Message, FetchError> {
            self.calls.borrow_mut().push("fetch");
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            let header = match target {
                FetchTarget::Header(h) => Rc::clone(h),
                FetchTarget::Uid { folder, uid } => {
                    Header::new(uid.clone(), folder.clone(), "fetched").into_ref()
                }
            };
            Ok(Message {
                header,
                body: MessageBody::plain("body"),
            })
        }

        fn is_cached(&self, _target: &FetchTarget) -> bool {
            self.cached
        }

        fn is_online(&self) -> bool {
            self.online
        }

        async fn connect(&self) -> ConnectResult {
            self.calls.borrow_mut().push("connect");
            self.connect.clone().unwrap_or(ConnectResult::Connected)
        }
    }

    fn coordinator(
        service: Service,
        answer: bool,
    ) -> (FetchCoordinator, Rc<Service>, Rc<InUseRegistry>) {
        let service = Rc::new(service);
        let registry = Rc::new(InUseRegistry::new());
        let coord = FetchCoordinator::new(
            WindowId(1),
            service.clone(),
            Rc::new(FixedAnswer(answer)),
            registry.clone(),
            true,
        );
        (coord, service, registry)
    }

    fn request(uid: &str, flags: HeaderFlags) -> FetchRequest {
        let header = Header::new(MessageUid::new(uid), FolderId::new("INBOX"), "s")
            .with_flags(flags)
            .into_ref();
        FetchRequest::new(FetchTarget::Header(header), None)
    }

    #[tokio::test]
    async fn test_cached_header_skips_connectivity() {
        let (coord, service, registry) = coordinator(Service::default(), false);
        let outcome = coord
            .resolve(&request("1", HeaderFlags::CACHED), &CancellationToken::new())
            .await;
        assert!(outcome.is_resolved());
        assert_eq!(*service.calls.borrow(), vec!["fetch"]);
        assert_eq!(coord.state(), FetchState::Resolved);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_online_fetches_directly() {
        let (coord, service, _) = coordinator(
            Service {
                online: true,
                ..Default::default()
            },
            false,
        );
        let outcome = coord
            .resolve(&request("1", HeaderFlags::empty()), &CancellationToken::new())
            .await;
        assert!(outcome.is_resolved());
        assert_eq!(*service.calls.borrow(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_offline_declined() {
        let (coord, service, registry) = coordinator(Service::default(), false);
        let outcome = coord
            .resolve(&request("1", HeaderFlags::empty()), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, FetchOutcome::Canceled(CancelReason::UserDeclined)));
        assert!(service.calls.borrow().is_empty());
        assert_eq!(coord.state(), FetchState::Canceled);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_offline_accepted_connects_then_fetches() {
        let (coord, service, _) = coordinator(Service::default(), true);
        let outcome = coord
            .resolve(&request("1", HeaderFlags::empty()), &CancellationToken::new())
            .await;
        assert!(outcome.is_resolved());
        assert_eq!(*service.calls.borrow(), vec!["connect", "fetch"]);
    }

    #[tokio::test]
    async fn test_connect_failure_and_dismissal() {
        let (coord, _, registry) = coordinator(
            Service {
                connect: Some(ConnectResult::Failed("no route".into())),
                ..Default::default()
            },
            true,
        );
        let outcome = coord
            .resolve(&request("1", HeaderFlags::empty()), &CancellationToken::new())
            .await;
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FetchError::Connection(ref e)) if e == "no route"
        ));
        assert!(registry.is_empty());

        let (coord, _, _) = coordinator(
            Service {
                connect: Some(ConnectResult::Canceled),
                ..Default::default()
            },
            true,
        );
        let outcome = coord
            .resolve(&request("1", HeaderFlags::empty()), &CancellationToken::new())
            .await;
        assert!(matches!(
            outcome,
            FetchOutcome::Canceled(CancelReason::ConnectionDismissed)
        ));
    }

    #[tokio::test]
    async fn test_transport_error_releases_registration() {
        let (coord, _, registry) = coordinator(
            Service {
                online: true,
                fail_with: Some(FetchError::Transport("reset".into())),
                ..Default::default()
            },
            true,
        );
        let outcome = coord
            .resolve(&request("1", HeaderFlags::empty()), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Transport(_))));
        assert_eq!(coord.state(), FetchState::Failed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_in_use_elsewhere() {
        let (coord, service, registry) = coordinator(
            Service {
                online: true,
                ..Default::default()
            },
            true,
        );
        registry.register_in_use(&MessageUid::new("1"), WindowId(9));
        let outcome = coord
            .resolve(&request("1", HeaderFlags::empty()), &CancellationToken::new())
            .await;
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FetchError::InUse { window: WindowId(9) })
        ));
        assert!(service.calls.borrow().is_empty());
        assert_eq!(registry.find_in_use(&MessageUid::new("1")), Some(WindowId(9)));
    }

    #[tokio::test]
    async fn test_closed_window_short_circuits() {
        let (coord, service, registry) = coordinator(Service::default(), true);
        let closed = CancellationToken::new();
        closed.cancel();
        let outcome = coord.resolve(&request("1", HeaderFlags::CACHED), &closed).await;
        assert!(matches!(outcome, FetchOutcome::Canceled(CancelReason::WindowClosed)));
        assert!(service.calls.borrow().is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_uid_target_resolves_to_fetched_header() {
        let (coord, _, _) = coordinator(
            Service {
                online: true,
                ..Default::default()
            },
            true,
        );
        let req = FetchRequest::new(
            FetchTarget::Uid {
                folder: FolderId::new("INBOX"),
                uid: MessageUid::new("42"),
            },
            None,
        );
        let outcome = coord.resolve(&req, &CancellationToken::new()).await;
        assert_eq!(outcome.uid(), Some(&MessageUid::new("42")));
    }

    #[test]
    fn test_complete_marks_seen_and_binds() {
        let (coord, _, _) = coordinator(Service::default(), true);
        let list = HeaderList::from_headers(
            FolderId::new("INBOX"),
            ["1", "2"].iter().map(|u| {
                Header::new(MessageUid::new(*u), FolderId::new("INBOX"), "s").into_ref()
            }),
        );
        let header = Rc::clone(list.get(0).unwrap());
        let row = RowReference::create(&list, 0);
        let req = FetchRequest::new(FetchTarget::Header(Rc::clone(&header)), row);
        let mut tracker = CursorTracker::new(Visibility::plain(), true);

        let done = coord.complete(&header, &req, &mut tracker, Some(&list));
        assert!(done.newly_seen);
        assert!(header.is_seen());
        assert_eq!(done.bound, row);
        assert_eq!(tracker.next(), RowReference::create(&list, 1));

        let again = coord.complete(&header, &req, &mut tracker, Some(&list));
        assert!(!again.newly_seen);
    }

    #[test]
    fn test_complete_with_stale_row_unbinds() {
        let (coord, _, _) = coordinator(Service::default(), true);
        let mut list = HeaderList::from_headers(
            FolderId::new("INBOX"),
            ["1", "2"].iter().map(|u| {
                Header::new(MessageUid::new(*u), FolderId::new("INBOX"), "s").into_ref()
            }),
        );
        let header = Rc::clone(list.get(0).unwrap());
        let req = FetchRequest::new(
            FetchTarget::Header(Rc::clone(&header)),
            RowReference::create(&list, 0),
        );
        let mut tracker = CursorTracker::new(Visibility::plain(), true);
        tracker.bind(&list, RowReference::create(&list, 1).unwrap());

        list.remove(0).unwrap();
        let done = coord.complete(&header, &req, &mut tracker, Some(&list));
        assert_eq!(done.bound, None);
        assert!(!tracker.is_bound());
        assert!(tracker.next().is_none());
    }
}
