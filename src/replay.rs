//! Scripted navigation sessions.
//!
//! A scenario file lists the messages in one folder and a sequence of steps
//! acting on a single message window and the list view behind it:
//!
//! ```toml
//! folder = "INBOX"
//!
//! [[messages]]
//! uid = "1"
//! folder = "INBOX"
//! subject = "Welcome"
//!
//! [[steps]]
//! action = "open"
//! uid = "1"
//!
//! [[steps]]
//! action = "next"
//! ```

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::constants::REPLAY_WINDOW_ID;
use crate::fetch::{FetchOutcome, FetchTarget, InUseRegistry, RetrievalPrompt, WindowId};
use crate::mail::types::{FolderId, HeaderFlags, HeaderRef, MessageUid};
use crate::model::{HeaderList, RowReference, SharedHeaderList};
use crate::nav::{FacadeOptions, NavEvent, NavServices, NavigationFacade, NoSendQueue, OpenTarget};
use crate::store::{StoreHandle, StoredMessage, spawn_store_actor};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_folder")]
    pub folder: FolderId,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_folder() -> FolderId {
    FolderId::new("INBOX")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Open the row with this uid, or the bare uid if it is not listed
    Open { uid: String },
    Next,
    Previous,
    Reload,
    /// New mail arrives; appended unless `index` is given
    Insert {
        uid: String,
        #[serde(default)]
        subject: String,
        index: Option<usize>,
        #[serde(default)]
        cached: bool,
    },
    Remove { uid: String },
    /// `order[i]` is the old index of the row that ends up at `i`
    Reorder { order: Vec<usize> },
    Flag {
        uid: String,
        deleted: Option<bool>,
        seen: Option<bool>,
    },
    Offline,
    Online,
    /// Connection attempts fail until the next `online`
    Unreachable,
    /// Answer given to "Retrieve this message now?"
    Answer { confirm: bool },
    /// The list view switches to a new model instance
    ReplaceModel {
        folder: Option<String>,
        #[serde(default)]
        empty: bool,
    },
    Close,
    Status,
}

impl Scenario {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse scenario")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario: {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("In {}", path.display()))
    }
}

/// Prompt answered by `answer` steps
struct ScriptedPrompt {
    answer: Cell<bool>,
}

#[async_trait(?Send)]
impl RetrievalPrompt for ScriptedPrompt {
    async fn confirm_retrieval(&self, target: &FetchTarget) -> bool {
        let answer = self.answer.get();
        tracing::debug!("Retrieve {} now? {}", target.uid(), if answer { "yes" } else { "no" });
        answer
    }
}

/// Live state of a replay: the list view's model, the store and one window
pub struct Replay {
    folder: FolderId,
    list: SharedHeaderList,
    store: Rc<StoreHandle>,
    prompt: Rc<ScriptedPrompt>,
    facade: NavigationFacade,
    events: mpsc::UnboundedReceiver<NavEvent>,
}

impl Replay {
    /// Must be called inside a tokio runtime; spawns the store actor
    pub fn new(scenario: &Scenario, config: &Config) -> Self {
        let headers: Vec<HeaderRef> = scenario
            .messages
            .iter()
            .filter(|m| m.folder.matches(&scenario.folder))
            .map(StoredMessage::header)
            .collect();
        let list = HeaderList::from_headers(scenario.folder.clone(), headers).into_shared();

        let store = Rc::new(spawn_store_actor(scenario.messages.clone(), &config.store));
        let prompt = Rc::new(ScriptedPrompt {
            answer: Cell::new(true),
        });
        let services = NavServices {
            fetch: store.clone(),
            prompt: prompt.clone(),
            registry: Rc::new(InUseRegistry::new()),
            send_queue: Rc::new(NoSendQueue),
        };
        let (facade, events) = NavigationFacade::new(
            WindowId(REPLAY_WINDOW_ID),
            services,
            FacadeOptions::from_config(config, &scenario.folder),
        );

        Self {
            folder: scenario.folder.clone(),
            list,
            store,
            prompt,
            facade,
            events,
        }
    }

    pub fn facade(&self) -> &NavigationFacade {
        &self.facade
    }

    pub fn list(&self) -> &SharedHeaderList {
        &self.list
    }

    /// Execute one step, returning the trace lines it produced
    pub async fn step(&mut self, step: &Step) -> Result<Vec<String>> {
        let action = self.apply(step).await?;
        // Deliver list signals the way the window's main loop would
        self.facade.process_model_events();
        let mut lines = vec![format!("{} | {}", action, self.cursor_line())];
        while let Ok(event) = self.events.try_recv() {
            lines.push(format!("  {}", describe_event(&event)));
        }
        Ok(lines)
    }

    async fn apply(&mut self, step: &Step) -> Result<String> {
        let line = match step {
            Step::Open { uid } => {
                let uid = MessageUid::new(uid.as_str());
                let outcome = self.facade.open(self.open_target(&uid), self.source(&uid)).await;
                format!("open {} -> {}", uid, describe_outcome(&outcome))
            }
            Step::Next => format!("next -> {}", describe_step(self.facade.next().await)),
            Step::Previous => {
                format!("previous -> {}", describe_step(self.facade.previous().await))
            }
            Step::Reload => format!("reload -> {}", describe_step(self.facade.reload().await)),
            Step::Insert {
                uid,
                subject,
                index,
                cached,
            } => {
                let mut stored =
                    StoredMessage::new(uid.as_str(), self.folder.as_str(), subject.as_str());
                stored.cached = *cached;
                let header = stored.header();
                self.store.put(stored).await?;

                let mut list = self.list.borrow_mut();
                let index = index.unwrap_or(list.len());
                list.insert(index, header)
                    .with_context(|| format!("Cannot insert {} at {}", uid, index))?;
                format!("insert {} at {}", uid, index)
            }
            Step::Remove { uid } => {
                let index = self.index_of(uid)?;
                self.list.borrow_mut().remove(index)?;
                format!("remove {} from {}", uid, index)
            }
            Step::Reorder { order } => {
                self.list.borrow_mut().reorder(order)?;
                format!("reorder {:?}", order)
            }
            Step::Flag { uid, deleted, seen } => {
                let index = self.index_of(uid)?;
                let mut list = self.list.borrow_mut();
                let mut flags = list.get(index).map(|h| h.flags()).unwrap_or_default();
                if let Some(deleted) = deleted {
                    flags.set(HeaderFlags::DELETED, *deleted);
                }
                if let Some(seen) = seen {
                    flags.set(HeaderFlags::SEEN, *seen);
                }
                list.set_flags(index, flags)?;
                format!("flag {} {:?}", uid, flags)
            }
            Step::Offline => {
                self.store.set_online(false);
                "offline".to_string()
            }
            Step::Online => {
                self.store.set_reachable(true);
                self.store.set_online(true);
                "online".to_string()
            }
            Step::Unreachable => {
                self.store.set_reachable(false);
                "unreachable".to_string()
            }
            Step::Answer { confirm } => {
                self.prompt.answer.set(*confirm);
                format!("answer {}", if *confirm { "yes" } else { "no" })
            }
            Step::ReplaceModel { folder, empty } => {
                let folder = folder
                    .as_deref()
                    .map(FolderId::new)
                    .unwrap_or_else(|| self.folder.clone());
                let headers: Vec<HeaderRef> = if *empty || !folder.matches(&self.folder) {
                    Vec::new()
                } else {
                    self.list.borrow().iter().cloned().collect()
                };
                self.list = HeaderList::from_headers(folder.clone(), headers).into_shared();
                self.folder = folder;
                self.facade.on_model_replaced(&self.list);
                format!("replace model -> {} ({})", self.list.borrow().id(), self.folder)
            }
            Step::Close => {
                self.facade.close();
                "close".to_string()
            }
            Step::Status => "status".to_string(),
        };
        Ok(line)
    }

    fn open_target(&self, uid: &MessageUid) -> OpenTarget {
        let list = self.list.borrow();
        match list.find_uid(uid).and_then(|idx| list.get(idx)) {
            Some(header) => FetchTarget::Header(Rc::clone(header)),
            None => FetchTarget::Uid {
                folder: self.folder.clone(),
                uid: uid.clone(),
            },
        }
    }

    fn source(&self, uid: &MessageUid) -> Option<(SharedHeaderList, RowReference)> {
        let row = {
            let list = self.list.borrow();
            list.find_uid(uid)
                .and_then(|idx| RowReference::create(&list, idx))
        };
        row.map(|row| (Rc::clone(&self.list), row))
    }

    fn index_of(&self, uid: &str) -> Result<usize> {
        self.list
            .borrow()
            .find_uid(&MessageUid::new(uid))
            .with_context(|| format!("No row with uid {}", uid))
    }

    /// `current=<uid> next=<uid> first last` as seen by the window
    pub fn cursor_line(&self) -> String {
        let cursor = self.facade.cursor();
        let model = self.facade.model();
        let uid_of = |row: Option<RowReference>| -> String {
            match (row, &model) {
                (Some(row), Some(model)) => row
                    .header(&model.borrow())
                    .map(|h| h.uid.to_string())
                    .unwrap_or_else(|_| "stale".to_string()),
                _ => "-".to_string(),
            }
        };
        let displayed = self
            .facade
            .displayed()
            .map(|h| h.uid.to_string())
            .unwrap_or_else(|| "-".to_string());

        let mut line = format!(
            "shown={} current={} next={}",
            displayed,
            uid_of(cursor.current),
            uid_of(cursor.next)
        );
        if self.facade.is_first() {
            line.push_str(" first");
        }
        if self.facade.is_last() {
            line.push_str(" last");
        }
        line
    }

    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }
}

fn describe_step(outcome: Option<FetchOutcome>) -> String {
    match outcome {
        Some(outcome) => describe_outcome(&outcome),
        None => "nothing to do".to_string(),
    }
}

fn describe_outcome(outcome: &FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Resolved { message, header } => format!(
            "resolved {} \"{}\" ({}): {}",
            header.uid,
            header.subject,
            header.display_date(),
            message.body.display_text()
        ),
        FetchOutcome::Canceled(reason) => format!("canceled ({})", reason),
        FetchOutcome::Failed(e) => format!("failed ({})", e),
    }
}

fn describe_event(event: &NavEvent) -> String {
    match event {
        NavEvent::Fetching { uid } => format!("fetching {}", uid),
        NavEvent::MessageChanged { model, row, uid } => format!(
            "message changed to {} ({}, {})",
            uid,
            model.map(|m| m.to_string()).unwrap_or_else(|| "no model".to_string()),
            if row.is_some() { "bound" } else { "unbound" }
        ),
        NavEvent::FetchAbandoned { uid } => format!("fetch of {} abandoned", uid),
        NavEvent::ReadStateChanged { uid, seen } => {
            format!("{} marked {}", uid, if *seen { "seen" } else { "unseen" })
        }
        NavEvent::DimmingChanged => "dimming changed".to_string(),
        NavEvent::CursorBound { .. } => "cursor bound".to_string(),
        NavEvent::CursorDetached => "cursor detached".to_string(),
    }
}

/// Run a whole scenario, collecting its trace
pub async fn run(scenario: &Scenario, config: &Config) -> Result<Vec<String>> {
    let mut replay = Replay::new(scenario, config);
    let mut trace = Vec::new();
    for (n, step) in scenario.steps.iter().enumerate() {
        let lines = replay
            .step(step)
            .await
            .with_context(|| format!("Step {} ({:?}) failed", n + 1, step))?;
        trace.extend(lines);
    }
    replay.shutdown().await;
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
        folder = "INBOX"

        [[messages]]
        uid = "1"
        folder = "INBOX"
        subject = "one"
        body = "hello"
        cached = true

        [[messages]]
        uid = "2"
        folder = "INBOX"
        subject = "two"
        deleted = true

        [[messages]]
        uid = "3"
        folder = "INBOX"
        subject = "three"
        html = "<p>three</p>"
    "#;

    fn scenario(steps: &str) -> Scenario {
        Scenario::from_toml(&format!("{}\n{}", BASIC, steps)).unwrap()
    }

    #[test]
    fn test_parse_steps() {
        let s = scenario(
            r#"
            [[steps]]
            action = "open"
            uid = "1"

            [[steps]]
            action = "reorder"
            order = [2, 0, 1]

            [[steps]]
            action = "replace_model"
            empty = true

            [[steps]]
            action = "next"
        "#,
        );
        assert_eq!(s.messages.len(), 3);
        assert_eq!(
            s.steps,
            vec![
                Step::Open { uid: "1".into() },
                Step::Reorder {
                    order: vec![2, 0, 1]
                },
                Step::ReplaceModel {
                    folder: None,
                    empty: true
                },
                Step::Next,
            ]
        );
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = Scenario::from_toml("[[steps]]\naction = \"teleport\"\n").unwrap_err();
        assert!(err.to_string().contains("Failed to parse scenario"));
    }

    #[tokio::test]
    async fn test_open_and_next_skips_deleted() {
        let s = scenario(
            r#"
            [[steps]]
            action = "open"
            uid = "1"

            [[steps]]
            action = "next"
        "#,
        );
        let trace = run(&s, &Config::default()).await.unwrap();
        assert!(trace[0].starts_with("open 1 -> resolved 1 \"one\""));
        assert!(trace[0].contains("(Jan 01, 1970 at 00:00): hello"));
        assert!(trace[0].contains("current=1 next=3"));
        assert!(trace.iter().any(|l| l.contains("1 marked seen")));
        let next = trace.iter().find(|l| l.starts_with("next")).unwrap();
        assert!(next.contains("resolved 3 \"three\""));
        assert!(next.contains("<p>three</p>"));
        assert!(next.contains("current=3 next=1"));
    }

    #[tokio::test]
    async fn test_offline_decline_keeps_cursor() {
        let s = scenario(
            r#"
            [[steps]]
            action = "open"
            uid = "1"

            [[steps]]
            action = "offline"

            [[steps]]
            action = "answer"
            confirm = false

            [[steps]]
            action = "next"
        "#,
        );
        let trace = run(&s, &Config::default()).await.unwrap();
        let next = trace.iter().find(|l| l.starts_with("next")).unwrap();
        assert!(next.contains("canceled (declined by user)"));
        assert!(next.contains("shown=1 current=1 next=3"));
        assert!(trace.iter().any(|l| l.contains("fetch of 3 abandoned")));
    }

    #[tokio::test]
    async fn test_unknown_uid_fails_step() {
        let s = scenario(
            r#"
            [[steps]]
            action = "remove"
            uid = "42"
        "#,
        );
        let err = run(&s, &Config::default()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("No row with uid 42"));
    }

    #[tokio::test]
    async fn test_replace_model_rebinds_on_insert() {
        let s = scenario(
            r#"
            [[steps]]
            action = "open"
            uid = "3"

            [[steps]]
            action = "replace_model"
            empty = true

            [[steps]]
            action = "insert"
            uid = "3"
            subject = "three"

            [[steps]]
            action = "status"
        "#,
        );
        let trace = run(&s, &Config::default()).await.unwrap();
        let replaced = trace.iter().find(|l| l.starts_with("replace model")).unwrap();
        assert!(replaced.contains("current=-"));
        let status = trace.iter().find(|l| l.starts_with("status")).unwrap();
        assert!(status.contains("shown=3 current=3"));
    }
}
