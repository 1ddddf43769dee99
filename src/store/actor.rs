//! Store actor for async message retrieval

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::StoredMessage;
use crate::config::StoreConfig;
use crate::constants::STORE_COMMAND_CAPACITY;
use crate::error::FetchError;
use crate::fetch::{ConnectResult, FetchService, FetchTarget};
use crate::mail::types::{HeaderFlags, Message, MessageUid};

/// Commands that can be sent to the store actor
#[derive(Debug)]
pub enum StoreCommand {
    /// Read a message body
    Fetch {
        uid: MessageUid,
        /// Served from local storage, so the network state does not matter
        local: bool,
        reply: oneshot::Sender<Result<StoredMessage, FetchError>>,
    },
    /// Try to go online
    Connect { reply: oneshot::Sender<ConnectResult> },
    /// Add or replace a message
    Put(StoredMessage),
    /// Shutdown the actor
    Shutdown,
}

/// Flags shared between the actor and its handle
#[derive(Debug)]
struct Link {
    online: AtomicBool,
    reachable: AtomicBool,
}

/// Handle for communicating with the store actor.
///
/// Lives on the navigation thread; the cache set is local to it.
pub struct StoreHandle {
    cmd_tx: mpsc::Sender<StoreCommand>,
    link: Arc<Link>,
    cached: RefCell<HashSet<MessageUid>>,
}

/// Spawn the store actor task
pub fn spawn_store_actor(messages: Vec<StoredMessage>, config: &StoreConfig) -> StoreHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(STORE_COMMAND_CAPACITY);
    let link = Arc::new(Link {
        online: AtomicBool::new(true),
        reachable: AtomicBool::new(true),
    });

    let cached = messages
        .iter()
        .filter(|m| m.cached)
        .map(|m| m.uid.clone())
        .collect();
    let messages = messages.into_iter().map(|m| (m.uid.clone(), m)).collect();

    tokio::spawn(store_actor_loop(
        messages,
        Duration::from_millis(config.latency_ms),
        Arc::clone(&link),
        cmd_rx,
    ));

    StoreHandle {
        cmd_tx,
        link,
        cached: RefCell::new(cached),
    }
}

async fn store_actor_loop(
    mut messages: HashMap<MessageUid, StoredMessage>,
    latency: Duration,
    link: Arc<Link>,
    mut cmd_rx: mpsc::Receiver<StoreCommand>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            StoreCommand::Fetch { uid, local, reply } => {
                let result = if !local && !link.online.load(Ordering::SeqCst) {
                    Err(FetchError::Connection("store is offline".to_string()))
                } else {
                    if !latency.is_zero() {
                        tokio::time::sleep(latency).await;
                    }
                    messages
                        .get(&uid)
                        .cloned()
                        .ok_or_else(|| FetchError::NotFound(uid.clone()))
                };
                if reply.send(result).is_err() {
                    tracing::debug!("Store actor: fetch of {} abandoned by caller", uid);
                }
            }

            StoreCommand::Connect { reply } => {
                let result = if link.reachable.load(Ordering::SeqCst) {
                    link.online.store(true, Ordering::SeqCst);
                    tracing::info!("Store actor: connected");
                    ConnectResult::Connected
                } else {
                    ConnectResult::Failed("host unreachable".to_string())
                };
                if reply.send(result).is_err() {
                    tracing::debug!("Store actor: connect abandoned by caller");
                }
            }

            StoreCommand::Put(message) => {
                messages.insert(message.uid.clone(), message);
            }

            StoreCommand::Shutdown => {
                break;
            }
        }
    }
    tracing::debug!("Store actor stopped");
}

impl StoreHandle {
    pub fn set_online(&self, online: bool) {
        self.link.online.store(online, Ordering::SeqCst);
    }

    /// Whether `connect` can succeed
    pub fn set_reachable(&self, reachable: bool) {
        self.link.reachable.store(reachable, Ordering::SeqCst);
    }

    pub async fn put(&self, message: StoredMessage) -> Result<(), FetchError> {
        if message.cached {
            self.cached.borrow_mut().insert(message.uid.clone());
        }
        self.send(StoreCommand::Put(message)).await
    }

    pub async fn shutdown(&self) {
        if self.send(StoreCommand::Shutdown).await.is_err() {
            tracing::debug!("Store actor already stopped");
        }
    }

    async fn send(&self, cmd: StoreCommand) -> Result<(), FetchError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| FetchError::ServiceUnavailable)
    }
}

#[async_trait(?Send)]
impl FetchService for StoreHandle {
    async fn fetch(&self, target: &FetchTarget) -> Result<Message, FetchError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Fetch {
            uid: target.uid().clone(),
            local: self.is_cached(target),
            reply,
        })
        .await?;
        let stored = rx.await.map_err(|_| FetchError::ServiceUnavailable)??;

        self.cached.borrow_mut().insert(stored.uid.clone());
        let header = match target {
            FetchTarget::Header(header) => Rc::clone(header),
            FetchTarget::Uid { .. } => stored.header(),
        };
        header.insert_flag(HeaderFlags::CACHED);

        Ok(Message {
            header,
            body: stored.message_body(),
        })
    }

    fn is_cached(&self, target: &FetchTarget) -> bool {
        self.cached.borrow().contains(target.uid())
    }

    fn is_online(&self) -> bool {
        self.link.online.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> ConnectResult {
        let (reply, rx) = oneshot::channel();
        if self.send(StoreCommand::Connect { reply }).await.is_err() {
            return ConnectResult::Failed("store unavailable".to_string());
        }
        rx.await
            .unwrap_or_else(|_| ConnectResult::Failed("store unavailable".to_string()))
    }
}
