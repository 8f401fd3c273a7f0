//! In-process change feed.
//!
//! Writers publish a [`ChangeEvent`] per changed row to the topic of its
//! table and, when the table is scoped, to `<table>:<scope>`. Subscribers
//! open a [`Channel`] on a topic, attach handlers and get a
//! [`Subscription`] back; dropping or unsubscribing it tears the channel
//! down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::Table;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Events were dropped; subscribers should re-read everything.
    Resync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub topic: String,
    pub kind: ChangeKind,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPattern {
    All,
    Insert,
    Update,
    Delete,
}

impl EventPattern {
    pub fn matches(self, kind: ChangeKind) -> bool {
        match (self, kind) {
            (EventPattern::All, _) | (_, ChangeKind::Resync) => true,
            (EventPattern::Insert, ChangeKind::Insert) => true,
            (EventPattern::Update, ChangeKind::Update) => true,
            (EventPattern::Delete, ChangeKind::Delete) => true,
            _ => false,
        }
    }
}

/// A row-level change as recorded by the backend, before fan-out to topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
    pub id: Option<String>,
    pub scope: Option<String>,
}

pub fn topic(table: Table, scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("{}:{}", table.name(), scope),
        None => table.name().to_string(),
    }
}

type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Realtime {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>>,
}

impl Realtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, name: impl Into<String>) -> Channel {
        Channel {
            realtime: self.clone(),
            name: name.into(),
            handlers: Vec::new(),
        }
    }

    /// Tears down a channel opened with [`Channel::subscribe`].
    pub fn remove_channel(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    pub fn publish(&self, change: &Change) {
        self.send(&topic(change.table, None), change);
        if let Some(scope) = change.scope.as_deref() {
            self.send(&topic(change.table, Some(scope)), change);
        }
    }

    fn send(&self, topic: &str, change: &Change) {
        let Ok(mut topics) = self.topics.lock() else {
            return;
        };
        let Some(tx) = topics.get(topic) else {
            return;
        };

        let event = ChangeEvent {
            topic: topic.to_string(),
            kind: change.kind,
            id: change.id.clone(),
        };
        if tx.send(event).is_err() {
            // Every receiver is gone.
            topics.remove(topic);
        }
    }

    fn receiver(&self, topic: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(topic).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }
}

pub struct Channel {
    realtime: Realtime,
    name: String,
    handlers: Vec<(EventPattern, Handler)>,
}

impl Channel {
    pub fn on<F>(mut self, pattern: EventPattern, handler: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.handlers.push((pattern, Arc::new(handler)));
        self
    }

    /// Starts delivery on a background task. Must be called within a tokio
    /// runtime.
    pub fn subscribe(self) -> Subscription {
        let Channel {
            realtime,
            name,
            handlers,
        } = self;

        // Registered before the task starts so nothing published after this
        // call is missed.
        let mut rx = realtime.receiver(&name);
        let active = Arc::new(AtomicBool::new(true));
        let gate = Arc::new(Mutex::new(()));

        let task = {
            let name = name.clone();
            let active = active.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                loop {
                    let event = match rx.recv().await {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(channel = %name, skipped, "Channel lagged, requesting resync");
                            ChangeEvent {
                                topic: name.clone(),
                                kind: ChangeKind::Resync,
                                id: None,
                            }
                        }
                        Err(RecvError::Closed) => break,
                    };

                    let _delivering = gate.lock().unwrap_or_else(|p| p.into_inner());
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    for (pattern, handler) in &handlers {
                        if pattern.matches(event.kind) {
                            handler(&event);
                        }
                    }
                }
            })
        };

        debug!(channel = %name, "Subscribed");
        Subscription {
            name,
            active,
            gate,
            task: Some(task),
        }
    }
}

/// Live channel subscription. Dropping it unsubscribes.
pub struct Subscription {
    name: String,
    active: Arc<AtomicBool>,
    gate: Arc<Mutex<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops delivery. Once this returns no handler of the channel runs
    /// again. Must not be called from inside one of the channel's own
    /// handlers.
    pub fn unsubscribe(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.active.store(false, Ordering::SeqCst);
        // Wait out a delivery that is already running.
        drop(self.gate.lock().unwrap_or_else(|p| p.into_inner()));
        task.abort();
        debug!(channel = %self.name, "Unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}
