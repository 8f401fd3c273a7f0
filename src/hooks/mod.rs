//! Stateful views over the services, one per screen concern.
//!
//! A hook is mounted with an async constructor that opens its realtime
//! subscription and performs the first fetch, and is torn down with
//! `unmount` (or by dropping it). Its state moves `Idle -> Loading ->
//! Ready | Error`; subscription pushes replace the data without touching
//! the loading flag. Mutations report their outcome through a [`Toaster`].

mod geolocation;
mod lists;
mod notifications;
mod preferences;
mod presence;
mod sharing;
mod todos;

pub use geolocation::GeolocationHook;
pub use lists::{ListHook, ListsHook};
pub use notifications::{Inbox, NotificationsHook};
pub use preferences::PreferencesHook;
pub use presence::{Avatar, ListPresenceHook, PresenceOptions, PresenceSummary};
pub use sharing::ListSharingHook;
pub use todos::{TodoHook, TodosHook};

use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone)]
pub struct HookState<T> {
    pub data: T,
    pub phase: Phase,
    pub loading: bool,
    /// Message of the last failed fetch, cleared when a fetch starts.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

/// Sink for short-lived user-facing messages.
pub trait Toaster: Send + Sync {
    fn show(&self, toast: Toast);
}

impl<'a> dyn Toaster + 'a {
    pub fn success(&self, message: impl Into<String>) {
        self.show(Toast {
            level: ToastLevel::Success,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.show(Toast {
            level: ToastLevel::Info,
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(Toast {
            level: ToastLevel::Error,
            message: message.into(),
        });
    }
}

/// Keeps every toast and mirrors it to the log.
#[derive(Debug, Default)]
pub struct ToastLog {
    toasts: Mutex<Vec<Toast>>,
}

impl ToastLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn messages(&self, level: ToastLevel) -> Vec<String> {
        self.toasts()
            .into_iter()
            .filter(|t| t.level == level)
            .map(|t| t.message)
            .collect()
    }
}

impl Toaster for ToastLog {
    fn show(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Error => warn!(message = %toast.message, "Toast"),
            _ => info!(message = %toast.message, "Toast"),
        }
        self.toasts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(toast);
    }
}

/// Shared hook state, written by fetches, mutations and subscription
/// callbacks alike.
pub(crate) struct Store<T> {
    state: Arc<Mutex<HookState<T>>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone> Store<T> {
    fn new(data: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(HookState {
                data,
                phase: Phase::Idle,
                loading: false,
                error: None,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut HookState<T>) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn snapshot(&self) -> HookState<T> {
        self.with(|state| state.clone())
    }

    fn data(&self) -> T {
        self.with(|state| state.data.clone())
    }

    /// Replaces the data from a subscription push.
    fn push(&self, data: T) {
        self.with(|state| {
            state.data = data;
            if state.phase != Phase::Loading {
                state.phase = Phase::Ready;
            }
        });
    }

    /// Applies a local edit after a successful mutation.
    fn patch(&self, f: impl FnOnce(&mut T)) {
        self.with(|state| f(&mut state.data));
    }

    /// Drives one fetch through the state machine. Failures are recorded
    /// in `error` and, unless `toaster` is `None`, shown to the user.
    async fn load<F>(&self, toaster: Option<&dyn Toaster>, fetch: F) -> bool
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.with(|state| {
            state.phase = Phase::Loading;
            state.loading = true;
            state.error = None;
        });

        let result = fetch.await;
        let failure = self.with(|state| {
            state.loading = false;
            match result {
                Ok(data) => {
                    state.data = data;
                    state.phase = Phase::Ready;
                    None
                }
                Err(err) => {
                    let message = err.to_string();
                    state.phase = Phase::Error;
                    state.error = Some(message.clone());
                    Some(message)
                }
            }
        });

        match (failure, toaster) {
            (Some(message), Some(toaster)) => {
                toaster.error(message);
                false
            }
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}
