use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{HookState, Store, Toaster};
use crate::clock::now_millis;
use crate::config::{MAX_VISIBLE_AVATARS, PRESENCE_FRESHNESS, PRESENCE_HEARTBEAT};
use crate::error::AppError;
use crate::models::{ListPresence, PresenceStatus, UpdatePresence};
use crate::realtime::Subscription;
use crate::services::ListService;

#[derive(Debug, Clone, Copy)]
pub struct PresenceOptions {
    /// How often the caller's row is refreshed while mounted.
    pub heartbeat: Duration,
    /// Rows last seen longer ago than this are hidden.
    pub freshness: Duration,
}

impl Default for PresenceOptions {
    fn default() -> Self {
        Self {
            heartbeat: PRESENCE_HEARTBEAT,
            freshness: PRESENCE_FRESHNESS,
        }
    }
}

/// Who else is on a list right now.
///
/// Mounting announces the caller as viewing and starts a heartbeat that
/// keeps the row fresh; unmounting stops it and removes the row.
pub struct ListPresenceHook {
    service: ListService,
    toaster: Arc<dyn Toaster>,
    list_id: String,
    options: PresenceOptions,
    store: Store<Vec<ListPresence>>,
    current: Arc<Mutex<UpdatePresence>>,
    heartbeat: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
    left: bool,
}

impl ListPresenceHook {
    pub async fn mount(
        service: ListService,
        toaster: Arc<dyn Toaster>,
        list_id: &str,
        options: PresenceOptions,
    ) -> Self {
        let current = UpdatePresence {
            list_id: list_id.to_string(),
            status: PresenceStatus::Viewing,
            editing_todo_id: None,
        };
        if let Err(err) = service.update_presence(current.clone()).await {
            warn!(list_id, error = %err, "Could not announce presence");
        }

        let store = Store::new(Vec::new());
        let mut hook = Self {
            service,
            toaster,
            list_id: list_id.to_string(),
            options,
            store,
            current: Arc::new(Mutex::new(current)),
            heartbeat: None,
            subscription: None,
            left: false,
        };
        hook.refetch().await;

        let pushes = hook.store.clone();
        hook.subscription = Some(
            hook.service
                .subscribe_to_list_presence(list_id, move |rows| pushes.push(rows)),
        );
        hook.heartbeat = Some(hook.spawn_heartbeat());
        hook
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let current = self.current.clone();
        let period = self.options.heartbeat;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let update = current.lock().unwrap_or_else(|p| p.into_inner()).clone();
                match service.update_presence(update).await {
                    Ok(()) => debug!("Presence heartbeat"),
                    Err(err) => warn!(error = %err, "Presence heartbeat failed"),
                }
            }
        })
    }

    pub fn state(&self) -> HookState<Vec<ListPresence>> {
        self.store.snapshot()
    }

    /// Rows seen within the freshness window, most recent first.
    pub fn presence(&self) -> Vec<ListPresence> {
        let now = now_millis();
        let window = self.options.freshness.as_millis() as i64;
        self.store
            .data()
            .into_iter()
            .filter(|row| row.is_fresh(now, window))
            .collect()
    }

    pub fn summary(&self, max_visible: usize) -> PresenceSummary {
        PresenceSummary::build(&self.presence(), max_visible)
    }

    /// Summary sized for a list header.
    pub fn avatars(&self) -> PresenceSummary {
        self.summary(MAX_VISIBLE_AVATARS)
    }

    pub async fn refetch(&self) -> bool {
        self.store
            .load(
                Some(self.toaster.as_ref()),
                self.service.get_list_presence(&self.list_id),
            )
            .await
    }

    /// Marks the caller as editing `todo_id`, or back to viewing on `None`.
    pub async fn set_editing(&self, todo_id: Option<&str>) -> Result<(), AppError> {
        let update = {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            current.status = match todo_id {
                Some(_) => PresenceStatus::Editing,
                None => PresenceStatus::Viewing,
            };
            current.editing_todo_id = todo_id.map(str::to_string);
            current.clone()
        };
        self.service.update_presence(update).await
    }

    pub async fn unmount(mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.left = true;
        if let Err(err) = self.service.leave_list(&self.list_id).await {
            warn!(list_id = %self.list_id, error = %err, "Could not leave list");
        }
    }
}

impl Drop for ListPresenceHook {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        if self.left {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let service = self.service.clone();
            let list_id = self.list_id.clone();
            handle.spawn(async move {
                if let Err(err) = service.leave_list(&list_id).await {
                    warn!(list_id, error = %err, "Could not leave list");
                }
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Avatar {
    pub user_id: String,
    pub initials: String,
    pub label: String,
    pub avatar_url: Option<String>,
    pub editing: bool,
}

/// Avatar row for a list header: the first `max_visible` collaborators
/// and a count of the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSummary {
    pub avatars: Vec<Avatar>,
    pub overflow: usize,
}

impl PresenceSummary {
    pub fn build(presence: &[ListPresence], max_visible: usize) -> Self {
        let avatars = presence
            .iter()
            .take(max_visible)
            .map(|row| {
                let profile = row.user.as_ref();
                let name = profile.and_then(|p| p.display_name.as_deref());
                let email = profile.map(|p| p.email.as_str());
                Avatar {
                    user_id: row.user_id.clone(),
                    initials: initials(name, email),
                    label: name
                        .filter(|n| !n.trim().is_empty())
                        .or(email)
                        .unwrap_or("Unknown user")
                        .to_string(),
                    avatar_url: profile.and_then(|p| p.avatar_url.clone()),
                    editing: row.status == PresenceStatus::Editing,
                }
            })
            .collect();

        Self {
            avatars,
            overflow: presence.len().saturating_sub(max_visible),
        }
    }
}

fn initials(name: Option<&str>, email: Option<&str>) -> String {
    let from_name: String = name
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    if !from_name.is_empty() {
        return from_name;
    }
    email
        .and_then(|e| e.chars().next())
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string())
}
