//! Geolocation service
//!
//! Wraps a device location capability and asks the backend which lists
//! and todos are close to the current position. Monitoring polls the
//! position in the background and raises a `location_reminder`
//! notification whenever a todo comes into range.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::NotificationService;
use crate::backend::{procedure, Adapter, AdapterExt};
use crate::error::AppError;
use crate::geo::Coordinates;
use crate::models::{List, NewNotification, NotificationKind, Todo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

/// Source of the device position.
pub trait LocationProvider: Send + Sync {
    fn permission(&self) -> PermissionState;

    /// Prompts for access if not decided yet and returns the outcome.
    fn request_permission(&self) -> PermissionState;

    /// `None` when the position is currently unknown.
    fn current_position(&self) -> Option<Coordinates>;
}

/// A provider whose position is set by its owner. Used by the server,
/// which has no device of its own, and by tests.
#[derive(Debug)]
pub struct FixedLocation {
    position: Mutex<Option<Coordinates>>,
    permission: Mutex<PermissionState>,
}

impl FixedLocation {
    pub fn new(position: Option<Coordinates>, permission: PermissionState) -> Self {
        Self {
            position: Mutex::new(position),
            permission: Mutex::new(permission),
        }
    }

    pub fn set_position(&self, position: Option<Coordinates>) {
        *self.position.lock().unwrap_or_else(|p| p.into_inner()) = position;
    }
}

impl LocationProvider for FixedLocation {
    fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// A pending prompt is granted when a position is available.
    fn request_permission(&self) -> PermissionState {
        let mut permission = self.permission.lock().unwrap_or_else(|p| p.into_inner());
        if *permission == PermissionState::Prompt {
            *permission = if self.current_position().is_some() {
                PermissionState::Granted
            } else {
                PermissionState::Denied
            };
        }
        *permission
    }

    fn current_position(&self) -> Option<Coordinates> {
        *self.position.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone)]
pub struct GeolocationService {
    backend: Arc<dyn Adapter>,
    provider: Arc<dyn LocationProvider>,
    radius_m: f64,
    poll_interval: Duration,
    monitor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl GeolocationService {
    pub fn new(
        backend: Arc<dyn Adapter>,
        provider: Arc<dyn LocationProvider>,
        radius_m: f64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            provider,
            radius_m,
            poll_interval,
            monitor: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn check_permission(&self) -> PermissionState {
        self.provider.permission()
    }

    pub async fn request_permission(&self) -> bool {
        let state = self.provider.request_permission();
        info!(?state, "Location permission requested");
        state == PermissionState::Granted
    }

    pub async fn get_current_position(&self) -> Result<Coordinates, AppError> {
        if self.provider.permission() != PermissionState::Granted {
            return Err(AppError::validation("Location access has not been granted"));
        }
        self.provider
            .current_position()
            .ok_or_else(|| AppError::validation("Current location is unavailable"))
    }

    /// Lists with at least one open todo within range, nearest first.
    pub async fn check_proximity_to_lists(&self, at: Coordinates) -> Result<Vec<List>, AppError> {
        nearby(self.backend.as_ref(), procedure::NEARBY_LISTS, at, self.radius_m)
    }

    /// Open todos within range, nearest first.
    pub async fn check_proximity_to_todos(&self, at: Coordinates) -> Result<Vec<Todo>, AppError> {
        nearby(self.backend.as_ref(), procedure::NEARBY_TODOS, at, self.radius_m)
    }

    /// Starts polling in the background. Requires granted permission; a
    /// second call while monitoring is a no-op.
    pub fn start_monitoring(&self) -> Result<(), AppError> {
        if self.provider.permission() != PermissionState::Granted {
            return Err(AppError::validation("Location access has not been granted"));
        }
        let mut monitor = self.monitor.lock().unwrap_or_else(|p| p.into_inner());
        if monitor.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        let backend = self.backend.clone();
        let provider = self.provider.clone();
        let radius_m = self.radius_m;
        let period = self.poll_interval;
        *monitor = Some(tokio::spawn(async move {
            let notifications = NotificationService::new(backend.clone());
            let mut in_range: HashSet<String> = HashSet::new();
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(at) = provider.current_position() else {
                    debug!("No position available, skipping proximity check");
                    continue;
                };
                let todos: Vec<Todo> =
                    match nearby(backend.as_ref(), procedure::NEARBY_TODOS, at, radius_m) {
                        Ok(todos) => todos,
                        Err(err) => {
                            warn!(error = %err, "Proximity check failed");
                            continue;
                        }
                    };

                let now_in_range: HashSet<String> = todos.iter().map(|t| t.id.clone()).collect();
                for todo in todos.iter().filter(|t| !in_range.contains(&t.id)) {
                    if let Err(err) = notifications.create_notification(reminder_for(todo)).await {
                        warn!(todo_id = %todo.id, error = %err, "Could not create location reminder");
                    }
                }
                in_range = now_in_range;
            }
        }));
        info!(radius_m, "Location monitoring started");
        Ok(())
    }

    pub fn stop_monitoring(&self) {
        let task = self.monitor.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            info!("Location monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

fn nearby<T: serde::de::DeserializeOwned>(
    backend: &dyn Adapter,
    procedure: &str,
    at: Coordinates,
    radius_m: f64,
) -> Result<Vec<T>, AppError> {
    Ok(backend.call(
        procedure,
        json!({
            "p_latitude": at.latitude,
            "p_longitude": at.longitude,
            "p_radius_m": radius_m,
        }),
    )?)
}

fn reminder_for(todo: &Todo) -> NewNotification {
    let place = todo.location_name.as_deref().unwrap_or("a saved location");
    NewNotification {
        kind: NotificationKind::LocationReminder,
        title: format!("Nearby: {}", todo.title),
        body: format!("You are close to {place}"),
        action_url: Some(format!("/lists/{}", todo.list_id)),
    }
}
