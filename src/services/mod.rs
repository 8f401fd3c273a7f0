//! Domain services. Each one wraps a per-caller [`Adapter`] and is cheap to
//! clone.

pub mod attachments;
pub mod geolocation;
pub mod lists;
pub mod notifications;
pub mod preferences;
pub mod todos;

pub use attachments::AttachmentStore;
pub use geolocation::{FixedLocation, GeolocationService, LocationProvider, PermissionState};
pub use lists::ListService;
pub use notifications::NotificationService;
pub use preferences::PreferencesService;
pub use todos::TodoService;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{Adapter, AdapterExt, Query, Table};
use crate::error::AppError;
use crate::models::{Identity, UserProfile};
use crate::realtime::{EventPattern, Subscription};

fn require_user(backend: &dyn Adapter) -> Result<Identity, AppError> {
    backend.current_user().ok_or(AppError::Auth)
}

/// Opens `topic` and, on every event, re-reads the whole collection with
/// `fetch` and hands the fresh snapshot to `callback`. Failed re-reads are
/// logged and skipped.
fn watch<T, F, C>(backend: &Arc<dyn Adapter>, topic: String, fetch: F, callback: C) -> Subscription
where
    F: Fn(&dyn Adapter) -> Result<T, AppError> + Send + Sync + 'static,
    C: Fn(T) + Send + Sync + 'static,
{
    let client = backend.clone();
    backend
        .realtime()
        .channel(topic)
        .on(EventPattern::All, move |event| match fetch(client.as_ref()) {
            Ok(snapshot) => {
                debug!(channel = %event.topic, kind = ?event.kind, "Pushing fresh snapshot");
                callback(snapshot);
            }
            Err(err) => warn!(channel = %event.topic, error = %err, "Re-fetch after change failed"),
        })
        .subscribe()
}

/// Public profiles for `ids`, in no particular order.
fn profiles(backend: &dyn Adapter, ids: Vec<String>) -> Result<Vec<UserProfile>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(backend.select(Table::Users, &Query::new().filter_in("id", ids))?)
}

fn find_profile(profiles: &[UserProfile], id: Option<&str>) -> Option<UserProfile> {
    let id = id?;
    profiles.iter().find(|p| p.id == id).cloned()
}
