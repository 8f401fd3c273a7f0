use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::{require_user, watch};
use crate::backend::{procedure, Adapter, AdapterExt, Query, Table};
use crate::error::AppError;
use crate::models::{NewNotification, Notification};
use crate::realtime::{topic, Subscription};

#[derive(Clone)]
pub struct NotificationService {
    backend: Arc<dyn Adapter>,
}

impl NotificationService {
    pub fn new(backend: Arc<dyn Adapter>) -> Self {
        Self { backend }
    }

    /// The caller's notifications, newest first.
    pub async fn get_notifications(&self) -> Result<Vec<Notification>, AppError> {
        require_user(self.backend.as_ref())?;
        fetch_notifications(self.backend.as_ref())
    }

    pub async fn get_unread_count(&self) -> Result<usize, AppError> {
        require_user(self.backend.as_ref())?;
        let unread = self
            .backend
            .query(Table::Notifications, &Query::new().filter("read", false))?;
        Ok(unread.len())
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<Notification, AppError> {
        Ok(self
            .backend
            .update_as(Table::Notifications, id, json!({ "read": true }))?)
    }

    /// Returns how many notifications changed.
    pub async fn mark_all_as_read(&self) -> Result<usize, AppError> {
        let changed: usize = self
            .backend
            .call(procedure::MARK_ALL_NOTIFICATIONS_READ, json!({}))?;
        info!(changed, "Marked all notifications read");
        Ok(changed)
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), AppError> {
        self.backend.remove(Table::Notifications, id)?;
        info!(id, "Deleted notification");
        Ok(())
    }

    /// Adds a notification for the caller.
    pub async fn create_notification(&self, input: NewNotification) -> Result<Notification, AppError> {
        require_user(self.backend.as_ref())?;
        let notification: Notification = self.backend.insert_as(
            Table::Notifications,
            json!({
                "type": input.kind,
                "title": input.title,
                "body": input.body,
                "read": false,
                "action_url": input.action_url,
            }),
        )?;
        info!(id = %notification.id, kind = ?notification.kind, "Created notification");
        Ok(notification)
    }

    pub fn subscribe_to_notifications<F>(&self, callback: F) -> Result<Subscription, AppError>
    where
        F: Fn(Vec<Notification>) + Send + Sync + 'static,
    {
        let user = require_user(self.backend.as_ref())?;
        Ok(watch(
            &self.backend,
            topic(Table::Notifications, Some(&user.id)),
            fetch_notifications,
            callback,
        ))
    }
}

fn fetch_notifications(backend: &dyn Adapter) -> Result<Vec<Notification>, AppError> {
    Ok(backend.select(Table::Notifications, &Query::new().desc("created_at"))?)
}
