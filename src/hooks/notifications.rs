use std::sync::Arc;

use tracing::warn;

use super::{HookState, Store, Toaster};
use crate::error::AppError;
use crate::models::Notification;
use crate::realtime::Subscription;
use crate::services::NotificationService;

#[derive(Debug, Clone, Default)]
pub struct Inbox {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

impl Inbox {
    fn from_notifications(notifications: Vec<Notification>) -> Self {
        let unread_count = notifications.iter().filter(|n| !n.read).count();
        Self {
            notifications,
            unread_count,
        }
    }
}

pub struct NotificationsHook {
    service: NotificationService,
    toaster: Arc<dyn Toaster>,
    store: Store<Inbox>,
    subscription: Option<Subscription>,
}

impl NotificationsHook {
    pub async fn mount(service: NotificationService, toaster: Arc<dyn Toaster>) -> Self {
        let store = Store::new(Inbox::default());
        let pushes = store.clone();
        let subscription = match service
            .subscribe_to_notifications(move |rows| pushes.push(Inbox::from_notifications(rows)))
        {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(error = %err, "Could not subscribe to notifications");
                None
            }
        };

        let hook = Self {
            service,
            toaster,
            store,
            subscription,
        };
        hook.refetch().await;
        hook
    }

    pub fn state(&self) -> HookState<Inbox> {
        self.store.snapshot()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.store.with(|state| state.data.notifications.clone())
    }

    pub fn unread_count(&self) -> usize {
        self.store.with(|state| state.data.unread_count)
    }

    pub async fn refetch(&self) -> bool {
        let service = self.service.clone();
        self.store
            .load(Some(self.toaster.as_ref()), async move {
                service.get_notifications().await.map(Inbox::from_notifications)
            })
            .await
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<(), AppError> {
        let updated = self
            .service
            .mark_as_read(id)
            .await
            .inspect_err(|err| self.toaster.error(err.to_string()))?;
        self.store.patch(|inbox| {
            if let Some(slot) = inbox.notifications.iter_mut().find(|n| n.id == updated.id) {
                if !slot.read {
                    inbox.unread_count = inbox.unread_count.saturating_sub(1);
                }
                *slot = updated.clone();
            }
        });
        Ok(())
    }

    pub async fn mark_all_as_read(&self) -> Result<(), AppError> {
        self.service
            .mark_all_as_read()
            .await
            .inspect_err(|err| self.toaster.error(err.to_string()))?;
        self.store.patch(|inbox| {
            for notification in &mut inbox.notifications {
                notification.read = true;
            }
            inbox.unread_count = 0;
        });
        self.toaster.success("All notifications marked as read");
        Ok(())
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), AppError> {
        self.service
            .delete_notification(id)
            .await
            .inspect_err(|err| self.toaster.error(err.to_string()))?;
        self.store.patch(|inbox| {
            inbox.notifications.retain(|n| n.id != id);
            inbox.unread_count = inbox.notifications.iter().filter(|n| !n.read).count();
        });
        self.toaster.success("Notification deleted");
        Ok(())
    }

    pub fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
