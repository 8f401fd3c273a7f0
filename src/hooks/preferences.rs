use std::sync::Arc;

use tracing::{debug, warn};

use super::{HookState, Store, Toaster};
use crate::models::{Theme, TimeFormat, UpdatePreferences, UserPreferences};
use crate::realtime::Subscription;
use crate::services::PreferencesService;

/// The caller's display preferences. A failed load is not reported to the
/// user; the data simply stays `None`.
pub struct PreferencesHook {
    service: PreferencesService,
    toaster: Arc<dyn Toaster>,
    store: Store<Option<UserPreferences>>,
    subscription: Option<Subscription>,
}

impl PreferencesHook {
    pub async fn mount(service: PreferencesService, toaster: Arc<dyn Toaster>) -> Self {
        let store = Store::new(None);
        let pushes = store.clone();
        let subscription = service
            .subscribe_to_preferences(move |prefs| pushes.push(Some(prefs)))
            .inspect_err(|err| debug!(error = %err, "Preferences not subscribed"))
            .ok();

        let hook = Self {
            service,
            toaster,
            store,
            subscription,
        };
        hook.refetch().await;
        hook
    }

    pub fn state(&self) -> HookState<Option<UserPreferences>> {
        self.store.snapshot()
    }

    pub fn preferences(&self) -> Option<UserPreferences> {
        self.store.data()
    }

    pub async fn refetch(&self) -> bool {
        let service = self.service.clone();
        self.store
            .load(None, async move { service.get_preferences().await.map(Some) })
            .await
    }

    pub async fn update_preferences(&self, input: UpdatePreferences) -> Option<UserPreferences> {
        match self.service.update_preferences(input).await {
            Ok(saved) => {
                self.store.patch(|prefs| *prefs = Some(saved.clone()));
                self.toaster.success("Preferences updated");
                Some(saved)
            }
            Err(err) => {
                warn!(error = %err, "Could not save preferences");
                self.toaster.error(err.to_string());
                None
            }
        }
    }

    pub async fn set_time_format(&self, time_format: TimeFormat) -> Option<UserPreferences> {
        self.update_preferences(UpdatePreferences {
            time_format: Some(time_format),
            ..Default::default()
        })
        .await
    }

    pub async fn set_auto_hide_completed(&self, enabled: bool) -> Option<UserPreferences> {
        self.update_preferences(UpdatePreferences {
            auto_hide_completed: Some(enabled),
            ..Default::default()
        })
        .await
    }

    pub async fn set_theme_preference(&self, theme: Theme) -> Option<UserPreferences> {
        self.update_preferences(UpdatePreferences {
            theme_preference: Some(theme),
            ..Default::default()
        })
        .await
    }

    pub async fn set_default_list(&self, list_id: Option<&str>) -> Option<UserPreferences> {
        self.update_preferences(UpdatePreferences {
            default_list_id: Some(list_id.map(str::to_string)),
            ..Default::default()
        })
        .await
    }

    pub fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
