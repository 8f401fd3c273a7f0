use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use super::{require_user, watch};
use crate::backend::{procedure, to_row, Adapter, AdapterExt, Table};
use crate::error::AppError;
use crate::models::{UpdatePreferences, UserPreferences};
use crate::realtime::{topic, Subscription};

#[derive(Clone)]
pub struct PreferencesService {
    backend: Arc<dyn Adapter>,
}

impl PreferencesService {
    pub fn new(backend: Arc<dyn Adapter>) -> Self {
        Self { backend }
    }

    /// The stored preferences, or the defaults when none were saved yet.
    pub async fn get_preferences(&self) -> Result<UserPreferences, AppError> {
        fetch_preferences(self.backend.as_ref())
    }

    /// Applies `input` over the stored row, creating it on first save.
    pub async fn update_preferences(&self, input: UpdatePreferences) -> Result<UserPreferences, AppError> {
        let user = require_user(self.backend.as_ref())?;
        let changes = to_row(&input)?;

        let _: Value = self.backend.call(procedure::ENSURE_PREFERENCES, json!({}))?;
        let saved: UserPreferences =
            self.backend
                .update_as(Table::UserPreferences, &user.id, Value::Object(changes))?;
        info!(user_id = %user.id, "Saved preferences");
        Ok(saved)
    }

    pub fn subscribe_to_preferences<F>(&self, callback: F) -> Result<Subscription, AppError>
    where
        F: Fn(UserPreferences) + Send + Sync + 'static,
    {
        let user = require_user(self.backend.as_ref())?;
        Ok(watch(
            &self.backend,
            topic(Table::UserPreferences, Some(&user.id)),
            fetch_preferences,
            callback,
        ))
    }
}

fn fetch_preferences(backend: &dyn Adapter) -> Result<UserPreferences, AppError> {
    let user = require_user(backend)?;
    Ok(backend
        .select_by_id(Table::UserPreferences, &user.id)?
        .unwrap_or_else(|| UserPreferences::defaults_for(user.id)))
}
