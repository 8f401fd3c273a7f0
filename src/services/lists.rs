//! Lists service
//!
//! List CRUD, the share lifecycle (invite, change permission, revoke,
//! accept) and per-list presence.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::{find_profile, profiles, require_user, watch};
use crate::backend::{procedure, Adapter, AdapterExt, Query, Table};
use crate::config::{DEFAULT_LIST_COLOR, DEFAULT_LIST_ICON};
use crate::error::AppError;
use crate::models::{
    CreateList, List, ListPermission, ListPresence, ListShare, ShareList, UpdateList, UpdatePresence,
};
use crate::realtime::{topic, Subscription};

#[derive(Clone)]
pub struct ListService {
    backend: Arc<dyn Adapter>,
}

impl ListService {
    pub fn new(backend: Arc<dyn Adapter>) -> Self {
        Self { backend }
    }

    /// Lists visible to the caller: the default list first, then by
    /// position, newest first among equal positions.
    pub async fn get_lists(&self) -> Result<Vec<List>, AppError> {
        require_user(self.backend.as_ref())?;
        fetch_lists(self.backend.as_ref())
    }

    pub async fn get_list_by_id(&self, id: &str) -> Result<Option<List>, AppError> {
        Ok(self.backend.select_by_id(Table::Lists, id)?)
    }

    pub async fn create_list(&self, input: CreateList) -> Result<List, AppError> {
        require_user(self.backend.as_ref())?;
        let fields = json!({
            "title": input.title,
            "description": input.description.unwrap_or_default(),
            "color": input.color.unwrap_or_else(|| DEFAULT_LIST_COLOR.to_string()),
            "icon": input.icon.unwrap_or_else(|| DEFAULT_LIST_ICON.to_string()),
            "is_default": false,
            "position": self.backend.positions().next(),
        });

        let list: List = self.backend.insert_as(Table::Lists, fields)?;
        info!(id = %list.id, title = %list.title, "Created list");
        Ok(list)
    }

    pub async fn update_list(&self, id: &str, input: UpdateList) -> Result<List, AppError> {
        let list: List = self.backend.update_as(Table::Lists, id, input)?;
        info!(id = %list.id, "Updated list");
        Ok(list)
    }

    /// Deleting a list removes its todos, shares and presence rows with it.
    pub async fn delete_list(&self, id: &str) -> Result<(), AppError> {
        self.backend.remove(Table::Lists, id)?;
        info!(id, "Deleted list");
        Ok(())
    }

    /// Shares of a list, newest first, with the invitee's profile attached
    /// once the invite is linked to an account.
    pub async fn get_list_shares(&self, list_id: &str) -> Result<Vec<ListShare>, AppError> {
        fetch_shares(self.backend.as_ref(), list_id)
    }

    /// Invites `shared_with_email`. The share stays pending until accepted.
    pub async fn share_list(&self, input: ShareList) -> Result<ListShare, AppError> {
        require_user(self.backend.as_ref())?;
        let email = input.shared_with_email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::validation("Email cannot be empty"));
        }

        let share: ListShare = self.backend.insert_as(
            Table::ListShares,
            json!({
                "list_id": input.list_id,
                "shared_with_email": email,
                "permission": input.permission,
                "accepted_at": null,
            }),
        )?;
        info!(id = %share.id, list_id = %share.list_id, permission = share.permission.as_str(), "Shared list");
        Ok(share)
    }

    pub async fn update_share_permission(
        &self,
        share_id: &str,
        permission: ListPermission,
    ) -> Result<ListShare, AppError> {
        let share: ListShare =
            self.backend
                .update_as(Table::ListShares, share_id, json!({ "permission": permission }))?;
        info!(id = share_id, permission = permission.as_str(), "Updated share permission");
        Ok(share)
    }

    pub async fn remove_share(&self, share_id: &str) -> Result<(), AppError> {
        self.backend.remove(Table::ListShares, share_id)?;
        info!(id = share_id, "Removed share");
        Ok(())
    }

    pub async fn accept_invite(&self, share_id: &str) -> Result<ListShare, AppError> {
        let share: ListShare = self
            .backend
            .call(procedure::ACCEPT_SHARE, json!({ "p_share_id": share_id }))?;
        info!(id = share_id, list_id = %share.list_id, "Accepted invite");
        Ok(share)
    }

    /// Records that the caller is viewing or editing the list. Repeated
    /// calls refresh the same row.
    pub async fn update_presence(&self, input: UpdatePresence) -> Result<(), AppError> {
        let user = require_user(self.backend.as_ref())?;
        let _: Value = self.backend.call(
            procedure::UPSERT_PRESENCE,
            json!({
                "p_list_id": input.list_id,
                "p_user_id": user.id,
                "p_status": input.status,
                "p_editing_todo_id": input.editing_todo_id,
            }),
        )?;
        debug!(list_id = %input.list_id, status = input.status.as_str(), "Updated presence");
        Ok(())
    }

    /// Presence rows for the list, most recently seen first. Stale rows are
    /// included; readers filter by their own freshness window.
    pub async fn get_list_presence(&self, list_id: &str) -> Result<Vec<ListPresence>, AppError> {
        fetch_presence(self.backend.as_ref(), list_id)
    }

    pub async fn leave_list(&self, list_id: &str) -> Result<(), AppError> {
        let user = require_user(self.backend.as_ref())?;
        let _: Value = self.backend.call(
            procedure::DELETE_PRESENCE,
            json!({ "p_list_id": list_id, "p_user_id": user.id }),
        )?;
        debug!(list_id, "Left list");
        Ok(())
    }

    pub fn subscribe_to_lists<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Vec<List>) + Send + Sync + 'static,
    {
        watch(&self.backend, topic(Table::Lists, None), fetch_lists, callback)
    }

    pub fn subscribe_to_list_presence<F>(&self, list_id: &str, callback: F) -> Subscription
    where
        F: Fn(Vec<ListPresence>) + Send + Sync + 'static,
    {
        let id = list_id.to_string();
        watch(
            &self.backend,
            topic(Table::ListPresence, Some(list_id)),
            move |backend| fetch_presence(backend, &id),
            callback,
        )
    }

    pub fn subscribe_to_list_shares<F>(&self, list_id: &str, callback: F) -> Subscription
    where
        F: Fn(Vec<ListShare>) + Send + Sync + 'static,
    {
        let id = list_id.to_string();
        watch(
            &self.backend,
            topic(Table::ListShares, Some(list_id)),
            move |backend| fetch_shares(backend, &id),
            callback,
        )
    }
}

fn fetch_lists(backend: &dyn Adapter) -> Result<Vec<List>, AppError> {
    let query = Query::new()
        .desc("is_default")
        .asc("position")
        .desc("created_at")
        .asc("id");
    Ok(backend.select(Table::Lists, &query)?)
}

fn fetch_shares(backend: &dyn Adapter, list_id: &str) -> Result<Vec<ListShare>, AppError> {
    let query = Query::new().filter("list_id", list_id).desc("created_at");
    let mut shares: Vec<ListShare> = backend.select(Table::ListShares, &query)?;

    let ids = shares
        .iter()
        .filter_map(|s| s.shared_with_user_id.clone())
        .collect();
    let users = profiles(backend, ids)?;
    for share in &mut shares {
        share.user = find_profile(&users, share.shared_with_user_id.as_deref());
    }
    Ok(shares)
}

fn fetch_presence(backend: &dyn Adapter, list_id: &str) -> Result<Vec<ListPresence>, AppError> {
    let query = Query::new().filter("list_id", list_id).desc("last_seen_at");
    let mut presence: Vec<ListPresence> = backend.select(Table::ListPresence, &query)?;

    let ids = presence.iter().map(|p| p.user_id.clone()).collect();
    let users = profiles(backend, ids)?;
    for row in &mut presence {
        row.user = find_profile(&users, Some(&row.user_id));
    }
    Ok(presence)
}
