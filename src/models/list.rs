use serde::{Deserialize, Serialize};

use super::{Capability, UserProfile};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub color: String,
    pub icon: String,
    pub is_default: bool,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Access granted on a list. Declaration order is capability order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListPermission {
    Viewer,
    Editor,
    Owner,
}

impl Capability for ListPermission {
    const LEVELS: &'static [Self] = &[ListPermission::Viewer, ListPermission::Editor, ListPermission::Owner];

    fn name(self) -> &'static str {
        self.as_str()
    }
}

impl ListPermission {
    pub fn as_str(self) -> &'static str {
        match self {
            ListPermission::Viewer => "viewer",
            ListPermission::Editor => "editor",
            ListPermission::Owner => "owner",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListShare {
    pub id: String,
    pub list_id: String,
    pub shared_with_user_id: Option<String>,
    pub shared_with_email: String,
    pub permission: ListPermission,
    pub invited_by: String,
    /// `None` while the invite is pending.
    pub accepted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl ListShare {
    pub fn is_pending(&self) -> bool {
        self.accepted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Viewing,
    Editing,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Viewing => "viewing",
            PresenceStatus::Editing => "editing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPresence {
    pub id: String,
    pub list_id: String,
    pub user_id: String,
    pub status: PresenceStatus,
    pub editing_todo_id: Option<String>,
    pub last_seen_at: i64,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl ListPresence {
    /// Whether the row was refreshed within `window_ms` of `now`.
    pub fn is_fresh(&self, now: i64, window_ms: i64) -> bool {
        now - self.last_seen_at <= window_ms
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateList {
    pub title: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateList {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareList {
    pub list_id: String,
    pub shared_with_email: String,
    pub permission: ListPermission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePresence {
    pub list_id: String,
    pub status: PresenceStatus,
    #[serde(default)]
    pub editing_todo_id: Option<String>,
}
