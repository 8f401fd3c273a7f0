use axum::extract::{Path, State};
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use tracing::info;

use super::{require_email, require_title};
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::{
    CreateList, List, ListPermission, ListPresence, ListShare, PresenceStatus, ShareList, UpdateList,
    UpdatePresence,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub shared_with_email: String,
    pub permission: ListPermission,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub permission: ListPermission,
}

#[derive(Debug, Deserialize)]
pub struct PresenceRequest {
    pub status: PresenceStatus,
    #[serde(default)]
    pub editing_todo_id: Option<String>,
}

pub async fn list_lists(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<List>>, AppError> {
    let lists = state.lists(user).get_lists().await?;
    info!(count = lists.len(), "Listed lists");
    Ok(Json(lists))
}

pub async fn create_new_list(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<CreateList>,
) -> Result<(StatusCode, Json<List>), AppError> {
    require_title(&req.title)?;
    let list = state.lists(user).create_list(req).await?;
    Ok((StatusCode::CREATED, Json(list)))
}

pub async fn get_single_list(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<List>, AppError> {
    match state.lists(user).get_list_by_id(&id).await? {
        Some(list) => Ok(Json(list)),
        None => Err(AppError::not_found("List")),
    }
}

pub async fn update_existing_list(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateList>,
) -> Result<Json<List>, AppError> {
    if let Some(ref title) = req.title {
        require_title(title)?;
    }
    Ok(Json(state.lists(user).update_list(&id, req).await?))
}

pub async fn delete_existing_list(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.lists(user).delete_list(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_shares(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ListShare>>, AppError> {
    Ok(Json(state.lists(user).get_list_shares(&id).await?))
}

pub async fn share(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ShareRequest>,
) -> Result<(StatusCode, Json<ListShare>), AppError> {
    require_email(&req.shared_with_email)?;
    let share = state
        .lists(user)
        .share_list(ShareList {
            list_id: id,
            shared_with_email: req.shared_with_email,
            permission: req.permission,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(share)))
}

pub async fn update_share(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PermissionRequest>,
) -> Result<Json<ListShare>, AppError> {
    let share = state
        .lists(user)
        .update_share_permission(&id, req.permission)
        .await?;
    Ok(Json(share))
}

pub async fn remove_share(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.lists(user).remove_share(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn accept_share(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListShare>, AppError> {
    Ok(Json(state.lists(user).accept_invite(&id).await?))
}

pub async fn list_presence(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ListPresence>>, AppError> {
    Ok(Json(state.lists(user).get_list_presence(&id).await?))
}

pub async fn update_presence(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PresenceRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .lists(user)
        .update_presence(UpdatePresence {
            list_id: id,
            status: req.status,
            editing_todo_id: req.editing_todo_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.lists(user).leave_list(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
