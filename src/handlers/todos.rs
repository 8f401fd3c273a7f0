use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::{response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{require_email, require_title};
use crate::error::AppError;
use crate::geo::Coordinates;
use crate::middleware::CurrentUser;
use crate::models::{
    Attachment, BulkAction, BulkRequest, CompleteInstance, CreateTodo, ShareTodo, Todo, TodoPermission,
    TodoShare, UpdateTodo,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub shared_with_email: String,
    pub permission: TodoPermission,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub permission: TodoPermission,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lon: f64,
}

pub async fn list_todos(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(list_id): Path<String>,
) -> Result<Json<Vec<Todo>>, AppError> {
    let todos = state.todos(user).get_todos(Some(&list_id)).await?;
    info!(list_id, count = todos.len(), "Listed todos");
    Ok(Json(todos))
}

pub async fn create_new_todo(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(list_id): Path<String>,
    Json(mut req): Json<CreateTodo>,
) -> Result<(StatusCode, Json<Todo>), AppError> {
    require_title(&req.title)?;
    req.list_id = list_id;
    let todo = state.todos(user).create_todo(req).await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

pub async fn get_single_todo(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Todo>, AppError> {
    match state.todos(user).get_todo_by_id(&id).await? {
        Some(todo) => Ok(Json(todo)),
        None => Err(AppError::not_found("Todo")),
    }
}

pub async fn update_existing_todo(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTodo>,
) -> Result<Json<Todo>, AppError> {
    if let Some(ref title) = req.title {
        require_title(title)?;
    }
    Ok(Json(state.todos(user).update_todo(&id, req).await?))
}

pub async fn delete_existing_todo(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.todos(user).delete_todo(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Todo>, AppError> {
    Ok(Json(state.todos(user).toggle_todo(&id).await?))
}

pub async fn toggle_public(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Todo>, AppError> {
    Ok(Json(state.todos(user).toggle_public(&id).await?))
}

pub async fn bulk(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<BulkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let todos = state.todos(user);
    let count = match req.action {
        BulkAction::Complete => todos.bulk_complete(&req.ids).await?,
        BulkAction::Delete => todos.bulk_delete(&req.ids).await?,
        BulkAction::SetPriority { priority } => todos.bulk_set_priority(&req.ids, priority).await?,
        BulkAction::AddTag { tag } => todos.bulk_add_tag(&req.ids, &tag).await?,
    };
    Ok(Json(json!({ "count": count })))
}

pub async fn complete_instance(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CompleteInstance>,
) -> Result<Json<Todo>, AppError> {
    let todo = state
        .todos(user)
        .complete_recurring_instance(&id, &req.date)
        .await?;
    Ok(Json(todo))
}

/// Raw request body, named by the `x-file-name` header.
pub async fn upload_attachment(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Attachment>), AppError> {
    let file_name = headers
        .get("x-file-name")
        .and_then(|v| v.to_str().ok())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::validation("x-file-name header is required"))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let attachment = state
        .todos(user)
        .upload_attachment(&id, file_name, content_type, &body)
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn download_attachment(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((id, attachment_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let (attachment, data) = state.todos(user).read_attachment(&id, &attachment_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", attachment.file_name);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, attachment.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

pub async fn delete_attachment(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((id, attachment_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state.todos(user).delete_attachment(&id, &attachment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_shares(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TodoShare>>, AppError> {
    Ok(Json(state.todos(user).get_shares(&id).await?))
}

pub async fn share(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ShareRequest>,
) -> Result<(StatusCode, Json<TodoShare>), AppError> {
    require_email(&req.shared_with_email)?;
    let share = state
        .todos(user)
        .share_todo(ShareTodo {
            todo_id: id,
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
) -> Result<Json<TodoShare>, AppError> {
    let share = state
        .todos(user)
        .update_share_permission(&id, req.permission)
        .await?;
    Ok(Json(share))
}

pub async fn remove_share(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.todos(user).remove_share(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lists and open todos within the configured radius of `lat`/`lon`.
pub async fn nearby(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let at = Coordinates::new(query.lat, query.lon);
    if !at.is_valid() {
        return Err(AppError::validation("Coordinates are out of range"));
    }

    let geolocation = state.geolocation(user);
    let lists = geolocation.check_proximity_to_lists(at).await?;
    let todos = geolocation.check_proximity_to_todos(at).await?;
    Ok(Json(json!({ "lists": lists, "todos": todos })))
}
