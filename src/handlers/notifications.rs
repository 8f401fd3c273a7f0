use axum::extract::{Path, State};
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::{Notification, UpdatePreferences, UserPreferences};
use crate::AppState;

pub async fn list_notifications(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(state.notifications(user).get_notifications().await?))
}

pub async fn read(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.notifications(user).mark_as_read(&id).await?))
}

pub async fn read_all(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let count = state.notifications(user).mark_all_as_read().await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn delete_existing_notification(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.notifications(user).delete_notification(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_preferences(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<UserPreferences>, AppError> {
    Ok(Json(state.preferences(user).get_preferences().await?))
}

pub async fn update_preferences(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<UpdatePreferences>,
) -> Result<Json<UserPreferences>, AppError> {
    Ok(Json(state.preferences(user).update_preferences(req).await?))
}
