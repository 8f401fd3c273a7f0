use axum::extract::{Path, State};
use axum::{http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::{generate_session_id, generate_token};
use crate::clock::now_millis;
use crate::config::SESSION_LIFETIME_DAYS;
use crate::db::{
    authenticate, create_api_token, create_session, create_user, delete_api_token, delete_session,
    list_api_tokens,
};
use crate::error::AppError;
use crate::middleware::SessionUser;
use crate::models::{ApiToken, CreateApiToken, Identity, LoginRequest, Session, SignupRequest, UserProfile};
use crate::AppState;

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<UserProfile>), AppError> {
    let user = create_user(
        state.backend.db(),
        &req.email,
        &req.password,
        req.display_name.as_deref(),
    )?;
    let identity = Identity {
        id: user.id.clone(),
        email: user.email.clone(),
    };
    let jar = start_session(&state, jar, &identity)?;
    Ok((StatusCode::CREATED, jar, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, impl IntoResponse), AppError> {
    let Some(identity) = authenticate(state.backend.db(), &req.email, &req.password)? else {
        warn!("Failed login attempt");
        return Err(AppError::Auth);
    };

    let jar = start_session(&state, jar, &identity)?;
    info!(user_id = %identity.id, "User logged in");

    Ok((jar, Json(json!({ "success": true, "user": identity }))))
}

fn start_session(state: &AppState, jar: CookieJar, identity: &Identity) -> Result<CookieJar, AppError> {
    let now = now_millis();
    let lifetime = time::Duration::days(SESSION_LIFETIME_DAYS);
    let session = Session {
        id: generate_session_id(),
        user_id: identity.id.clone(),
        created_at: now,
        expires_at: now + lifetime.whole_milliseconds() as i64,
    };
    create_session(state.backend.db(), &session)?;

    let cookie = Cookie::build(("session", session.id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(lifetime);

    Ok(jar.add(cookie))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, impl IntoResponse), AppError> {
    if let Some(session_cookie) = jar.get("session") {
        delete_session(state.backend.db(), session_cookie.value())?;
    }
    info!("User logged out");

    let cookie = Cookie::build(("session", ""))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(0));

    Ok((jar.remove(cookie), Json(json!({ "success": true }))))
}

pub async fn list_tokens(
    SessionUser(user): SessionUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ApiToken>>, AppError> {
    let tokens = list_api_tokens(state.backend.db(), &user.id)?;
    Ok(Json(tokens))
}

pub async fn create_token(
    SessionUser(user): SessionUser,
    State(state): State<AppState>,
    Json(req): Json<CreateApiToken>,
) -> Result<Json<ApiToken>, AppError> {
    let token_value = generate_token();
    let token = create_api_token(state.backend.db(), &user.id, &token_value, req.name.as_deref())?;
    info!(user_id = %user.id, name = ?req.name, "Created API token");
    Ok(Json(token))
}

pub async fn revoke_token(
    SessionUser(user): SessionUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if delete_api_token(state.backend.db(), &user.id, id)? {
        info!(id, "Revoked API token");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Token"))
    }
}
