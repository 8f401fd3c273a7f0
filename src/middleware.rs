use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};
use tracing::warn;

use crate::backend::DbPool;
use crate::clock::now_millis;
use crate::db::{session_identity, token_identity};
use crate::error::AppError;
use crate::models::Identity;
use crate::AppState;

/// The caller, authenticated by session cookie or API token.
pub struct CurrentUser(pub Identity);

/// The caller, authenticated by session cookie only (no API tokens).
pub struct SessionUser(pub Identity);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let db = state.backend.db();
        if let Some(identity) = check_session(parts, db)? {
            return Ok(CurrentUser(identity));
        }

        if let Some(identity) = check_bearer_token(parts, db)? {
            return Ok(CurrentUser(identity));
        }

        warn!(path = %parts.uri.path(), "Unauthorized API access attempt");
        Err(AppError::Auth)
    }
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match check_session(parts, state.backend.db())? {
            Some(identity) => Ok(SessionUser(identity)),
            None => {
                warn!(path = %parts.uri.path(), "Session required");
                Err(AppError::Auth)
            }
        }
    }
}

fn check_session(parts: &Parts, db: &DbPool) -> Result<Option<Identity>, AppError> {
    let cookies = parts
        .headers
        .get_all("cookie")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|s| {
            let mut parts = s.trim().splitn(2, '=');
            Some((parts.next()?, parts.next()?))
        });

    let now = now_millis();
    for (name, value) in cookies {
        if name == "session" {
            if let Some(identity) = session_identity(db, value, now)? {
                return Ok(Some(identity));
            }
        }
    }
    Ok(None)
}

fn check_bearer_token(parts: &Parts, db: &DbPool) -> Result<Option<Identity>, AppError> {
    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    match token {
        Some(token) => token_identity(db, token),
        None => Ok(None),
    }
}
