//! Accounts, sessions and API tokens. These tables sit outside the adapter's
//! catalogue and are only reached by the HTTP layer and the seeder.

use std::sync::MutexGuard;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, normalize_email, verify_password};
use crate::backend::DbPool;
use crate::clock::now_millis;
use crate::error::AppError;
use crate::models::{ApiToken, Identity, Session, UserProfile};

fn lock(pool: &DbPool) -> Result<MutexGuard<'_, Connection>, AppError> {
    pool.lock()
        .map_err(|_| AppError::Backend("database connection poisoned".into()))
}

// User operations
pub fn create_user(
    pool: &DbPool,
    email: &str,
    password: &str,
    display_name: Option<&str>,
) -> Result<UserProfile, AppError> {
    let email = normalize_email(email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("A valid email is required"));
    }
    if password.is_empty() {
        return Err(AppError::validation("Password cannot be empty"));
    }
    let password_hash =
        hash_password(password).map_err(|e| AppError::Backend(format!("hashing password: {e}")))?;

    let conn = lock(pool)?;
    let taken: Option<String> = conn
        .query_row("SELECT id FROM users WHERE email = ?1", [&email], |row| row.get(0))
        .optional()?;
    if taken.is_some() {
        return Err(AppError::validation("Email is already registered"));
    }

    let user = UserProfile {
        id: Uuid::new_v4().to_string(),
        email,
        display_name: display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        avatar_url: None,
        created_at: now_millis(),
    };
    conn.execute(
        "INSERT INTO users (id, email, display_name, avatar_url, password_hash, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
        params![user.id, user.email, user.display_name, password_hash, user.created_at],
    )?;

    // Invites sent before the account existed now belong to it.
    let linked = conn.execute(
        "UPDATE list_shares SET shared_with_user_id = ?1
         WHERE shared_with_email = ?2 AND shared_with_user_id IS NULL",
        params![user.id, user.email],
    )?;
    info!(id = %user.id, linked, "Created user");

    Ok(user)
}

/// Checks credentials and returns the matching identity.
pub fn authenticate(pool: &DbPool, email: &str, password: &str) -> Result<Option<Identity>, AppError> {
    let conn = lock(pool)?;
    let found: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, email, password_hash FROM users WHERE email = ?1",
            [normalize_email(email)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    Ok(found
        .filter(|(_, _, hash)| verify_password(password, hash))
        .map(|(id, email, _)| Identity { id, email }))
}

pub fn get_user_by_email(pool: &DbPool, email: &str) -> Result<Option<UserProfile>, AppError> {
    let conn = lock(pool)?;
    let user = conn
        .query_row(
            "SELECT id, email, display_name, avatar_url, created_at FROM users WHERE email = ?1",
            [normalize_email(email)],
            |row| {
                Ok(UserProfile {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    display_name: row.get(2)?,
                    avatar_url: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

fn identity_by_id(conn: &Connection, user_id: &str) -> Result<Option<Identity>, AppError> {
    let identity = conn
        .query_row("SELECT id, email FROM users WHERE id = ?1", [user_id], |row| {
            Ok(Identity {
                id: row.get(0)?,
                email: row.get(1)?,
            })
        })
        .optional()?;
    Ok(identity)
}

// Session operations
pub fn create_session(pool: &DbPool, session: &Session) -> Result<(), AppError> {
    let conn = lock(pool)?;
    conn.execute(
        "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![session.id, session.user_id, session.created_at, session.expires_at],
    )?;
    Ok(())
}

/// Resolves an unexpired session to its user.
pub fn session_identity(pool: &DbPool, id: &str, now: i64) -> Result<Option<Identity>, AppError> {
    let conn = lock(pool)?;
    let user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM sessions WHERE id = ?1 AND expires_at > ?2",
            params![id, now],
            |row| row.get(0),
        )
        .optional()?;
    match user_id {
        Some(user_id) => identity_by_id(&conn, &user_id),
        None => Ok(None),
    }
}

pub fn delete_session(pool: &DbPool, id: &str) -> Result<(), AppError> {
    let conn = lock(pool)?;
    conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
    Ok(())
}

pub fn cleanup_expired_sessions(pool: &DbPool, now: i64) -> Result<usize, AppError> {
    let conn = lock(pool)?;
    Ok(conn.execute("DELETE FROM sessions WHERE expires_at < ?1", [now])?)
}

// API Token operations
pub fn create_api_token(
    pool: &DbPool,
    user_id: &str,
    token: &str,
    name: Option<&str>,
) -> Result<ApiToken, AppError> {
    let conn = lock(pool)?;
    conn.execute(
        "INSERT INTO api_tokens (user_id, token, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, token, name, now_millis()],
    )?;
    let id = conn.last_insert_rowid();

    let mut stmt = conn.prepare("SELECT id, token, name, created_at FROM api_tokens WHERE id = ?1")?;
    let token = stmt.query_row([id], read_token)?;
    Ok(token)
}

pub fn token_identity(pool: &DbPool, token: &str) -> Result<Option<Identity>, AppError> {
    let conn = lock(pool)?;
    let user_id: Option<String> = conn
        .query_row("SELECT user_id FROM api_tokens WHERE token = ?1", [token], |row| {
            row.get(0)
        })
        .optional()?;
    match user_id {
        Some(user_id) => identity_by_id(&conn, &user_id),
        None => Ok(None),
    }
}

pub fn list_api_tokens(pool: &DbPool, user_id: &str) -> Result<Vec<ApiToken>, AppError> {
    let conn = lock(pool)?;
    let mut stmt = conn.prepare(
        "SELECT id, token, name, created_at FROM api_tokens WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC",
    )?;
    let tokens = stmt
        .query_map([user_id], read_token)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tokens)
}

pub fn delete_api_token(pool: &DbPool, user_id: &str, id: i64) -> Result<bool, AppError> {
    let conn = lock(pool)?;
    let rows = conn.execute(
        "DELETE FROM api_tokens WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    Ok(rows > 0)
}

fn read_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiToken> {
    Ok(ApiToken {
        id: row.get(0)?,
        token: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}
