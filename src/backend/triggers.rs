//! Side effects the store applies after a row is written.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use super::schema::Table;
use crate::clock::now_millis;
use crate::error::BackendError;
use crate::models::Identity;
use crate::realtime::{Change, ChangeKind};

pub(super) fn after_insert(
    conn: &Connection,
    table: Table,
    id: &str,
    actor: &Identity,
) -> Result<Vec<Change>, BackendError> {
    match table {
        Table::ListShares => share_created(conn, id, actor),
        _ => Ok(Vec::new()),
    }
}

/// Links the share to an existing account with the invited email and tells
/// that account about it. Invites to unknown emails stay unlinked until the
/// account signs up.
fn share_created(conn: &Connection, share_id: &str, actor: &Identity) -> Result<Vec<Change>, BackendError> {
    conn.execute(
        "UPDATE list_shares
         SET shared_with_user_id = (SELECT u.id FROM users u WHERE u.email = list_shares.shared_with_email)
         WHERE id = ?1 AND shared_with_user_id IS NULL",
        [share_id],
    )?;

    let target: Option<(Option<String>, String, String)> = conn
        .query_row(
            "SELECT s.shared_with_user_id, s.list_id, l.title
             FROM list_shares s JOIN lists l ON l.id = s.list_id
             WHERE s.id = ?1",
            [share_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((Some(user_id), list_id, title)) = target else {
        return Ok(Vec::new());
    };
    if user_id == actor.id {
        return Ok(Vec::new());
    }

    let notification_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications (id, user_id, type, title, body, read, action_url, created_at)
         VALUES (?1, ?2, 'shared_list', ?3, ?4, 0, ?5, ?6)",
        params![
            notification_id,
            user_id,
            "List shared with you",
            format!("{} shared \"{}\" with you", actor.email, title),
            format!("/lists/{list_id}"),
            now_millis(),
        ],
    )?;
    info!(share_id, user_id = %user_id, "Notified invitee");

    Ok(vec![Change {
        table: Table::Notifications,
        kind: ChangeKind::Insert,
        id: Some(notification_id),
        scope: Some(user_id),
    }])
}
