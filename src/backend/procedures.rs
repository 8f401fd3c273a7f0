//! Server-side procedures. Each runs under the connection lock, so its
//! reads and writes are atomic with respect to every other adapter call.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use super::policy::{policy, visible_list};
use super::procedure;
use super::schema::Table;
use super::sqlite::{
    bind, caller_params, change_for, execute, fetch_unchecked, holds, missing_or_denied, select,
};
use super::{Query, Row};
use crate::clock::now_millis;
use crate::error::BackendError;
use crate::geo::Coordinates;
use crate::models::Identity;
use crate::realtime::{Change, ChangeKind};
use crate::recurrence::{format_date, parse_date, RecurrenceRule};

type Outcome = Result<(Value, Vec<Change>), BackendError>;

pub(super) fn call(conn: &Connection, identity: Option<&Identity>, name: &str, params: &Row) -> Outcome {
    let identity = identity.ok_or(BackendError::Unauthenticated)?;
    match name {
        procedure::UPSERT_PRESENCE => upsert_presence(conn, identity, params),
        procedure::DELETE_PRESENCE => delete_presence(conn, identity, params),
        procedure::TOGGLE_TODO_FLAG => toggle_todo_flag(conn, identity, params),
        procedure::COMPLETE_RECURRING_INSTANCE => complete_recurring_instance(conn, identity, params),
        procedure::NEARBY_TODOS => {
            let todos = nearby_todos(conn, identity, params)?;
            Ok((Value::Array(todos.into_iter().map(|(_, row)| Value::Object(row)).collect()), Vec::new()))
        }
        procedure::NEARBY_LISTS => nearby_lists(conn, identity, params),
        procedure::MARK_ALL_NOTIFICATIONS_READ => mark_all_notifications_read(conn, identity),
        procedure::ACCEPT_SHARE => accept_share(conn, identity, params),
        procedure::ENSURE_PREFERENCES => ensure_preferences(conn, identity),
        other => Err(BackendError::UnknownProcedure(other.to_string())),
    }
}

fn text<'a>(params: &'a Row, name: &str) -> Result<&'a str, BackendError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::InvalidParams(format!("{name} is required")))
}

fn number(params: &Row, name: &str) -> Result<f64, BackendError> {
    params
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| BackendError::InvalidParams(format!("{name} must be a number")))
}

/// Presence rows may only be written for the caller.
fn check_self(identity: &Identity, params: &Row) -> Result<(), BackendError> {
    if text(params, "p_user_id")? != identity.id {
        return Err(BackendError::Policy(Table::ListPresence.name()));
    }
    Ok(())
}

fn upsert_presence(conn: &Connection, identity: &Identity, params: &Row) -> Outcome {
    check_self(identity, params)?;
    let list_id = text(params, "p_list_id")?;
    let status = text(params, "p_status")?;
    if !matches!(status, "viewing" | "editing") {
        return Err(BackendError::InvalidParams(format!("unknown presence status {status:?}")));
    }
    let editing = params.get("p_editing_todo_id").and_then(Value::as_str);

    let mut args = caller_params(Some(identity));
    args.push(SqlValue::Text(list_id.to_string()));
    if !holds(conn, &visible_list("?3"), &args)? {
        return Err(BackendError::Policy(Table::ListPresence.name()));
    }

    let id: String = conn.query_row(
        "INSERT INTO list_presence (id, list_id, user_id, status, editing_todo_id, last_seen_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT (list_id, user_id) DO UPDATE SET
             status = excluded.status,
             editing_todo_id = excluded.editing_todo_id,
             last_seen_at = excluded.last_seen_at
         RETURNING id",
        params![
            Uuid::new_v4().to_string(),
            list_id,
            identity.id,
            status,
            editing,
            now_millis()
        ],
        |row| row.get(0),
    )?;

    Ok((
        Value::Null,
        vec![Change {
            table: Table::ListPresence,
            kind: ChangeKind::Update,
            id: Some(id),
            scope: Some(list_id.to_string()),
        }],
    ))
}

fn delete_presence(conn: &Connection, identity: &Identity, params: &Row) -> Outcome {
    check_self(identity, params)?;
    let list_id = text(params, "p_list_id")?;

    let removed: Option<String> = conn
        .query_row(
            "DELETE FROM list_presence WHERE list_id = ?1 AND user_id = ?2 RETURNING id",
            params![list_id, identity.id],
            |row| row.get(0),
        )
        .optional()?;

    let changes = removed
        .map(|id| Change {
            table: Table::ListPresence,
            kind: ChangeKind::Delete,
            id: Some(id),
            scope: Some(list_id.to_string()),
        })
        .into_iter()
        .collect();
    Ok((Value::Null, changes))
}

/// Stamps `accepted_at` on a share addressed to the caller and links it to
/// their account. No other column of the share changes.
fn accept_share(conn: &Connection, identity: &Identity, params: &Row) -> Outcome {
    let share_id = text(params, "p_share_id")?;

    let mut args = caller_params(Some(identity));
    let now = bind(&mut args, SqlValue::Integer(now_millis()));
    let id = bind(&mut args, SqlValue::Text(share_id.to_string()));
    let sql = format!(
        "UPDATE list_shares SET accepted_at = COALESCE(accepted_at, {now}), \
         shared_with_user_id = COALESCE(shared_with_user_id, ?1), updated_at = {now} \
         WHERE id = {id} AND (shared_with_user_id = ?1 OR shared_with_email = ?2)"
    );
    if execute(conn, &sql, &args)? == 0 {
        return Err(missing_or_denied(conn, Table::ListShares, share_id, Some(identity))?);
    }

    let row = fetch_unchecked(conn, Table::ListShares, share_id)?.ok_or_else(|| BackendError::RowNotFound {
        table: Table::ListShares.name(),
        id: share_id.to_string(),
    })?;
    let change = change_for(Table::ListShares, ChangeKind::Update, &row);
    Ok((Value::Object(row), vec![change]))
}

/// Creates the caller's preferences row with column defaults unless one
/// already exists.
fn ensure_preferences(conn: &Connection, identity: &Identity) -> Outcome {
    let created: Option<String> = conn
        .query_row(
            "INSERT INTO user_preferences (user_id, updated_at) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING user_id",
            params![identity.id, now_millis()],
            |row| row.get(0),
        )
        .optional()?;

    let changes = created
        .map(|user_id| Change {
            table: Table::UserPreferences,
            kind: ChangeKind::Insert,
            id: Some(user_id.clone()),
            scope: Some(user_id),
        })
        .into_iter()
        .collect();
    Ok((Value::Null, changes))
}

/// Flips a boolean column of a todo in place. Returns the updated row, or
/// `null` when the todo does not exist.
fn toggle_todo_flag(conn: &Connection, identity: &Identity, params: &Row) -> Outcome {
    let todo_id = text(params, "p_todo_id")?;
    let flag = match text(params, "p_flag")? {
        "completed" => "completed",
        "is_public" => "is_public",
        other => return Err(BackendError::InvalidParams(format!("{other} cannot be toggled"))),
    };

    let mut args = caller_params(Some(identity));
    let now = bind(&mut args, SqlValue::Integer(now_millis()));
    let id = bind(&mut args, SqlValue::Text(todo_id.to_string()));
    let sql = format!(
        "UPDATE todos SET {flag} = 1 - {flag}, updated_at = {now} WHERE todos.id = {id} AND ({})",
        policy(Table::Todos).update
    );

    if execute(conn, &sql, &args)? == 0 {
        return match missing_or_denied(conn, Table::Todos, todo_id, Some(identity))? {
            BackendError::RowNotFound { .. } => Ok((Value::Null, Vec::new())),
            denied => Err(denied),
        };
    }

    let row = fetch_unchecked(conn, Table::Todos, todo_id)?.ok_or_else(|| BackendError::RowNotFound {
        table: Table::Todos.name(),
        id: todo_id.to_string(),
    })?;
    let change = change_for(Table::Todos, ChangeKind::Update, &row);
    Ok((Value::Object(row), vec![change]))
}

/// Records one completed occurrence of a recurring todo and moves its due
/// date to the next occurrence. Completing the same date twice is a no-op
/// apart from the due date check.
fn complete_recurring_instance(conn: &Connection, identity: &Identity, params: &Row) -> Outcome {
    let todo_id = text(params, "p_todo_id")?;
    let date = parse_date(text(params, "p_date")?).map_err(|e| BackendError::InvalidParams(e.to_string()))?;

    let mut args = caller_params(Some(identity));
    args.push(SqlValue::Text(todo_id.to_string()));
    let editable = format!(
        "EXISTS (SELECT 1 FROM todos WHERE todos.id = ?3 AND ({}))",
        policy(Table::Todos).update
    );
    if !holds(conn, &editable, &args)? {
        return Err(missing_or_denied(conn, Table::Todos, todo_id, Some(identity))?);
    }

    let todo = fetch_unchecked(conn, Table::Todos, todo_id)?.ok_or_else(|| BackendError::RowNotFound {
        table: Table::Todos.name(),
        id: todo_id.to_string(),
    })?;
    let rule: RecurrenceRule = todo
        .get("recurrence_rule")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::InvalidParams("todo does not recur".into()))?
        .parse()
        .map_err(|e: crate::recurrence::RecurrenceError| BackendError::InvalidParams(e.to_string()))?;

    let now = now_millis();
    conn.execute(
        "INSERT OR IGNORE INTO recurring_completions (id, todo_id, instance_date, completed_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![Uuid::new_v4().to_string(), todo_id, format_date(date), now],
    )?;

    let current_due = todo
        .get("due_date")
        .and_then(Value::as_str)
        .and_then(|d| parse_date(d).ok());
    let next = rule.next_after(date);
    let next_due = match current_due {
        Some(due) if due > next => due,
        _ => next,
    };
    conn.execute(
        "UPDATE todos SET due_date = ?1, updated_at = ?2 WHERE id = ?3",
        params![format_date(next_due), now, todo_id],
    )?;

    let row = fetch_unchecked(conn, Table::Todos, todo_id)?.ok_or_else(|| BackendError::RowNotFound {
        table: Table::Todos.name(),
        id: todo_id.to_string(),
    })?;
    let change = change_for(Table::Todos, ChangeKind::Update, &row);
    Ok((Value::Object(row), vec![change]))
}

/// Open todos visible to the caller within the radius, nearest first.
fn nearby_todos(conn: &Connection, identity: &Identity, params: &Row) -> Result<Vec<(f64, Row)>, BackendError> {
    let origin = Coordinates::new(number(params, "p_latitude")?, number(params, "p_longitude")?);
    let radius = number(params, "p_radius_m")?;
    if !origin.is_valid() || radius <= 0.0 {
        return Err(BackendError::InvalidParams("coordinates or radius out of range".into()));
    }

    let query = Query::new().filter("completed", false);
    let mut hits: Vec<(f64, Row)> = select(conn, Table::Todos, Some(identity), &query)?
        .into_iter()
        .filter_map(|row| {
            let lat = row.get("latitude")?.as_f64()?;
            let lon = row.get("longitude")?.as_f64()?;
            let distance = origin.distance_m(&Coordinates::new(lat, lon));
            (distance <= radius).then_some((distance, row))
        })
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(hits)
}

/// Lists holding at least one nearby todo, ordered by their nearest todo.
fn nearby_lists(conn: &Connection, identity: &Identity, params: &Row) -> Outcome {
    let mut list_ids: Vec<String> = Vec::new();
    for (_, todo) in nearby_todos(conn, identity, params)? {
        if let Some(list_id) = todo.get("list_id").and_then(Value::as_str) {
            if !list_ids.iter().any(|id| id == list_id) {
                list_ids.push(list_id.to_string());
            }
        }
    }

    let query = Query::new().filter_in("id", list_ids.iter().cloned());
    let mut lists = select(conn, Table::Lists, Some(identity), &query)?;
    lists.sort_by_key(|row| {
        let id = row.get("id").and_then(Value::as_str).unwrap_or_default();
        list_ids.iter().position(|l| l == id).unwrap_or(usize::MAX)
    });

    Ok((Value::Array(lists.into_iter().map(Value::Object).collect()), Vec::new()))
}

fn mark_all_notifications_read(conn: &Connection, identity: &Identity) -> Outcome {
    let changed = conn.execute(
        "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
        [&identity.id],
    )?;

    let changes = if changed > 0 {
        vec![Change {
            table: Table::Notifications,
            kind: ChangeKind::Update,
            id: None,
            scope: Some(identity.id.clone()),
        }]
    } else {
        Vec::new()
    };
    Ok((Value::from(changed), changes))
}
