//! Row-visibility rules evaluated on every adapter call.
//!
//! Predicates are SQL fragments. `?1` is bound to the caller's user id and
//! `?2` to the caller's email (both NULL for anonymous callers, which makes
//! every comparison false). Insert guards additionally bind the parent row
//! id to `?3`.

use super::schema::Table;
use crate::models::{Capability, ListPermission, TodoPermission};

pub(super) enum InsertGuard {
    Deny,
    /// Only the owner column check applies.
    Owner,
    /// `check` must hold for the id found in `column` of the new row.
    Parent {
        column: &'static str,
        check: String,
    },
}

pub(super) struct Policy {
    pub read: String,
    pub update: String,
    pub delete: String,
    pub insert: InsertGuard,
}

/// SQL list of the stored permission names that grant `required`.
fn granting<P: Capability>(required: P) -> String {
    P::at_least(required)
        .into_iter()
        .map(|level| format!("'{}'", level.name()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The list is owned by the caller or shared with them (pending or accepted).
pub(super) fn visible_list(list_id: &str) -> String {
    format!(
        "(EXISTS (SELECT 1 FROM lists vl WHERE vl.id = {list_id} AND vl.user_id = ?1) \
         OR EXISTS (SELECT 1 FROM list_shares vs WHERE vs.list_id = {list_id} \
         AND (vs.shared_with_user_id = ?1 OR vs.shared_with_email = ?2)))"
    )
}

/// The caller owns the list or holds an accepted share granting `required`.
pub(super) fn list_role(list_id: &str, required: ListPermission) -> String {
    let roles = granting(required);
    format!(
        "(EXISTS (SELECT 1 FROM lists rl WHERE rl.id = {list_id} AND rl.user_id = ?1) \
         OR EXISTS (SELECT 1 FROM list_shares rs WHERE rs.list_id = {list_id} \
         AND (rs.shared_with_user_id = ?1 OR rs.shared_with_email = ?2) \
         AND rs.accepted_at IS NOT NULL AND rs.permission IN ({roles})))"
    )
}

pub(super) fn editable_list(list_id: &str) -> String {
    list_role(list_id, ListPermission::Editor)
}

fn todo_owned(todo_id: &str) -> String {
    format!("EXISTS (SELECT 1 FROM todos ot WHERE ot.id = {todo_id} AND ot.user_id = ?1)")
}

pub(super) fn policy(table: Table) -> Policy {
    match table {
        Table::Lists => Policy {
            read: visible_list("lists.id"),
            update: editable_list("lists.id"),
            delete: "lists.user_id = ?1".into(),
            insert: InsertGuard::Owner,
        },
        // Invitees accept through a procedure; they may only decline here.
        Table::ListShares => {
            let owner = list_role("list_shares.list_id", ListPermission::Owner);
            Policy {
                read: visible_list("list_shares.list_id"),
                delete: format!(
                    "({owner} OR list_shares.shared_with_user_id = ?1 OR list_shares.shared_with_email = ?2)"
                ),
                update: owner,
                insert: InsertGuard::Parent {
                    column: "list_id",
                    check: list_role("?3", ListPermission::Owner),
                },
            }
        }
        Table::ListPresence => Policy {
            read: visible_list("list_presence.list_id"),
            update: "list_presence.user_id = ?1".into(),
            delete: "list_presence.user_id = ?1".into(),
            insert: InsertGuard::Parent {
                column: "list_id",
                check: visible_list("?3"),
            },
        },
        Table::Todos => {
            let shared = |extra: &str| {
                format!(
                    "EXISTS (SELECT 1 FROM todo_shares ts WHERE ts.todo_id = todos.id \
                     AND ts.shared_with_email = ?2{extra})"
                )
            };
            Policy {
                read: format!(
                    "(todos.user_id = ?1 OR (todos.is_public = 1 AND ?1 IS NOT NULL) OR {} OR {})",
                    visible_list("todos.list_id"),
                    shared("")
                ),
                update: format!(
                    "(todos.user_id = ?1 OR {} OR {})",
                    editable_list("todos.list_id"),
                    shared(format!(" AND ts.permission IN ({})", granting(TodoPermission::Edit)).as_str())
                ),
                delete: format!(
                    "(todos.user_id = ?1 OR {})",
                    editable_list("todos.list_id")
                ),
                insert: InsertGuard::Parent {
                    column: "list_id",
                    check: editable_list("?3"),
                },
            }
        }
        Table::TodoShares => Policy {
            read: format!(
                "({} OR todo_shares.shared_with_email = ?2)",
                todo_owned("todo_shares.todo_id")
            ),
            update: todo_owned("todo_shares.todo_id"),
            delete: todo_owned("todo_shares.todo_id"),
            insert: InsertGuard::Parent {
                column: "todo_id",
                check: todo_owned("?3"),
            },
        },
        Table::Notifications => Policy {
            read: "notifications.user_id = ?1".into(),
            update: "notifications.user_id = ?1".into(),
            delete: "notifications.user_id = ?1".into(),
            insert: InsertGuard::Owner,
        },
        Table::UserPreferences => Policy {
            read: "user_preferences.user_id = ?1".into(),
            update: "user_preferences.user_id = ?1".into(),
            delete: "user_preferences.user_id = ?1".into(),
            insert: InsertGuard::Owner,
        },
        Table::Users => Policy {
            read: "?1 IS NOT NULL".into(),
            update: "users.id = ?1".into(),
            delete: "0".into(),
            insert: InsertGuard::Deny,
        },
    }
}
