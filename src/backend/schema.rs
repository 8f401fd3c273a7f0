//! Table catalogue and DDL for the embedded store.

use rusqlite::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Lists,
    ListShares,
    ListPresence,
    Todos,
    TodoShares,
    Notifications,
    UserPreferences,
    /// Public profile columns only; credentials are not part of the catalogue.
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Bool,
    /// JSON document stored as text.
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

use ColumnKind::{Bool, Integer, Json, Real, Text};

const LISTS: &[Column] = &[
    col("id", Text),
    col("user_id", Text),
    col("title", Text),
    col("description", Text),
    col("color", Text),
    col("icon", Text),
    col("is_default", Bool),
    col("position", Integer),
    col("created_at", Integer),
    col("updated_at", Integer),
];

const LIST_SHARES: &[Column] = &[
    col("id", Text),
    col("list_id", Text),
    col("shared_with_user_id", Text),
    col("shared_with_email", Text),
    col("permission", Text),
    col("invited_by", Text),
    col("accepted_at", Integer),
    col("created_at", Integer),
    col("updated_at", Integer),
];

const LIST_PRESENCE: &[Column] = &[
    col("id", Text),
    col("list_id", Text),
    col("user_id", Text),
    col("status", Text),
    col("editing_todo_id", Text),
    col("last_seen_at", Integer),
    col("created_at", Integer),
];

const TODOS: &[Column] = &[
    col("id", Text),
    col("user_id", Text),
    col("list_id", Text),
    col("title", Text),
    col("description", Text),
    col("completed", Bool),
    col("is_public", Bool),
    col("position", Integer),
    col("priority", Text),
    col("due_date", Text),
    col("location_name", Text),
    col("latitude", Real),
    col("longitude", Real),
    col("recurrence_rule", Text),
    col("notes", Text),
    col("tags", Json),
    col("attachments", Json),
    col("created_at", Integer),
    col("updated_at", Integer),
];

const TODO_SHARES: &[Column] = &[
    col("id", Text),
    col("todo_id", Text),
    col("shared_with_email", Text),
    col("permission", Text),
    col("created_at", Integer),
];

const NOTIFICATIONS: &[Column] = &[
    col("id", Text),
    col("user_id", Text),
    col("type", Text),
    col("title", Text),
    col("body", Text),
    col("read", Bool),
    col("action_url", Text),
    col("created_at", Integer),
];

const USER_PREFERENCES: &[Column] = &[
    col("user_id", Text),
    col("time_format", Text),
    col("auto_hide_completed", Bool),
    col("theme_preference", Text),
    col("default_list_id", Text),
    col("updated_at", Integer),
];

const USERS: &[Column] = &[
    col("id", Text),
    col("email", Text),
    col("display_name", Text),
    col("avatar_url", Text),
    col("created_at", Integer),
];

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Lists,
        Table::ListShares,
        Table::ListPresence,
        Table::Todos,
        Table::TodoShares,
        Table::Notifications,
        Table::UserPreferences,
        Table::Users,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Lists => "lists",
            Table::ListShares => "list_shares",
            Table::ListPresence => "list_presence",
            Table::Todos => "todos",
            Table::TodoShares => "todo_shares",
            Table::Notifications => "notifications",
            Table::UserPreferences => "user_preferences",
            Table::Users => "users",
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::Lists => LISTS,
            Table::ListShares => LIST_SHARES,
            Table::ListPresence => LIST_PRESENCE,
            Table::Todos => TODOS,
            Table::TodoShares => TODO_SHARES,
            Table::Notifications => NOTIFICATIONS,
            Table::UserPreferences => USER_PREFERENCES,
            Table::Users => USERS,
        }
    }

    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    pub fn has_column(self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Primary key column.
    pub fn key_column(self) -> &'static str {
        match self {
            Table::UserPreferences => "user_id",
            _ => "id",
        }
    }

    /// Column that must equal the caller's id on insert.
    pub fn owner_column(self) -> Option<&'static str> {
        match self {
            Table::Lists
            | Table::ListPresence
            | Table::Todos
            | Table::Notifications
            | Table::UserPreferences => Some("user_id"),
            Table::ListShares => Some("invited_by"),
            Table::TodoShares | Table::Users => None,
        }
    }

    /// Column whose value narrows the realtime topic (`<table>:<value>`).
    pub fn scope_column(self) -> Option<&'static str> {
        match self {
            Table::ListShares | Table::ListPresence | Table::Todos => Some("list_id"),
            Table::Notifications | Table::UserPreferences => Some("user_id"),
            Table::Lists | Table::TodoShares | Table::Users => None,
        }
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT UNIQUE NOT NULL,
        display_name TEXT,
        avatar_url TEXT,
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS api_tokens (
        id INTEGER PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        token TEXT UNIQUE NOT NULL,
        name TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS lists (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        color TEXT NOT NULL DEFAULT '#6366f1',
        icon TEXT NOT NULL DEFAULT 'list',
        is_default INTEGER NOT NULL DEFAULT 0,
        position INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS list_shares (
        id TEXT PRIMARY KEY,
        list_id TEXT NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
        shared_with_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
        shared_with_email TEXT NOT NULL,
        permission TEXT NOT NULL CHECK (permission IN ('owner', 'editor', 'viewer')),
        invited_by TEXT NOT NULL,
        accepted_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS list_presence (
        id TEXT PRIMARY KEY,
        list_id TEXT NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        status TEXT NOT NULL CHECK (status IN ('viewing', 'editing')),
        editing_todo_id TEXT,
        last_seen_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (list_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS todos (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        list_id TEXT NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        completed INTEGER NOT NULL DEFAULT 0,
        is_public INTEGER NOT NULL DEFAULT 0,
        position INTEGER NOT NULL DEFAULT 0,
        priority TEXT NOT NULL DEFAULT 'none'
            CHECK (priority IN ('none', 'low', 'medium', 'high')),
        due_date TEXT,
        location_name TEXT,
        latitude REAL,
        longitude REAL,
        recurrence_rule TEXT,
        notes TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        attachments TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS todo_shares (
        id TEXT PRIMARY KEY,
        todo_id TEXT NOT NULL REFERENCES todos(id) ON DELETE CASCADE,
        shared_with_email TEXT NOT NULL,
        permission TEXT NOT NULL CHECK (permission IN ('view', 'edit')),
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS recurring_completions (
        id TEXT PRIMARY KEY,
        todo_id TEXT NOT NULL REFERENCES todos(id) ON DELETE CASCADE,
        instance_date TEXT NOT NULL,
        completed_at INTEGER NOT NULL,
        UNIQUE (todo_id, instance_date)
    );

    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        type TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        read INTEGER NOT NULL DEFAULT 0,
        action_url TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_preferences (
        user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
        time_format TEXT NOT NULL DEFAULT '12h',
        auto_hide_completed INTEGER NOT NULL DEFAULT 0,
        theme_preference TEXT NOT NULL DEFAULT 'system',
        default_list_id TEXT REFERENCES lists(id) ON DELETE SET NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_todos_list ON todos(list_id);
    CREATE INDEX IF NOT EXISTS idx_list_shares_list ON list_shares(list_id);
    CREATE INDEX IF NOT EXISTS idx_list_shares_email ON list_shares(shared_with_email);
    CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);
";

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)
}
