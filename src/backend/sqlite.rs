use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Number, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::policy::{policy, InsertGuard};
use super::schema::{self, Column, ColumnKind, Table};
use super::{procedures, triggers, Adapter, FilterOp, Query, Row};
use crate::clock::{now_millis, PositionClock};
use crate::error::BackendError;
use crate::models::Identity;
use crate::realtime::{Change, ChangeKind, Realtime};

pub type DbPool = Arc<Mutex<Connection>>;

/// Shared handle to the embedded store and its change feed. Cheap to clone;
/// construct once at start-up and hand out per-caller adapters with
/// [`Backend::client`].
#[derive(Clone)]
pub struct Backend {
    db: DbPool,
    realtime: Realtime,
    positions: Arc<PositionClock>,
}

impl Backend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, BackendError> {
        schema::migrate(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            realtime: Realtime::new(),
            positions: Arc::new(PositionClock::new()),
        })
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    pub fn realtime(&self) -> &Realtime {
        &self.realtime
    }

    /// An adapter that evaluates every call as `identity`.
    pub fn client(&self, identity: Option<Identity>) -> Arc<dyn Adapter> {
        Arc::new(SqliteAdapter {
            backend: self.clone(),
            identity,
        })
    }

    pub fn as_user(&self, identity: Identity) -> Arc<dyn Adapter> {
        self.client(Some(identity))
    }

    /// Deletes presence rows not refreshed since `cutoff` (epoch millis).
    pub fn prune_stale_presence(&self, cutoff: i64) -> Result<usize, BackendError> {
        let changes = {
            let conn = lock(&self.db)?;
            let mut stmt =
                conn.prepare("DELETE FROM list_presence WHERE last_seen_at < ?1 RETURNING id, list_id")?;
            let rows = stmt
                .query_map([cutoff], |row| {
                    Ok(Change {
                        table: Table::ListPresence,
                        kind: ChangeKind::Delete,
                        id: Some(row.get(0)?),
                        scope: Some(row.get(1)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let pruned = changes.len();
        if pruned > 0 {
            info!(pruned, "Pruned stale presence rows");
        }
        self.publish(&changes);
        Ok(pruned)
    }

    pub(crate) fn publish(&self, changes: &[Change]) {
        for change in changes {
            self.realtime.publish(change);
        }
    }
}

pub struct SqliteAdapter {
    backend: Backend,
    identity: Option<Identity>,
}

impl SqliteAdapter {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BackendError> {
        lock(&self.backend.db)
    }
}

impl Adapter for SqliteAdapter {
    fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, BackendError> {
        let conn = self.conn()?;
        let rows = select(&conn, table, self.identity.as_ref(), query)?;
        debug!(table = table.name(), count = rows.len(), "Queried rows");
        Ok(rows)
    }

    fn query_by_id(&self, table: Table, id: &str) -> Result<Option<Row>, BackendError> {
        let conn = self.conn()?;
        let query = Query::new().filter(table.key_column(), id);
        Ok(select(&conn, table, self.identity.as_ref(), &query)?
            .into_iter()
            .next())
    }

    fn insert(&self, table: Table, mut fields: Row) -> Result<Row, BackendError> {
        let identity = self.identity.as_ref().ok_or(BackendError::Unauthenticated)?;
        let policy = policy(table);
        if matches!(policy.insert, InsertGuard::Deny) {
            return Err(BackendError::Policy(table.name()));
        }

        let now = now_millis();
        let key = table.key_column();
        if key == "id" && !fields.contains_key("id") {
            fields.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
        for stamp in ["created_at", "updated_at"] {
            if table.has_column(stamp) && !fields.contains_key(stamp) {
                fields.insert(stamp.into(), Value::from(now));
            }
        }
        if let Some(owner) = table.owner_column() {
            match fields.get(owner) {
                None | Some(Value::Null) => {
                    fields.insert(owner.into(), Value::String(identity.id.clone()));
                }
                Some(Value::String(id)) if *id == identity.id => {}
                Some(_) => return Err(BackendError::Policy(table.name())),
            }
        }
        let id = fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidParams(format!("{key} is required")))?;

        let conn = self.conn()?;

        if let InsertGuard::Parent { column, check } = &policy.insert {
            let parent = fields
                .get(*column)
                .and_then(Value::as_str)
                .ok_or_else(|| BackendError::InvalidParams(format!("{column} is required")))?;
            let mut params = caller_params(Some(identity));
            params.push(SqlValue::Text(parent.to_string()));
            if !holds(&conn, check, &params)? {
                return Err(BackendError::Policy(table.name()));
            }
        }

        let mut params = Vec::new();
        let mut names = Vec::new();
        let mut slots = Vec::new();
        for (name, value) in &fields {
            let column = column(table, name)?;
            names.push(format!("\"{}\"", column.name));
            slots.push(bind(&mut params, to_sql(table, column, value)?));
        }
        execute(
            &conn,
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name(),
                names.join(", "),
                slots.join(", ")
            ),
            &params,
        )?;

        let extra = triggers::after_insert(&conn, table, &id, identity)?;
        let row = fetch_unchecked(&conn, table, &id)?.ok_or_else(|| BackendError::RowNotFound {
            table: table.name(),
            id: id.clone(),
        })?;
        drop(conn);

        let mut changes = vec![change_for(table, ChangeKind::Insert, &row)];
        changes.extend(extra);
        self.backend.publish(&changes);
        Ok(row)
    }

    fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row, BackendError> {
        let conn = self.conn()?;
        let policy = policy(table);
        let mut params = caller_params(self.identity.as_ref());
        let mut sets = Vec::new();

        for (name, value) in &fields {
            if name == table.key_column() || Some(name.as_str()) == table.owner_column() {
                return Err(BackendError::InvalidParams(format!("{name} cannot be changed")));
            }
            let column = column(table, name)?;
            let slot = bind(&mut params, to_sql(table, column, value)?);
            sets.push(format!("\"{}\" = {}", column.name, slot));
        }

        if sets.is_empty() {
            let query = Query::new().filter(table.key_column(), id);
            return select(&conn, table, self.identity.as_ref(), &query)?
                .into_iter()
                .next()
                .ok_or_else(|| BackendError::RowNotFound {
                    table: table.name(),
                    id: id.to_string(),
                });
        }

        if table.has_column("updated_at") && !fields.contains_key("updated_at") {
            let slot = bind(&mut params, SqlValue::Integer(now_millis()));
            sets.push(format!("updated_at = {slot}"));
        }

        let key_slot = bind(&mut params, SqlValue::Text(id.to_string()));
        let sql = format!(
            "UPDATE {t} SET {} WHERE {t}.{key} = {key_slot} AND ({})",
            sets.join(", "),
            policy.update,
            t = table.name(),
            key = table.key_column(),
        );
        if execute(&conn, &sql, &params)? == 0 {
            return Err(missing_or_denied(&conn, table, id, self.identity.as_ref())?);
        }

        let row = fetch_unchecked(&conn, table, id)?.ok_or_else(|| BackendError::RowNotFound {
            table: table.name(),
            id: id.to_string(),
        })?;
        drop(conn);

        self.backend
            .publish(&[change_for(table, ChangeKind::Update, &row)]);
        Ok(row)
    }

    fn remove(&self, table: Table, id: &str) -> Result<(), BackendError> {
        let conn = self.conn()?;
        let existing = fetch_unchecked(&conn, table, id)?;

        let mut params = caller_params(self.identity.as_ref());
        let key_slot = bind(&mut params, SqlValue::Text(id.to_string()));
        let sql = format!(
            "DELETE FROM {t} WHERE {t}.{key} = {key_slot} AND ({})",
            policy(table).delete,
            t = table.name(),
            key = table.key_column(),
        );
        let removed = execute(&conn, &sql, &params)?;

        let Some(row) = existing.filter(|_| removed > 0) else {
            return Err(missing_or_denied(&conn, table, id, self.identity.as_ref())?);
        };
        drop(conn);

        self.backend
            .publish(&[change_for(table, ChangeKind::Delete, &row)]);
        Ok(())
    }

    fn rpc(&self, procedure: &str, params: Row) -> Result<Value, BackendError> {
        let conn = self.conn()?;
        let (value, changes) = procedures::call(&conn, self.identity.as_ref(), procedure, &params)?;
        drop(conn);

        debug!(procedure, changes = changes.len(), "Procedure finished");
        self.backend.publish(&changes);
        Ok(value)
    }

    fn current_user(&self) -> Option<Identity> {
        self.identity.clone()
    }

    fn realtime(&self) -> &Realtime {
        &self.backend.realtime
    }

    fn positions(&self) -> &PositionClock {
        &self.backend.positions
    }
}

pub(super) fn lock(db: &DbPool) -> Result<MutexGuard<'_, Connection>, BackendError> {
    db.lock().map_err(|_| BackendError::Poisoned)
}

/// `?1` and `?2` of every policy predicate.
pub(super) fn caller_params(identity: Option<&Identity>) -> Vec<SqlValue> {
    match identity {
        Some(identity) => vec![
            SqlValue::Text(identity.id.clone()),
            SqlValue::Text(identity.email.clone()),
        ],
        None => vec![SqlValue::Null, SqlValue::Null],
    }
}

/// Appends `value` and returns its numbered placeholder.
pub(super) fn bind(params: &mut Vec<SqlValue>, value: SqlValue) -> String {
    params.push(value);
    format!("?{}", params.len())
}

// Statements may not reference every leading parameter (a policy that only
// mentions `?1`), so bind only as many as the statement declares.
fn declared<'p>(stmt: &rusqlite::Statement<'_>, params: &'p [SqlValue]) -> &'p [SqlValue] {
    &params[..stmt.parameter_count().min(params.len())]
}

pub(super) fn execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<usize, BackendError> {
    let mut stmt = conn.prepare(sql)?;
    let params = declared(&stmt, params);
    Ok(stmt.execute(params_from_iter(params))?)
}

/// Evaluates a boolean predicate.
pub(super) fn holds(conn: &Connection, predicate: &str, params: &[SqlValue]) -> Result<bool, BackendError> {
    let mut stmt = conn.prepare(&format!("SELECT CASE WHEN {predicate} THEN 1 ELSE 0 END"))?;
    let params = declared(&stmt, params);
    let flag: i64 = stmt.query_row(params_from_iter(params), |row| row.get(0))?;
    Ok(flag == 1)
}

pub(super) fn column(table: Table, name: &str) -> Result<&'static Column, BackendError> {
    table.column(name).ok_or_else(|| BackendError::UnknownColumn {
        table: table.name(),
        column: name.to_string(),
    })
}

fn column_list(table: Table) -> String {
    table
        .columns()
        .iter()
        .map(|c| format!("{}.\"{}\"", table.name(), c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs `SELECT <catalogue columns> FROM <table> <tail>` and decodes rows.
pub(super) fn select_where(
    conn: &Connection,
    table: Table,
    tail: &str,
    params: &[SqlValue],
) -> Result<Vec<Row>, BackendError> {
    let sql = format!("SELECT {} FROM {} {}", column_list(table), table.name(), tail);
    let mut stmt = conn.prepare(&sql)?;
    let params = declared(&stmt, params);
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(read_row(table, row)?);
    }
    Ok(out)
}

/// Policy-filtered select.
pub(super) fn select(
    conn: &Connection,
    table: Table,
    identity: Option<&Identity>,
    query: &Query,
) -> Result<Vec<Row>, BackendError> {
    let mut params = caller_params(identity);
    let mut tail = format!("WHERE ({})", policy(table).read);

    for filter in &query.filters {
        let column = column(table, &filter.column)?;
        let qualified = format!("{}.\"{}\"", table.name(), column.name);
        match &filter.op {
            FilterOp::Eq(Value::Null) => tail.push_str(&format!(" AND {qualified} IS NULL")),
            FilterOp::Eq(value) => {
                let slot = bind(&mut params, to_sql(table, column, value)?);
                tail.push_str(&format!(" AND {qualified} = {slot}"));
            }
            FilterOp::In(values) if values.is_empty() => tail.push_str(" AND 0"),
            FilterOp::In(values) => {
                let slots = values
                    .iter()
                    .map(|v| Ok(bind(&mut params, to_sql(table, column, v)?)))
                    .collect::<Result<Vec<_>, BackendError>>()?;
                tail.push_str(&format!(" AND {qualified} IN ({})", slots.join(", ")));
            }
        }
    }

    let mut order = Vec::new();
    for key in &query.order_by {
        let column = column(table, &key.column)?;
        let direction = if key.ascending { "ASC" } else { "DESC" };
        order.push(format!("{}.\"{}\" {}", table.name(), column.name, direction));
    }
    // Stable tie-break for rows that agree on every requested key.
    order.push(format!("{}.\"{}\" ASC", table.name(), table.key_column()));
    tail.push_str(&format!(" ORDER BY {}", order.join(", ")));

    select_where(conn, table, &tail, &params)
}

/// Reads a row by key, bypassing policies. For internal bookkeeping only.
pub(super) fn fetch_unchecked(conn: &Connection, table: Table, id: &str) -> Result<Option<Row>, BackendError> {
    let tail = format!("WHERE {}.\"{}\" = ?1", table.name(), table.key_column());
    Ok(select_where(conn, table, &tail, &[SqlValue::Text(id.to_string())])?
        .into_iter()
        .next())
}

/// Invisible rows are reported as missing; visible ones as a policy failure.
pub(super) fn missing_or_denied(
    conn: &Connection,
    table: Table,
    id: &str,
    identity: Option<&Identity>,
) -> Result<BackendError, BackendError> {
    let query = Query::new().filter(table.key_column(), id);
    Ok(if select(conn, table, identity, &query)?.is_empty() {
        BackendError::RowNotFound {
            table: table.name(),
            id: id.to_string(),
        }
    } else {
        BackendError::Policy(table.name())
    })
}

pub(super) fn change_for(table: Table, kind: ChangeKind, row: &Row) -> Change {
    let text = |name: &str| row.get(name).and_then(Value::as_str).map(str::to_string);
    Change {
        table,
        kind,
        id: text(table.key_column()),
        scope: table.scope_column().and_then(text),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(super) fn to_sql(table: Table, column: &Column, value: &Value) -> Result<SqlValue, BackendError> {
    let mismatch = || BackendError::TypeMismatch {
        table: table.name(),
        column: column.name,
        found: json_type(value),
    };

    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    Ok(match column.kind {
        ColumnKind::Text => SqlValue::Text(value.as_str().ok_or_else(mismatch)?.to_string()),
        ColumnKind::Integer => SqlValue::Integer(value.as_i64().ok_or_else(mismatch)?),
        ColumnKind::Real => SqlValue::Real(value.as_f64().ok_or_else(mismatch)?),
        ColumnKind::Bool => match value {
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => SqlValue::Integer(i64::from(n.as_i64().ok_or_else(mismatch)? != 0)),
            _ => return Err(mismatch()),
        },
        ColumnKind::Json => SqlValue::Text(serde_json::to_string(value)?),
    })
}

fn from_sql(column: &Column, value: ValueRef<'_>) -> Result<Value, BackendError> {
    Ok(match (column.kind, value) {
        (_, ValueRef::Null) => Value::Null,
        (ColumnKind::Bool, ValueRef::Integer(i)) => Value::Bool(i != 0),
        (ColumnKind::Real, ValueRef::Integer(i)) => Number::from_f64(i as f64).map_or(Value::Null, Value::Number),
        (_, ValueRef::Integer(i)) => Value::from(i),
        (_, ValueRef::Real(f)) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        (ColumnKind::Json, ValueRef::Text(raw)) => serde_json::from_slice(raw)?,
        (_, ValueRef::Text(raw)) => Value::String(String::from_utf8_lossy(raw).into_owned()),
        (_, ValueRef::Blob(raw)) => Value::String(String::from_utf8_lossy(raw).into_owned()),
    })
}

pub(super) fn read_row(table: Table, row: &rusqlite::Row<'_>) -> Result<Row, BackendError> {
    let mut out = Row::new();
    for (index, column) in table.columns().iter().enumerate() {
        out.insert(column.name.to_string(), from_sql(column, row.get_ref(index)?)?);
    }
    Ok(out)
}
