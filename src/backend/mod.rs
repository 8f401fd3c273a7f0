//! Backend adapter: the one seam through which services reach storage,
//! identity, server-side procedures and the realtime change feed.

mod policy;
mod procedures;
mod schema;
mod sqlite;
mod triggers;

pub use schema::{Column, ColumnKind, Table};
pub use sqlite::{Backend, DbPool, SqliteAdapter};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::clock::PositionClock;
use crate::error::BackendError;
use crate::models::Identity;
use crate::realtime::Realtime;

pub type Row = Map<String, Value>;

/// Procedure names understood by [`Adapter::rpc`].
pub mod procedure {
    pub const UPSERT_PRESENCE: &str = "upsert_presence";
    pub const DELETE_PRESENCE: &str = "delete_presence";
    pub const TOGGLE_TODO_FLAG: &str = "toggle_todo_flag";
    pub const COMPLETE_RECURRING_INSTANCE: &str = "complete_recurring_instance";
    pub const NEARBY_TODOS: &str = "nearby_todos";
    pub const NEARBY_LISTS: &str = "nearby_lists";
    pub const MARK_ALL_NOTIFICATIONS_READ: &str = "mark_all_notifications_read";
    pub const ACCEPT_SHARE: &str = "accept_share";
    pub const ENSURE_PREFERENCES: &str = "ensure_preferences";
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    In(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Filters are ANDed together; ordering keys apply in sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op: FilterOp::Eq(value.into()),
        });
        self
    }

    pub fn filter_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filters.push(Filter {
            column: column.to_string(),
            op: FilterOp::In(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    pub fn asc(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy {
            column: column.to_string(),
            ascending: true,
        });
        self
    }

    pub fn desc(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy {
            column: column.to_string(),
            ascending: false,
        });
        self
    }
}

/// Uniform interface to the data, auth and realtime backend.
///
/// Rows travel as JSON objects keyed by column name; [`AdapterExt`] layers
/// typed access on top. Every call is evaluated as [`Adapter::current_user`].
pub trait Adapter: Send + Sync {
    fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, BackendError>;

    fn query_by_id(&self, table: Table, id: &str) -> Result<Option<Row>, BackendError>;

    fn insert(&self, table: Table, fields: Row) -> Result<Row, BackendError>;

    fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row, BackendError>;

    fn remove(&self, table: Table, id: &str) -> Result<(), BackendError>;

    fn rpc(&self, procedure: &str, params: Row) -> Result<Value, BackendError>;

    fn current_user(&self) -> Option<Identity>;

    fn realtime(&self) -> &Realtime;

    fn positions(&self) -> &PositionClock;
}

pub trait AdapterExt: Adapter {
    fn select<T: DeserializeOwned>(&self, table: Table, query: &Query) -> Result<Vec<T>, BackendError> {
        self.query(table, query)?
            .into_iter()
            .map(|row| Ok(serde_json::from_value(Value::Object(row))?))
            .collect()
    }

    fn select_by_id<T: DeserializeOwned>(&self, table: Table, id: &str) -> Result<Option<T>, BackendError> {
        self.query_by_id(table, id)?
            .map(|row| Ok(serde_json::from_value(Value::Object(row))?))
            .transpose()
    }

    fn insert_as<T: DeserializeOwned>(&self, table: Table, fields: impl Serialize) -> Result<T, BackendError> {
        let row = self.insert(table, to_row(fields)?)?;
        Ok(serde_json::from_value(Value::Object(row))?)
    }

    fn update_as<T: DeserializeOwned>(
        &self,
        table: Table,
        id: &str,
        fields: impl Serialize,
    ) -> Result<T, BackendError> {
        let row = self.update(table, id, to_row(fields)?)?;
        Ok(serde_json::from_value(Value::Object(row))?)
    }

    fn call<T: DeserializeOwned>(&self, procedure: &str, params: impl Serialize) -> Result<T, BackendError> {
        let value = self.rpc(procedure, to_row(params)?)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl<A: Adapter + ?Sized> AdapterExt for A {}

pub fn to_row(fields: impl Serialize) -> Result<Row, BackendError> {
    match serde_json::to_value(fields)? {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::InvalidParams(format!(
            "expected an object of fields, got {other}"
        ))),
    }
}
