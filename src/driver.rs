//! Driver seams used by a unit of work.
//!
//! A [`DataSource`] hands out [`Connection`]s, a connection prepares
//! [`Statement`]s and executes them, and query results are read through a
//! [`Cursor`]. The PostgreSQL implementation lives in [`crate::postgres`];
//! any other pool can be plugged in by implementing these traits.

use async_trait::async_trait;

/// Whether server-generated keys are returned by a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeneratedKeys {
    #[default]
    Suppress,
    Return,
}

impl From<bool> for GeneratedKeys {
    fn from(keygen: bool) -> Self {
        if keygen {
            GeneratedKeys::Return
        } else {
            GeneratedKeys::Suppress
        }
    }
}

/// A bindable parameter or a decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row, columns in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Column value by zero-based index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

/// Provider of ready-to-use connections.
///
/// Implementations must support concurrent acquisition from many tasks.
/// `Ok(None)` means the source answered but had no usable connection.
#[async_trait]
pub trait DataSource: Send + Sync {
    type Connection: Connection;

    async fn connection(&self) -> Result<Option<Self::Connection>, sqlx::Error>;
}

/// An open connection checked out of a [`DataSource`].
#[async_trait]
pub trait Connection: Send {
    type Statement: Statement;

    /// Prepare `sql` on this connection.
    async fn prepare(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> Result<Self::Statement, sqlx::Error>;

    /// Run a prepared statement and return the affected row count.
    ///
    /// When the statement was prepared with [`GeneratedKeys::Return`] the
    /// returned keys are kept on the statement for
    /// [`Statement::generated_keys`].
    async fn execute_update(&mut self, statement: &mut Self::Statement) -> Result<u64, sqlx::Error>;

    /// Run a prepared statement and open a cursor over its rows.
    async fn execute_query(
        &mut self,
        statement: &mut Self::Statement,
    ) -> Result<<Self::Statement as Statement>::Cursor, sqlx::Error>;

    /// Hand the connection back to its source.
    async fn close(self) -> Result<(), sqlx::Error>;
}

/// A prepared statement.
#[async_trait]
pub trait Statement: Send {
    type Cursor: Cursor;

    /// Bind a value to the 1-based parameter `index`.
    fn bind(&mut self, index: usize, value: Value) -> Result<(), sqlx::Error>;

    /// Keys returned by the last update. Empty when keys were not requested.
    fn generated_keys(&mut self) -> Result<Self::Cursor, sqlx::Error>;

    fn is_closed(&self) -> bool;

    /// Close the statement. Closing a closed statement is a no-op.
    async fn close(&mut self) -> Result<(), sqlx::Error>;
}

/// Forward-only reader over result rows.
#[async_trait]
pub trait Cursor: Send {
    async fn next(&mut self) -> Result<Option<Row>, sqlx::Error>;

    /// Close the cursor. Closing a closed cursor is a no-op.
    async fn close(&mut self) -> Result<(), sqlx::Error>;
}
