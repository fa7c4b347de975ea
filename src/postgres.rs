//! PostgreSQL implementation of the driver seams, backed by `sqlx::PgPool`.

use async_trait::async_trait;
use sqlx::error::BoxDynError;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgRow, PgStatement};
use sqlx::{Arguments as _, Column as _, Either, Executor as _, PgPool, Postgres};
use sqlx::{Row as _, Statement as _, TypeInfo as _, ValueRef as _};
use std::collections::VecDeque;

use crate::driver::{Connection, Cursor, DataSource, GeneratedKeys, Row, Statement, Value};

#[async_trait]
impl DataSource for PgPool {
    type Connection = PgPooledConnection;

    async fn connection(&self) -> Result<Option<Self::Connection>, sqlx::Error> {
        if self.is_closed() {
            return Ok(None);
        }
        let inner = self.acquire().await?;
        Ok(Some(PgPooledConnection { inner }))
    }
}

/// A connection checked out of a `PgPool`.
#[derive(Debug)]
pub struct PgPooledConnection {
    inner: PoolConnection<Postgres>,
}

#[async_trait]
impl Connection for PgPooledConnection {
    type Statement = PgPreparedStatement;

    async fn prepare(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> Result<Self::Statement, sqlx::Error> {
        // Only DML can return keys; anything else is prepared as written.
        let returning = match keys {
            GeneratedKeys::Return => with_returning(sql),
            GeneratedKeys::Suppress => None,
        };
        let collects_keys = returning.is_some();
        let sql = returning.unwrap_or_else(|| sql.to_string());
        let prepared = (&mut *self.inner).prepare(&sql).await?;
        Ok(PgPreparedStatement::new(
            sqlx::Statement::to_owned(&prepared),
            keys,
            collects_keys,
        ))
    }

    async fn execute_update(&mut self, statement: &mut Self::Statement) -> Result<u64, sqlx::Error> {
        let arguments = statement.arguments()?;
        if statement.collects_keys {
            let rows = statement
                .inner
                .query_with(arguments)
                .fetch_all(&mut *self.inner)
                .await?;
            let affected = rows.len() as u64;
            statement.generated = rows;
            Ok(affected)
        } else {
            let result = statement
                .inner
                .query_with(arguments)
                .execute(&mut *self.inner)
                .await?;
            Ok(result.rows_affected())
        }
    }

    async fn execute_query(
        &mut self,
        statement: &mut Self::Statement,
    ) -> Result<PgRowCursor, sqlx::Error> {
        let arguments = statement.arguments()?;
        let rows = statement
            .inner
            .query_with(arguments)
            .fetch_all(&mut *self.inner)
            .await?;
        Ok(PgRowCursor::new(rows))
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        // Dropping a pooled connection hands it back to the pool.
        drop(self.inner);
        Ok(())
    }
}

/// A statement prepared server-side on one pooled connection.
pub struct PgPreparedStatement {
    inner: PgStatement<'static>,
    keys: GeneratedKeys,
    collects_keys: bool,
    parameter_types: Vec<String>,
    parameters: Vec<Option<Value>>,
    generated: Vec<PgRow>,
    closed: bool,
}

impl PgPreparedStatement {
    fn new(inner: PgStatement<'static>, keys: GeneratedKeys, collects_keys: bool) -> Self {
        let (count, parameter_types) = match inner.parameters() {
            Some(Either::Left(types)) => (
                types.len(),
                types.iter().map(|t| t.name().to_string()).collect(),
            ),
            Some(Either::Right(count)) => (count, Vec::new()),
            None => (0, Vec::new()),
        };
        Self {
            inner,
            keys,
            collects_keys,
            parameter_types,
            parameters: vec![None; count],
            generated: Vec::new(),
            closed: false,
        }
    }

    /// The statement text as sent to the server.
    pub fn sql(&self) -> &str {
        self.inner.sql()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn keys(&self) -> GeneratedKeys {
        self.keys
    }

    fn arguments(&self) -> Result<PgArguments, sqlx::Error> {
        if self.closed {
            return Err(sqlx::Error::Protocol("statement is closed".to_string()));
        }
        let mut arguments = PgArguments::default();
        for (i, slot) in self.parameters.iter().enumerate() {
            let value = slot
                .as_ref()
                .ok_or_else(|| sqlx::Error::Protocol(format!("parameter {} is not bound", i + 1)))?;
            let type_name = self.parameter_types.get(i).map_or("", String::as_str);
            add_value(&mut arguments, value, type_name).map_err(sqlx::Error::Encode)?;
        }
        Ok(arguments)
    }
}

#[async_trait]
impl Statement for PgPreparedStatement {
    type Cursor = PgRowCursor;

    fn bind(&mut self, index: usize, value: Value) -> Result<(), sqlx::Error> {
        let count = self.parameters.len();
        if index == 0 || index > count {
            return Err(sqlx::Error::Protocol(format!(
                "parameter index {index} out of range (statement has {count} parameters)"
            )));
        }
        self.parameters[index - 1] = Some(value);
        Ok(())
    }

    fn generated_keys(&mut self) -> Result<PgRowCursor, sqlx::Error> {
        Ok(PgRowCursor::new(std::mem::take(&mut self.generated)))
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.closed = true;
        self.parameters.clear();
        self.generated.clear();
        Ok(())
    }
}

/// Rows fetched by one execution, decoded to [`Row`]s as they are read.
pub struct PgRowCursor {
    rows: VecDeque<PgRow>,
    closed: bool,
}

impl PgRowCursor {
    fn new(rows: Vec<PgRow>) -> Self {
        Self {
            rows: rows.into(),
            closed: false,
        }
    }

    /// Rows not yet read.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl Cursor for PgRowCursor {
    async fn next(&mut self) -> Result<Option<Row>, sqlx::Error> {
        if self.closed {
            return Err(sqlx::Error::Protocol("cursor is closed".to_string()));
        }
        self.rows.pop_front().map(|row| decode_row(&row)).transpose()
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

/// Encode `value` as the Rust type matching the server-inferred parameter
/// type. An empty `type_name` means the type is unknown and the value's own
/// type is sent.
fn add_value(arguments: &mut PgArguments, value: &Value, type_name: &str) -> Result<(), BoxDynError> {
    match value {
        Value::Null => arguments.add(None::<String>),
        Value::Bool(v) => match type_name {
            "BOOL" | "" => arguments.add(*v),
            t if is_text(t) => arguments.add(v.to_string()),
            other => Err(mismatch("boolean", other)),
        },
        Value::Int(v) => match type_name {
            "INT2" => arguments.add(i16::try_from(*v).map_err(|_| out_of_range(*v, "INT2"))?),
            "INT4" => arguments.add(i32::try_from(*v).map_err(|_| out_of_range(*v, "INT4"))?),
            "INT8" | "" => arguments.add(*v),
            "FLOAT4" => arguments.add(*v as f32),
            "FLOAT8" => arguments.add(*v as f64),
            t if is_text(t) => arguments.add(v.to_string()),
            other => Err(mismatch("integer", other)),
        },
        Value::Float(v) => match type_name {
            "FLOAT4" => arguments.add(*v as f32),
            "FLOAT8" | "" => arguments.add(*v),
            t if is_text(t) => arguments.add(v.to_string()),
            other => Err(mismatch("float", other)),
        },
        Value::Text(v) => match type_name {
            "INT2" => arguments.add(v.trim().parse::<i16>()?),
            "INT4" => arguments.add(v.trim().parse::<i32>()?),
            "INT8" => arguments.add(v.trim().parse::<i64>()?),
            "FLOAT4" => arguments.add(v.trim().parse::<f32>()?),
            "FLOAT8" => arguments.add(v.trim().parse::<f64>()?),
            "BOOL" => arguments.add(v.trim().parse::<bool>()?),
            "BYTEA" => arguments.add(v.as_bytes().to_vec()),
            t if t.is_empty() || is_text(t) => arguments.add(v.clone()),
            other => Err(mismatch("text", other)),
        },
        Value::Bytes(v) => match type_name {
            "BYTEA" | "" => arguments.add(v.clone()),
            other => Err(mismatch("bytes", other)),
        },
    }
}

fn is_text(type_name: &str) -> bool {
    matches!(type_name, "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME")
}

fn mismatch(kind: &str, type_name: &str) -> BoxDynError {
    format!("cannot bind {kind} value to {type_name} parameter").into()
}

fn out_of_range(value: i64, type_name: &str) -> BoxDynError {
    format!("integer {value} out of range for {type_name} parameter").into()
}

fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    row.columns()
        .iter()
        .map(|col| decode_column(row, col.ordinal(), col.type_info().name()))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }
    let value = match type_name {
        "INT2" => Value::Int(row.try_get::<i16, _>(idx)?.into()),
        "INT4" => Value::Int(row.try_get::<i32, _>(idx)?.into()),
        "INT8" => Value::Int(row.try_get::<i64, _>(idx)?),
        "BOOL" => Value::Bool(row.try_get(idx)?),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(idx)?.into()),
        "FLOAT8" => Value::Float(row.try_get(idx)?),
        "BYTEA" => Value::Bytes(row.try_get(idx)?),
        t if is_text(t) => Value::Text(row.try_get(idx)?),
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: idx.to_string(),
                source: format!("unsupported column type {other}").into(),
            })
        }
    };
    Ok(value)
}

/// Statement text that returns generated keys, or `None` when the statement
/// is not an INSERT, UPDATE or DELETE. `RETURNING *` is appended unless the
/// statement already has a RETURNING clause.
fn with_returning(sql: &str) -> Option<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let keyword = trimmed
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    let is_dml = ["INSERT", "UPDATE", "DELETE"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k));
    if !is_dml {
        return None;
    }
    if has_returning_clause(trimmed) {
        Some(trimmed.to_string())
    } else {
        Some(format!("{trimmed} RETURNING *"))
    }
}

/// Whether `sql` contains a bare RETURNING keyword outside quoted literals and
/// quoted identifiers.
fn has_returning_clause(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut word = String::new();
    for c in sql.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' || c == '$' {
            word.push(c);
            continue;
        }
        if word.eq_ignore_ascii_case("returning") {
            return true;
        }
        word.clear();
        if c == '\'' || c == '"' {
            quote = Some(c);
        }
    }
    word.eq_ignore_ascii_case("returning")
}
