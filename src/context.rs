use tracing::{debug, warn};

use crate::driver::{Connection, Cursor, GeneratedKeys, Statement, Value};
use crate::error::{
    CleanupError, Resource, StatementError, StatementResult, ALREADY_PREPARED, NOT_PREPARED,
};

/// Cursor type produced by the statements of connection `C`.
pub type CursorOf<C> = <<C as Connection>::Statement as Statement>::Cursor;

/// StatementContext holds the resources of one execution.
///
/// It owns the open connection plus the prepared statement and result cursor
/// created through it. Query logic receives it by mutable reference and the
/// owning unit of work releases everything once the logic returns.
pub struct StatementContext<C: Connection> {
    sql: String,
    connection: C,
    statement: Option<C::Statement>,
    cursor: Option<CursorOf<C>>,
}

impl<C: Connection> StatementContext<C> {
    pub(crate) fn new(sql: String, connection: C) -> Self {
        Self {
            sql,
            connection,
            statement: None,
            cursor: None,
        }
    }

    /// The statement text this execution was created with.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Prepare the statement text without requesting generated keys.
    pub async fn prepare(&mut self) -> StatementResult<()> {
        self.prepare_statement(false).await
    }

    /// Prepare the statement text, optionally asking the server to return the
    /// keys it generates (for example an auto-increment primary key).
    ///
    /// Fails with a state error if an open statement already exists.
    pub async fn prepare_statement(&mut self, keygen: bool) -> StatementResult<()> {
        if self.statement.as_ref().is_some_and(|s| !s.is_closed()) {
            return Err(StatementError::state(ALREADY_PREPARED));
        }

        let keys = GeneratedKeys::from(keygen);
        let statement = self.connection.prepare(&self.sql, keys).await?;
        debug!(?keys, "Statement prepared");
        self.statement = Some(statement);
        Ok(())
    }

    /// The prepared statement.
    pub fn statement(&mut self) -> StatementResult<&mut C::Statement> {
        self.statement
            .as_mut()
            .filter(|s| !s.is_closed())
            .ok_or_else(|| StatementError::state(NOT_PREPARED))
    }

    /// Bind a value to the 1-based parameter `index` of the prepared statement.
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> StatementResult<()> {
        self.statement()?.bind(index, value.into())?;
        Ok(())
    }

    /// Run the prepared statement, returning the affected row count.
    pub async fn execute_update(&mut self) -> StatementResult<u64> {
        let statement = self
            .statement
            .as_mut()
            .filter(|s| !s.is_closed())
            .ok_or_else(|| StatementError::state(NOT_PREPARED))?;
        let affected = self.connection.execute_update(statement).await?;
        debug!(affected, "Statement executed");
        Ok(affected)
    }

    /// Run the prepared statement and open a cursor over its rows.
    pub async fn execute_query(&mut self) -> StatementResult<&mut CursorOf<C>> {
        self.close_cursor().await?;
        let statement = self
            .statement
            .as_mut()
            .filter(|s| !s.is_closed())
            .ok_or_else(|| StatementError::state(NOT_PREPARED))?;
        let cursor = self.connection.execute_query(statement).await?;
        Ok(self.cursor.insert(cursor))
    }

    /// Open a cursor over the keys returned by the last update.
    pub async fn generated_keys(&mut self) -> StatementResult<&mut CursorOf<C>> {
        self.close_cursor().await?;
        let cursor = self.statement()?.generated_keys()?;
        Ok(self.cursor.insert(cursor))
    }

    /// The currently open cursor, if any.
    pub fn cursor(&mut self) -> Option<&mut CursorOf<C>> {
        self.cursor.as_mut()
    }

    async fn close_cursor(&mut self) -> StatementResult<()> {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await?;
        }
        Ok(())
    }

    /// Release cursor, statement and connection, in that order.
    ///
    /// Every step runs even if an earlier one fails. Resources that were
    /// never acquired, or were already closed, are skipped.
    pub(crate) async fn release(self) -> Vec<CleanupError> {
        let Self {
            connection,
            statement,
            cursor,
            ..
        } = self;
        let mut failures = Vec::new();

        if let Some(mut cursor) = cursor {
            if let Err(e) = cursor.close().await {
                failures.push(CleanupError::new(Resource::Cursor, e));
            }
        }

        if let Some(mut statement) = statement {
            if !statement.is_closed() {
                if let Err(e) = statement.close().await {
                    failures.push(CleanupError::new(Resource::Statement, e));
                }
            }
        }

        if let Err(e) = connection.close().await {
            failures.push(CleanupError::new(Resource::Connection, e));
        }

        for failure in &failures {
            warn!(resource = %failure.resource, error = %failure.source, "Release failed");
        }
        debug!(failures = failures.len(), "Resources released");
        failures
    }
}
