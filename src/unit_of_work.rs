use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, warn, Instrument};
use uuid::Uuid;

use crate::driver::{Connection, DataSource};
use crate::error::{ExecuteError, StatementError, StatementResult};
use crate::StatementContext;

/// Query logic run by a [`UnitOfWork`] once a connection is open.
///
/// The logic prepares the statement through the context, binds parameters,
/// executes it and reads results. Any resource it opens through the context
/// is released by the unit of work afterwards.
#[async_trait]
pub trait Query<C: Connection>: Send {
    type Output: Send;

    async fn query(&mut self, ctx: &mut StatementContext<C>) -> StatementResult<Self::Output>;
}

/// Boxed future returned by closure query logic.
pub type QueryFuture<'a, T> = Pin<Box<dyn Future<Output = StatementResult<T>> + Send + 'a>>;

/// Query logic backed by a closure. Built with [`UnitOfWork::from_fn`].
pub struct QueryFn<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

#[async_trait]
impl<C, F, T> Query<C> for QueryFn<F, T>
where
    C: Connection,
    F: for<'a> FnMut(&'a mut StatementContext<C>) -> QueryFuture<'a, T> + Send,
    T: Send,
{
    type Output = T;

    async fn query(&mut self, ctx: &mut StatementContext<C>) -> StatementResult<T> {
        (self.f)(ctx).await
    }
}

/// Unit of Work for running one statement on a pooled connection.
///
/// Acquires a connection, runs the query logic, then releases cursor,
/// statement and connection regardless of outcome. Running consumes the
/// unit of work, so each instance executes exactly once.
pub struct UnitOfWork<D, Q> {
    data_source: Arc<D>,
    sql: String,
    query: Q,
}

impl<D, F, T> UnitOfWork<D, QueryFn<F, T>>
where
    D: DataSource,
    F: for<'a> FnMut(&'a mut StatementContext<D::Connection>) -> QueryFuture<'a, T> + Send,
    T: Send,
{
    /// Create a UnitOfWork whose query logic is a closure.
    ///
    /// ```no_run
    /// # use pooled_unit_of_work::{Cursor, UnitOfWork};
    /// # use std::sync::Arc;
    /// # async fn example(pool: Arc<sqlx::PgPool>) -> Result<(), pooled_unit_of_work::ExecuteError> {
    /// let count = UnitOfWork::from_fn(pool, "SELECT count(*) FROM users", |ctx| {
    ///     Box::pin(async move {
    ///         ctx.prepare().await?;
    ///         let row = ctx.execute_query().await?.next().await?;
    ///         Ok(row.and_then(|r| r.get_i64(0)).unwrap_or(0))
    ///     })
    /// })
    /// .call()
    /// .await?;
    /// # let _ = count;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_fn(data_source: Arc<D>, sql: impl Into<String>, f: F) -> Self {
        Self {
            data_source,
            sql: sql.into(),
            query: QueryFn {
                f,
                _output: PhantomData,
            },
        }
    }
}

impl<D, Q> UnitOfWork<D, Q>
where
    D: DataSource,
    Q: Query<D::Connection>,
{
    /// Create a new UnitOfWork for `sql` against the given data source.
    pub fn new(data_source: Arc<D>, sql: impl Into<String>, query: Q) -> Self {
        Self {
            data_source,
            sql: sql.into(),
            query,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Run on the current task and return the query logic's value.
    ///
    /// A panic in the query logic is resumed once every resource is released.
    pub async fn call(self) -> Result<Q::Output, ExecuteError> {
        let execution_id = Uuid::new_v4();
        let span = debug_span!("unit_of_work", %execution_id, sql = %self.sql);
        self.run().instrument(span).await
    }

    /// Submit to the ambient tokio runtime.
    ///
    /// Panics when called outside a runtime, like [`tokio::spawn`].
    pub fn spawn(self) -> JoinHandle<Result<Q::Output, ExecuteError>>
    where
        D: 'static,
        Q: 'static,
        Q::Output: 'static,
    {
        tokio::spawn(self.call())
    }

    /// Run synchronously, blocking the current thread until completion.
    ///
    /// Must not be called from within an async context.
    pub fn call_blocking(self, handle: &Handle) -> Result<Q::Output, ExecuteError> {
        handle.block_on(self.call())
    }

    async fn run(self) -> Result<Q::Output, ExecuteError> {
        let Self {
            data_source,
            sql,
            mut query,
        } = self;

        let connection = match data_source.connection().await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                warn!("Data source returned no connection");
                return Err(StatementError::connection(None).into());
            }
            Err(e) => {
                warn!(error = %e, "Connection acquisition failed");
                return Err(StatementError::connection(Some(e)).into());
            }
        };
        debug!("Connection acquired");

        let mut ctx = StatementContext::new(sql, connection);
        let outcome = AssertUnwindSafe(query.query(&mut ctx))
            .catch_unwind()
            .await;
        let mut failures = ctx.release().await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                warn!(failures = failures.len(), "Query logic panicked, resources released");
                panic::resume_unwind(payload);
            }
        };

        match outcome {
            Ok(value) if failures.is_empty() => Ok(value),
            Ok(_) => {
                let first = failures.remove(0);
                warn!(error = %first, "Query succeeded but resources failed to release");
                Err(ExecuteError::new(first.into(), failures))
            }
            Err(e) => {
                debug!(error = %e, "Query failed");
                Err(ExecuteError::new(e, failures))
            }
        }
    }
}
