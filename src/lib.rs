//! Pooled Unit of Work Module
//!
//! This module runs one parameterized statement on a pooled database connection
//! and guarantees that the connection, the prepared statement and any result
//! cursor are released afterwards, whatever the outcome.

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod postgres;
pub mod unit_of_work;

pub use config::DataSourceConfig;
pub use context::{CursorOf, StatementContext};
pub use driver::{Connection, Cursor, DataSource, GeneratedKeys, Row, Statement, Value};
pub use error::{
    CleanupError, ConfigError, ErrorKind, ExecuteError, Resource, StatementError, StatementResult,
};
pub use postgres::{PgPooledConnection, PgPreparedStatement, PgRowCursor};
pub use unit_of_work::{Query, QueryFn, QueryFuture, UnitOfWork};
