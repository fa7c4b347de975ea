use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use pooled_unit_of_work::{
    Connection, Cursor, DataSource, GeneratedKeys, Resource, Row, Statement, Value,
};

/// Behaviour of the in-memory data source.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Answer acquisition with "no connection".
    pub no_connection: bool,
    /// Fail acquisition with a pool error.
    pub acquire_error: bool,
    /// Key returned by updates prepared with generated keys.
    pub generated_key: i64,
    /// Rows returned by queries.
    pub rows: Vec<Row>,
    /// Make execution fail.
    pub fail_execute: bool,
    /// Resources whose close fails.
    pub fail_release: Vec<Resource>,
}

/// What happened to the resources handed out by a [`MockDataSource`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counts {
    pub acquire_attempts: usize,
    pub connections_acquired: usize,
    pub connections_released: usize,
    pub statements_prepared: usize,
    pub statements_closed: usize,
    pub cursors_opened: usize,
    pub cursors_closed: usize,
    pub prepared_keys: Vec<GeneratedKeys>,
    pub prepared_sql: Vec<String>,
    pub bound: Vec<Value>,
}

impl Counts {
    /// Every handed-out resource was closed exactly once.
    pub fn balanced(&self) -> bool {
        self.connections_acquired == self.connections_released
            && self.statements_prepared == self.statements_closed
            && self.cursors_opened == self.cursors_closed
    }
}

struct Shared {
    config: MockConfig,
    counts: Mutex<Counts>,
}

impl Shared {
    fn close_result(&self, resource: Resource) -> Result<(), sqlx::Error> {
        if self.config.fail_release.contains(&resource) {
            Err(sqlx::Error::Protocol(format!("mock {resource} close failure")))
        } else {
            Ok(())
        }
    }
}

/// In-memory data source that records every acquire and release.
pub struct MockDataSource {
    shared: Arc<Shared>,
}

impl MockDataSource {
    pub fn new(config: MockConfig) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                config,
                counts: Mutex::new(Counts::default()),
            }),
        })
    }

    pub fn counts(&self) -> Counts {
        self.shared.counts.lock().clone()
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    type Connection = MockConnection;

    async fn connection(&self) -> Result<Option<MockConnection>, sqlx::Error> {
        self.shared.counts.lock().acquire_attempts += 1;
        if self.shared.config.acquire_error {
            return Err(sqlx::Error::PoolTimedOut);
        }
        if self.shared.config.no_connection {
            return Ok(None);
        }
        self.shared.counts.lock().connections_acquired += 1;
        Ok(Some(MockConnection {
            shared: self.shared.clone(),
        }))
    }
}

pub struct MockConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for MockConnection {
    type Statement = MockStatement;

    async fn prepare(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> Result<MockStatement, sqlx::Error> {
        let mut counts = self.shared.counts.lock();
        counts.statements_prepared += 1;
        counts.prepared_keys.push(keys);
        counts.prepared_sql.push(sql.to_string());
        Ok(MockStatement {
            shared: self.shared.clone(),
            keys,
            parameters: Vec::new(),
            generated: Vec::new(),
            closed: false,
        })
    }

    async fn execute_update(&mut self, statement: &mut MockStatement) -> Result<u64, sqlx::Error> {
        if self.shared.config.fail_execute {
            return Err(sqlx::Error::Protocol("mock execution failure".to_string()));
        }
        self.shared
            .counts
            .lock()
            .bound
            .extend(statement.parameters.iter().cloned());
        if statement.keys == GeneratedKeys::Return {
            statement.generated = vec![Row::from(vec![Value::Int(self.shared.config.generated_key)])];
        }
        Ok(1)
    }

    async fn execute_query(&mut self, statement: &mut MockStatement) -> Result<MockCursor, sqlx::Error> {
        if self.shared.config.fail_execute {
            return Err(sqlx::Error::Protocol("mock execution failure".to_string()));
        }
        self.shared
            .counts
            .lock()
            .bound
            .extend(statement.parameters.iter().cloned());
        Ok(MockCursor::open(
            self.shared.clone(),
            self.shared.config.rows.clone(),
        ))
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        self.shared.counts.lock().connections_released += 1;
        self.shared.close_result(Resource::Connection)
    }
}

pub struct MockStatement {
    shared: Arc<Shared>,
    keys: GeneratedKeys,
    parameters: Vec<Value>,
    generated: Vec<Row>,
    closed: bool,
}

#[async_trait]
impl Statement for MockStatement {
    type Cursor = MockCursor;

    fn bind(&mut self, index: usize, value: Value) -> Result<(), sqlx::Error> {
        if index == 0 {
            return Err(sqlx::Error::Protocol("parameter index 0 out of range".to_string()));
        }
        if self.parameters.len() < index {
            self.parameters.resize(index, Value::Null);
        }
        self.parameters[index - 1] = value;
        Ok(())
    }

    fn generated_keys(&mut self) -> Result<MockCursor, sqlx::Error> {
        Ok(MockCursor::open(
            self.shared.clone(),
            std::mem::take(&mut self.generated),
        ))
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.counts.lock().statements_closed += 1;
        self.shared.close_result(Resource::Statement)
    }
}

pub struct MockCursor {
    shared: Arc<Shared>,
    rows: VecDeque<Row>,
    closed: bool,
}

impl MockCursor {
    fn open(shared: Arc<Shared>, rows: Vec<Row>) -> Self {
        shared.counts.lock().cursors_opened += 1;
        Self {
            shared,
            rows: rows.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl Cursor for MockCursor {
    async fn next(&mut self) -> Result<Option<Row>, sqlx::Error> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.counts.lock().cursors_closed += 1;
        self.shared.close_result(Resource::Cursor)
    }
}
