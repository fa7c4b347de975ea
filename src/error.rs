use std::fmt;

/// Message used when the data source hands back no usable connection.
pub const CONNECTION_FAILED: &str = "Could not connect to database";

/// Message used when a statement is prepared twice within one execution.
pub const ALREADY_PREPARED: &str = "Statement is already prepared";

/// Message used when statement operations run before `prepare`.
pub const NOT_PREPARED: &str = "Statement is not prepared";

/// Error type for statement execution.
#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("{0}")]
    State(String),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

impl StatementError {
    /// Create a connection error, keeping the pool failure (if any) as its source.
    pub fn connection(source: Option<sqlx::Error>) -> Self {
        Self::Connection {
            message: CONNECTION_FAILED.to_string(),
            source,
        }
    }

    /// Create a state error for a contract violation by query logic.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Query(_) => ErrorKind::Query,
            Self::State(_) => ErrorKind::State,
            Self::Cleanup(_) => ErrorKind::Cleanup,
        }
    }
}

/// Result type for statement operations
pub type StatementResult<T> = Result<T, StatementError>;

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Query,
    State,
    Cleanup,
}

/// A resource held by one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Cursor,
    Statement,
    Connection,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cursor => f.write_str("cursor"),
            Resource::Statement => f.write_str("statement"),
            Resource::Connection => f.write_str("connection"),
        }
    }
}

/// A release step that failed while tearing down an execution.
#[derive(Debug, thiserror::Error)]
#[error("Failed to release {resource}: {source}")]
pub struct CleanupError {
    pub resource: Resource,
    #[source]
    pub source: sqlx::Error,
}

impl CleanupError {
    pub fn new(resource: Resource, source: sqlx::Error) -> Self {
        Self { resource, source }
    }
}

/// Failure surfaced by a unit of work.
///
/// Carries exactly one primary [`StatementError`]. Release failures that
/// happened after the primary failure are kept as suppressed diagnostics and
/// never replace it.
#[derive(Debug)]
pub struct ExecuteError {
    error: StatementError,
    suppressed: Vec<CleanupError>,
}

impl ExecuteError {
    pub(crate) fn new(error: StatementError, suppressed: Vec<CleanupError>) -> Self {
        Self { error, suppressed }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// The primary failure.
    pub fn error(&self) -> &StatementError {
        &self.error
    }

    /// Release failures that occurred after the primary failure.
    pub fn suppressed(&self) -> &[CleanupError] {
        &self.suppressed
    }

    pub fn into_inner(self) -> StatementError {
        self.error
    }
}

impl From<StatementError> for ExecuteError {
    fn from(error: StatementError) -> Self {
        Self::new(error, Vec::new())
    }
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} suppressed release failure(s))", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecuteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.error)
    }
}

/// Error type for data source configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}
