use std::fmt;
#[cfg(feature = "sqlite")]
use std::sync::Arc;

use thiserror::Error;

/// Errors reported by the access layer and by registered drivers.
///
/// Every variant is cheap to clone: a closed [`Next`](crate::Next) or a finished
/// [`Transaction`](crate::Transaction) hands out the same stored error on every later call.
#[derive(Debug, Clone, Error)]
pub enum RdbError {
    #[error("no registered opener can open driver {0:?}")]
    NoOpenerFound(String),

    #[error("no pool bound to scope")]
    NoPoolInScope,

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("result closed")]
    Closed,

    #[error("pool closed")]
    PoolClosed,

    #[error("statement closed")]
    StatementClosed,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transaction already finished")]
    TransactionDone,

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("{0}")]
    List(ErrorList),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(Arc<rusqlite::Error>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Conversion error: {0}")]
    ConversionError(String),

    #[error("Usage error: {0}")]
    UsageError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl RdbError {
    /// The server-side diagnostic, when the driver reported one.
    #[must_use]
    pub fn as_sql_error(&self) -> Option<&SqlError> {
        match self {
            RdbError::Sql(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RdbError::Cancelled)
    }

    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        matches!(self, RdbError::NotSupported(_))
    }

    pub(crate) fn not_supported(what: impl Into<String>) -> Self {
        RdbError::NotSupported(what.into())
    }

    /// Join two failures of one operation, flattening nested lists.
    #[must_use]
    pub fn join(self, other: RdbError) -> RdbError {
        let mut list = match self {
            RdbError::List(list) => list,
            err => ErrorList(vec![err]),
        };
        match other {
            RdbError::List(more) => list.0.extend(more.0),
            err => list.0.push(err),
        }
        RdbError::List(list)
    }
}

/// A failure reported by the database server for a specific statement.
///
/// Carries the line of the offending SQL text when the server reports one, which makes syntax
/// errors in long batches easy to locate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SqlError {
    message: String,
    line: Option<u32>,
    code: i32,
}

impl SqlError {
    #[must_use]
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            line: None,
            code,
        }
    }

    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line_number(&self) -> Option<u32> {
        self.line
    }

    /// Driver specific error code.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        self.code
    }
}

/// Several failures surfaced by one operation, e.g. a failed rollback after a failed commit.
#[derive(Debug, Clone, Default)]
pub struct ErrorList(pub Vec<RdbError>);

impl ErrorList {
    #[must_use]
    pub fn errors(&self) -> &[RdbError] {
        &self.0
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, err) in self.0.iter().enumerate() {
            if index != 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for RdbError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message) => {
                let message = message.unwrap_or_else(|| code.to_string());
                RdbError::Sql(SqlError::new(message, code.extended_code))
            }
            other => RdbError::SqliteError(Arc::new(other)),
        }
    }
}

impl From<bb8::RunError<RdbError>> for RdbError {
    fn from(err: bb8::RunError<RdbError>) -> Self {
        match err {
            bb8::RunError::User(err) => err,
            bb8::RunError::TimedOut => {
                RdbError::ConnectionError("timed out waiting for a pooled connection".into())
            }
        }
    }
}
