use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::RdbError;
use crate::results::{Column, Schema};
use crate::types::{Isolation, Value};

/// One step of a scripted statement, replayed in order when the statement runs.
#[derive(Debug, Clone)]
pub enum Step {
    /// A result set.
    Result(Table),
    /// A failure at this point of the execution.
    Fail(RdbError),
    /// A server message. Only messages before the first result set are delivered.
    Message(String),
    /// Never completes; only cancellation gets past it.
    Stall,
}

/// Rows of one scripted result set.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) schema: Arc<Schema>,
    pub(crate) rows: Vec<Vec<Value>>,
}

impl Table {
    #[must_use]
    pub fn new(columns: &[&str]) -> Self {
        Self::with_columns(columns.iter().map(|name| Column::new(*name)).collect())
    }

    #[must_use]
    pub fn with_columns(columns: Vec<Column>) -> Self {
        Self {
            schema: Arc::new(Schema::new(columns)),
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }
}

/// One statement the database received.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Transaction activity, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    Begin(Isolation),
    Commit,
    Rollback,
    SavePoint(String),
    RollbackTo(String),
}

#[derive(Default)]
struct DbState {
    scripts: HashMap<String, Vec<Step>>,
    executed: Vec<Execution>,
    tx_events: Vec<TxEvent>,
    prepares: usize,
    connects: usize,
    fail_connect: bool,
    fail_commit: Option<RdbError>,
    fail_rollback: Option<RdbError>,
}

/// Scripted in-process database.
///
/// Statements are matched by exact SQL text against the registered scripts. Everything the
/// database receives is recorded so tests can assert on it. Clones share the same state.
///
/// ```rust
/// use rdb::memory::{MemoryDatabase, Step, Table};
/// use rdb::Value;
///
/// let db = MemoryDatabase::new();
/// db.script(
///     "select id from users",
///     vec![Step::Result(Table::new(&["id"]).row(vec![Value::Int(1)]))],
/// );
/// assert!(db.executed().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DbState>>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DbState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register the steps replayed for `sql`, replacing an earlier script.
    pub fn script(&self, sql: impl Into<String>, steps: Vec<Step>) {
        self.state().scripts.insert(sql.into(), steps);
    }

    /// Make the next commit fail with `err`.
    pub fn fail_next_commit(&self, err: RdbError) {
        self.state().fail_commit = Some(err);
    }

    /// Make the next rollback fail with `err`.
    pub fn fail_next_rollback(&self, err: RdbError) {
        self.state().fail_rollback = Some(err);
    }

    /// Refuse new connections while set.
    pub fn fail_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    #[must_use]
    pub fn executed(&self) -> Vec<Execution> {
        self.state().executed.clone()
    }

    #[must_use]
    pub fn tx_events(&self) -> Vec<TxEvent> {
        self.state().tx_events.clone()
    }

    #[must_use]
    pub fn prepare_count(&self) -> usize {
        self.state().prepares
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub(crate) fn connect(&self) -> Result<(), RdbError> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(RdbError::ConnectionError(
                "memory database refused the connection".into(),
            ));
        }
        state.connects += 1;
        Ok(())
    }

    pub(crate) fn steps(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Step>, RdbError> {
        let mut state = self.state();
        state.executed.push(Execution {
            sql: sql.to_owned(),
            params,
        });
        state.scripts.get(sql).cloned().ok_or_else(|| unknown(sql))
    }

    pub(crate) fn prepare(&self, sql: &str) -> Result<(), RdbError> {
        let mut state = self.state();
        if !state.scripts.contains_key(sql) {
            return Err(unknown(sql));
        }
        state.prepares += 1;
        Ok(())
    }

    pub(crate) fn record(&self, event: TxEvent) -> Result<(), RdbError> {
        let mut state = self.state();
        let injected = match event {
            TxEvent::Commit => state.fail_commit.take(),
            TxEvent::Rollback => state.fail_rollback.take(),
            _ => None,
        };
        if let Some(err) = injected {
            return Err(err);
        }
        state.tx_events.push(event);
        Ok(())
    }
}

fn unknown(sql: &str) -> RdbError {
    crate::error::SqlError::new(format!("no such statement: {sql}"), 1)
        .at_line(1)
        .into()
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryDatabase")
            .field("scripts", &state.scripts.len())
            .field("executed", &state.executed.len())
            .finish_non_exhaustive()
    }
}
