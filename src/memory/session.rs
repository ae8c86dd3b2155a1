use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::managed::Session;
use crate::next::Cursor;
use crate::results::Schema;
use crate::types::{Isolation, Value};

use super::database::{MemoryDatabase, Step, TxEvent};

/// One connection to a [`MemoryDatabase`].
pub(crate) struct MemorySession {
    db: MemoryDatabase,
    messages: Vec<String>,
}

impl MemorySession {
    pub(crate) fn new(db: MemoryDatabase) -> Self {
        Self {
            db,
            messages: Vec::new(),
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&mut self, cmd: &Command, params: &[Param]) -> Result<Box<dyn Cursor>, RdbError> {
        if params.iter().any(|p| p.out) {
            return Err(RdbError::not_supported("output parameters"));
        }
        let values = params.iter().map(|p| p.value.clone()).collect();
        let mut steps: VecDeque<Step> = self.db.steps(&cmd.sql, values)?.into();
        loop {
            match steps.pop_front() {
                Some(Step::Message(text)) => self.messages.push(text),
                Some(Step::Fail(err)) => return Err(err),
                Some(Step::Stall) => std::future::pending::<()>().await,
                Some(step) => {
                    steps.push_front(step);
                    break;
                }
                None => break,
            }
        }
        Ok(Box::new(ScriptCursor {
            steps,
            rows: VecDeque::new(),
            text_as_bytes: cmd.text_as_bytes,
        }))
    }

    async fn prepare(&mut self, cmd: &Command) -> Result<(), RdbError> {
        self.db.prepare(&cmd.sql)
    }

    async fn begin(&mut self, isolation: Isolation) -> Result<(), RdbError> {
        if isolation > Isolation::Serializable {
            return Err(RdbError::not_supported(format!(
                "isolation level {isolation:?}"
            )));
        }
        self.db.record(TxEvent::Begin(isolation))
    }

    async fn commit(&mut self) -> Result<(), RdbError> {
        self.db.record(TxEvent::Commit)
    }

    async fn rollback(&mut self) -> Result<(), RdbError> {
        self.db.record(TxEvent::Rollback)
    }

    async fn save_point(&mut self, name: &str) -> Result<(), RdbError> {
        self.db.record(TxEvent::SavePoint(name.to_owned()))
    }

    async fn rollback_to(&mut self, name: &str) -> Result<(), RdbError> {
        self.db.record(TxEvent::RollbackTo(name.to_owned()))
    }

    async fn ping(&mut self) -> Result<(), RdbError> {
        Ok(())
    }

    fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }
}

/// Replays the steps left after the first result set.
struct ScriptCursor {
    steps: VecDeque<Step>,
    rows: VecDeque<Vec<Value>>,
    text_as_bytes: bool,
}

#[async_trait]
impl Cursor for ScriptCursor {
    async fn next_result(&mut self) -> Result<Option<Arc<Schema>>, RdbError> {
        self.rows.clear();
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Result(table) => {
                    self.rows = table.rows.into();
                    return Ok(Some(table.schema));
                }
                Step::Fail(err) => return Err(err),
                Step::Stall => std::future::pending::<()>().await,
                Step::Message(_) => {}
            }
        }
        Ok(None)
    }

    async fn fetch(&mut self) -> Result<Option<Vec<Value>>, RdbError> {
        let Some(row) = self.rows.pop_front() else {
            return Ok(None);
        };
        if !self.text_as_bytes {
            return Ok(Some(row));
        }
        Ok(Some(
            row.into_iter()
                .map(|value| match value {
                    Value::Text(text) => Value::Blob(text.into_bytes()),
                    other => other,
                })
                .collect(),
        ))
    }
}
