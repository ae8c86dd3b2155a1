use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RdbError;
use crate::results::Schema;
use crate::types::Value;

/// Driver-side iterator over the result sets of one executed command.
///
/// A fresh cursor is positioned before its first result set: [`next_result`](Cursor::next_result)
/// moves to the next set and returns its schema, [`fetch`](Cursor::fetch) reads one row of the
/// current set.
#[async_trait]
pub trait Cursor: Send {
    /// Advance to the next result set. `Ok(None)` once every set was visited.
    async fn next_result(&mut self) -> Result<Option<Arc<Schema>>, RdbError>;

    /// Read the next row of the current set. `Ok(None)` at the end of the set.
    async fn fetch(&mut self) -> Result<Option<Vec<Value>>, RdbError>;

    /// Release driver resources. Called at most once.
    async fn close(&mut self) -> Result<(), RdbError> {
        Ok(())
    }
}

enum Entry {
    Set(Arc<Schema>, VecDeque<Vec<Value>>),
    Error(RdbError),
}

/// Cursor over result sets that were read into memory up front.
///
/// Drivers that cannot hold a server cursor across await points (rusqlite behind
/// `spawn_blocking`) collect rows first and hand them out through this type. A failure that
/// happened after some sets were read is queued with [`push_error`](Self::push_error) and
/// surfaces in order.
#[derive(Default)]
pub struct MaterializedCursor {
    pending: VecDeque<Entry>,
    current: VecDeque<Vec<Value>>,
}

impl MaterializedCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&mut self, schema: Arc<Schema>, rows: Vec<Vec<Value>>) {
        self.pending.push_back(Entry::Set(schema, rows.into()));
    }

    pub fn push_error(&mut self, err: RdbError) {
        self.pending.push_back(Entry::Error(err));
    }

    #[must_use]
    pub fn result_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| matches!(entry, Entry::Set(..)))
            .count()
    }
}

#[async_trait]
impl Cursor for MaterializedCursor {
    async fn next_result(&mut self) -> Result<Option<Arc<Schema>>, RdbError> {
        self.current.clear();
        match self.pending.pop_front() {
            Some(Entry::Set(schema, rows)) => {
                self.current = rows;
                Ok(Some(schema))
            }
            Some(Entry::Error(err)) => Err(err),
            None => Ok(None),
        }
    }

    async fn fetch(&mut self) -> Result<Option<Vec<Value>>, RdbError> {
        Ok(self.current.pop_front())
    }

    async fn close(&mut self) -> Result<(), RdbError> {
        self.pending.clear();
        self.current.clear();
        Ok(())
    }
}
