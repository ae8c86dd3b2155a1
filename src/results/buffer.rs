use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::error::RdbError;
use crate::types::Value;

use super::row::Row;
use super::schema::Schema;

/// One fully materialized result set.
#[derive(Debug, Clone, Serialize)]
pub struct Buffer {
    /// Name of the command that produced it.
    pub name: String,
    pub schema: Arc<Schema>,
    pub rows: Vec<Row>,
}

impl Buffer {
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column across all rows; `None` for unknown column names.
    #[must_use]
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.schema.index_of(name)?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| row.get_by_index(index))
                .collect(),
        )
    }
}

/// Every result set of one query, in order.
pub type BufferSet = Vec<Buffer>;

/// A failure part way through reading a [`BufferSet`]. The buffers completed before the
/// failure are kept.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct PartialBufferSet {
    pub buffers: BufferSet,
    #[source]
    pub error: RdbError,
}

impl PartialBufferSet {
    #[must_use]
    pub fn new(buffers: BufferSet, error: RdbError) -> Self {
        Self { buffers, error }
    }

    #[must_use]
    pub fn into_parts(self) -> (BufferSet, RdbError) {
        (self.buffers, self.error)
    }
}

impl From<PartialBufferSet> for RdbError {
    fn from(partial: PartialBufferSet) -> Self {
        partial.error
    }
}

impl From<RdbError> for PartialBufferSet {
    fn from(error: RdbError) -> Self {
        Self::new(Vec::new(), error)
    }
}
