use std::sync::Arc;

use crate::error::RdbError;
use crate::results::{Row, ScanTarget, Schema};
use crate::types::Value;

use super::Next;

/// Row-by-row access to one result set of a [`Next`].
///
/// Columns can be bound to scan targets with [`prep`](Self::prep) or [`prepx`](Self::prepx)
/// before the first [`scan`](Self::scan); each scan then writes those columns into their targets
/// and leaves them out of the returned [`Row`].
pub struct ResultStream<'a> {
    next: &'a mut Next,
    schema: Arc<Schema>,
    set: usize,
    /// No row of this set was read yet, so binding is still allowed.
    fresh: bool,
    bindings: Vec<(usize, Box<dyn ScanTarget + 'a>)>,
    /// Row a scan target rejected; the next scan offers it again.
    held: Option<Vec<Value>>,
}

impl<'a> ResultStream<'a> {
    pub(super) fn new(next: &'a mut Next, schema: Arc<Schema>, set: usize, fresh: bool) -> Self {
        Self {
            next,
            schema,
            set,
            fresh,
            bindings: Vec::new(),
            held: None,
        }
    }

    /// Columns of this result set. Known before the first scan.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Bind the named column to `target`.
    ///
    /// # Errors
    /// Returns [`RdbError::UsageError`] after the first scan or for an unknown column.
    pub fn prep(&mut self, name: &str, target: impl ScanTarget + 'a) -> Result<&mut Self, RdbError> {
        let index = self
            .schema
            .index_of(name)
            .ok_or_else(|| RdbError::UsageError(format!("no column named {name:?} to bind")))?;
        self.bind(index, Box::new(target))
    }

    /// Bind the column at `index` to `target`.
    ///
    /// # Errors
    /// Returns [`RdbError::UsageError`] after the first scan or for an index out of range.
    pub fn prepx(&mut self, index: usize, target: impl ScanTarget + 'a) -> Result<&mut Self, RdbError> {
        if index >= self.schema.len() {
            return Err(RdbError::UsageError(format!(
                "column index {index} out of range for {} columns",
                self.schema.len()
            )));
        }
        self.bind(index, Box::new(target))
    }

    fn bind(&mut self, index: usize, target: Box<dyn ScanTarget + 'a>) -> Result<&mut Self, RdbError> {
        if !self.fresh {
            return Err(RdbError::UsageError(
                "columns must be bound before the first scan".into(),
            ));
        }
        self.bindings.retain(|(bound, _)| *bound != index);
        self.bindings.push((index, target));
        Ok(self)
    }

    /// Read one row. `Ok(None)` marks the end of this result set.
    ///
    /// When a scan target rejects its value the row is kept, and the next call retries the same
    /// row instead of reading a new one.
    ///
    /// # Errors
    /// Returns the driver failure, [`RdbError::Cancelled`] when the scope was cancelled, or the
    /// error of a scan target that rejected its value.
    pub async fn scan(&mut self) -> Result<Option<Row>, RdbError> {
        let values = {
            let shared = &self.next.shared;
            let mut st = shared.state.lock().await;
            if let Some(terminal) = &st.terminal {
                return terminal.read_outcome();
            }
            if st.set != self.set {
                return Ok(None);
            }
            shared.check_tokens(&mut st).await?;
            self.fresh = false;
            if let Some(values) = self.held.take() {
                values
            } else {
                match shared.fetch(&mut st).await? {
                    Some(values) => values,
                    None => return Ok(None),
                }
            }
        };
        if self.bindings.is_empty() {
            return Ok(Some(Row::new(Arc::clone(&self.schema), values)));
        }
        let mut cells: Vec<Option<Value>> = values.iter().cloned().map(Some).collect();
        for (index, target) in &mut self.bindings {
            let value = cells.get_mut(*index).and_then(Option::take).unwrap_or_default();
            if let Err(err) = target.assign(value) {
                self.held = Some(values);
                return Err(err);
            }
        }
        Ok(Some(Row::with_gaps(Arc::clone(&self.schema), cells)))
    }

    /// Close the underlying [`Next`].
    ///
    /// # Errors
    /// See [`Next::close`].
    pub async fn close(self) -> Result<(), RdbError> {
        self.next.close().await
    }
}

impl std::fmt::Debug for ResultStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("schema", &self.schema)
            .field("bound", &self.bindings.len())
            .finish_non_exhaustive()
    }
}
