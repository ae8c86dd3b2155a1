use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::RdbError;
use crate::types::{FromValue, Value};

use super::schema::Schema;

/// A materialized row from a query result.
///
/// The schema is shared by every row of the result set. Columns bound to a scan target with
/// [`ResultStream::prep`](crate::ResultStream::prep) are written to the target instead and read
/// back as absent here.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    #[serde(skip)]
    schema: Arc<Schema>,
    values: Vec<Option<Value>>,
}

impl Row {
    #[must_use]
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Self {
        Self {
            schema,
            values: values.into_iter().map(Some).collect(),
        }
    }

    pub(crate) fn with_gaps(schema: Arc<Schema>, values: Vec<Option<Value>>) -> Self {
        Self { schema, values }
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        self.schema
            .index_of(column_name)
            .and_then(|idx| self.get_by_index(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Copy the named column into `target`, converting it on the way.
    ///
    /// Returns the row so several columns can be read in one chain:
    /// ```rust
    /// # use std::sync::Arc;
    /// # use rdb::prelude::*;
    /// # fn demo() -> Result<(), RdbError> {
    /// let schema = Arc::new(Schema::from_names(["id", "name"]));
    /// let row = Row::new(schema, vec![Value::Int(7), Value::Text("ada".into())]);
    /// let (mut id, mut name) = (0_i64, String::new());
    /// row.get_into("id", &mut id)?.get_into("name", &mut name)?;
    /// assert_eq!((id, name.as_str()), (7, "ada"));
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    /// Returns [`RdbError::UsageError`] for unknown or bound columns and
    /// [`RdbError::ConversionError`] when the value does not fit `T`.
    pub fn get_into<T: FromValue>(&self, column_name: &str, target: &mut T) -> Result<&Self, RdbError> {
        let index = self.schema.index_of(column_name).ok_or_else(|| {
            RdbError::UsageError(format!("no column named {column_name:?}"))
        })?;
        self.get_into_index(index, target)
    }

    /// Copy the column at `index` into `target`.
    ///
    /// # Errors
    /// Same as [`get_into`](Row::get_into).
    pub fn get_into_index<T: FromValue>(&self, index: usize, target: &mut T) -> Result<&Self, RdbError> {
        let value = self.get_by_index(index).ok_or_else(|| {
            RdbError::UsageError(format!("no value at column index {index}"))
        })?;
        *target = T::from_value(value.clone())?;
        Ok(self)
    }

    /// Values in column order, `None` for bound columns.
    #[must_use]
    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }
}

/// Destination storage bound to a column before scanning.
pub trait ScanTarget: Send {
    /// Store the value of the bound column for the row just scanned.
    ///
    /// # Errors
    /// Returns an error when the value cannot be stored, which fails the scan.
    fn assign(&mut self, value: Value) -> Result<(), RdbError>;
}

/// A shareable scan target: keep one clone, bind the other, read after each scan.
///
/// ```rust
/// use rdb::Slot;
///
/// let id = Slot::<i64>::new();
/// let bound = id.clone();
/// # let _ = bound;
/// assert_eq!(id.get(), None);
/// ```
#[derive(Debug)]
pub struct Slot<T> {
    cell: Arc<Mutex<Option<T>>>,
}

impl<T> Slot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(None)),
        }
    }

    /// Take the last stored value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        match self.cell.lock() {
            Ok(guard) => guard,
            // Clear the poison and continue with the recovered data
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Clone> Slot<T> {
    /// The last stored value.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromValue + Send> ScanTarget for Slot<T> {
    fn assign(&mut self, value: Value) -> Result<(), RdbError> {
        let converted = T::from_value(value)?;
        *self.lock() = Some(converted);
        Ok(())
    }
}

impl<T: ScanTarget + ?Sized> ScanTarget for &mut T {
    fn assign(&mut self, value: Value) -> Result<(), RdbError> {
        (**self).assign(value)
    }
}

impl ScanTarget for Vec<Value> {
    fn assign(&mut self, value: Value) -> Result<(), RdbError> {
        self.push(value);
        Ok(())
    }
}
