use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::Value as SqliteValue;

use crate::error::RdbError;
use crate::next::MaterializedCursor;
use crate::results::Schema;
use crate::types::Value;

use super::params::from_sqlite;

/// Step `stmt` to completion and collect what it returned.
///
/// Statements without result columns run for their side effects and yield no result set.
pub(crate) fn collect(
    stmt: &mut Statement<'_>,
    text_as_bytes: bool,
) -> Result<MaterializedCursor, RdbError> {
    let mut cursor = MaterializedCursor::new();
    if stmt.column_count() == 0 {
        stmt.raw_execute()?;
        return Ok(cursor);
    }
    let schema = Arc::new(Schema::from_names(stmt.column_names()));
    let width = schema.len();
    let mut rows = Vec::new();
    let mut raw = stmt.raw_query();
    while let Some(row) = raw.next()? {
        let mut values: Vec<Value> = Vec::with_capacity(width);
        for idx in 0..width {
            let value: SqliteValue = row.get(idx)?;
            values.push(from_sqlite(value, text_as_bytes));
        }
        rows.push(values);
    }
    cursor.push_result(schema, rows);
    Ok(cursor)
}
