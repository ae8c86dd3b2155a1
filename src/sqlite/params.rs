use rusqlite::Statement;
use rusqlite::types::Value as SqliteValue;

use crate::command::Param;
use crate::error::RdbError;
use crate::types::Value;

const NAME_PREFIXES: [&str; 3] = [":", "@", "$"];

/// Convert a bound value to its `SQLite` storage form.
#[must_use]
pub(crate) fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Timestamp(dt) => SqliteValue::Text(dt.format("%F %T%.f").to_string()),
        Value::Null => SqliteValue::Null,
        Value::Json(json) => SqliteValue::Text(json.to_string()),
        Value::Blob(bytes) => SqliteValue::Blob(bytes.clone()),
    }
}

/// Convert a column value read back from `SQLite`.
#[must_use]
pub(crate) fn from_sqlite(value: SqliteValue, text_as_bytes: bool) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Int(i),
        SqliteValue::Real(f) => Value::Float(f),
        SqliteValue::Text(s) if text_as_bytes => Value::Blob(s.into_bytes()),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(b) => Value::Blob(b),
    }
}

/// Bind `params` to `stmt`. Unnamed params take positions in order; named params are looked up
/// with or without their `:`, `@` or `$` prefix.
pub(crate) fn bind(stmt: &mut Statement<'_>, params: &[Param]) -> Result<(), RdbError> {
    let expected = stmt.parameter_count();
    let mut position = 0;
    for param in params {
        if param.out {
            return Err(RdbError::not_supported("output parameters"));
        }
        let index = match &param.name {
            Some(name) => named_index(stmt, name)?,
            None => {
                position += 1;
                position
            }
        };
        if index > expected {
            return Err(RdbError::ParameterError(format!(
                "statement takes {expected} parameters, got {}",
                params.len()
            )));
        }
        stmt.raw_bind_parameter(index, to_sqlite(&param.value))?;
    }
    Ok(())
}

fn named_index(stmt: &Statement<'_>, name: &str) -> Result<usize, RdbError> {
    if let Some(index) = stmt.parameter_index(name)? {
        return Ok(index);
    }
    for prefix in NAME_PREFIXES {
        if let Some(index) = stmt.parameter_index(&format!("{prefix}{name}"))? {
            return Ok(index);
        }
    }
    Err(RdbError::ParameterError(format!(
        "statement has no parameter named {name:?}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn timestamps_bind_as_text() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(
            to_sqlite(&Value::Timestamp(ts)),
            SqliteValue::Text("2024-03-01 12:30:00".into())
        );
        assert_eq!(to_sqlite(&Value::Bool(true)), SqliteValue::Integer(1));
    }

    #[test]
    fn text_as_bytes_reads_blobs() {
        assert_eq!(
            from_sqlite(SqliteValue::Text("ab".into()), true),
            Value::Blob(b"ab".to_vec())
        );
        assert_eq!(
            from_sqlite(SqliteValue::Text("ab".into()), false),
            Value::Text("ab".into())
        );
    }

    #[test]
    fn named_params_accept_bare_names() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select :id, @name").unwrap();
        assert_eq!(named_index(&stmt, "id").unwrap(), 1);
        assert_eq!(named_index(&stmt, "@name").unwrap(), 2);
        assert!(named_index(&stmt, "missing").is_err());
        bind(&mut stmt, &[Param::named("name", "x"), Param::named("id", 1)]).unwrap();
    }
}
