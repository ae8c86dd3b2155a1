use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RdbError;

/// Values that can be stored in a database row or used as query parameters.
///
/// The same enum is used by every driver so helper code never branches on backend types:
/// ```rust
/// use rdb::prelude::*;
///
/// let params = vec![
///     Param::new(Value::Int(1)),
///     Param::named("name", "alice"),
///     Param::new(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    #[default]
    Null,
    /// JSON value
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            Value::Int(1) => Some(true),
            Value::Int(0) => Some(false),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let Value::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(bytes) => Some(bytes),
            Value::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&JsonValue> {
        if let Value::Json(value) = self {
            Some(value)
        } else {
            None
        }
    }

    /// The generic type this value carries.
    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Int(_) => SqlType::Integer,
            Value::Float(_) => SqlType::Float,
            Value::Text(_) => SqlType::Text,
            Value::Bool(_) => SqlType::Bool,
            Value::Timestamp(_) => SqlType::Timestamp,
            Value::Null => SqlType::Unknown,
            Value::Json(_) => SqlType::Json,
            Value::Blob(_) => SqlType::Binary,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::Json(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a row cell into a Rust type, used by
/// [`Row::get_into`](crate::Row::get_into) and scan slots.
pub trait FromValue: Sized {
    /// # Errors
    /// Returns [`RdbError::ConversionError`] when the cell cannot represent `Self`.
    fn from_value(value: Value) -> Result<Self, RdbError>;
}

fn mismatch(expected: &str, value: &Value) -> RdbError {
    RdbError::ConversionError(format!("cannot read {value:?} as {expected}"))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        value.as_int().ok_or_else(|| mismatch("i64", &value))
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        let wide = value.as_int().ok_or_else(|| mismatch("i32", &value))?;
        i32::try_from(wide).map_err(|_| mismatch("i32", &value))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        value.as_float().ok_or_else(|| mismatch("f64", &value))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        match value {
            Value::Text(text) => Ok(text),
            Value::Blob(bytes) => String::from_utf8(bytes)
                .map_err(|e| RdbError::ConversionError(format!("blob is not utf-8: {e}"))),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        match value {
            Value::Blob(bytes) => Ok(bytes),
            Value::Text(text) => Ok(text.into_bytes()),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        value
            .as_timestamp()
            .ok_or_else(|| mismatch("NaiveDateTime", &value))
    }
}

impl FromValue for JsonValue {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        match value {
            Value::Json(json) => Ok(json),
            Value::Text(text) => serde_json::from_str(&text)
                .map_err(|e| RdbError::ConversionError(format!("invalid json: {e}"))),
            other => Err(mismatch("json", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, RdbError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Generic column and parameter types. Drivers map their native types onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SqlType {
    #[default]
    Unknown,
    Bool,
    Integer,
    Float,
    Decimal,
    Text,
    Binary,
    Timestamp,
    Json,
}

/// Requested transaction isolation. Not every driver supports every level; unsupported levels
/// are rejected with [`RdbError::NotSupported`] when the transaction begins.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    ValueEnum,
    Serialize,
    Deserialize,
)]
pub enum Isolation {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    WriteCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
    Linearizable,
}
