use std::borrow::Cow;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

use crate::error::RdbError;
use crate::types::{Isolation, SqlType, Value};

/// One executable statement.
///
/// A command is shared as `Arc<Command>`. When [`prepare`](Command::prepare) is set the same
/// `Arc` must be reused for every execution: the pointer identity is the key of the pool's
/// prepared-statement cache, so two commands with equal SQL text do not share a statement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Command {
    /// The SQL to be executed.
    pub sql: String,
    /// Optional name, used by tracing and as the name of buffered results.
    pub name: String,
    /// Keep a prepared statement for this command in the pool's cache.
    pub prepare: bool,
    /// Silently truncate text longer than a parameter's declared length instead of failing.
    pub truncate_long_text: bool,
    /// Return text columns as bytes.
    pub text_as_bytes: bool,
    /// Isolation requested for the command; drivers may ignore it outside transactions.
    pub isolation: Isolation,
}

impl Command {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn prepared(mut self) -> Self {
        self.prepare = true;
        self
    }

    #[must_use]
    pub fn truncate_long_text(mut self, truncate: bool) -> Self {
        self.truncate_long_text = truncate;
        self
    }

    #[must_use]
    pub fn text_as_bytes(mut self, as_bytes: bool) -> Self {
        self.text_as_bytes = as_bytes;
        self
    }

    #[must_use]
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Wrap the command for sharing across executions.
    #[must_use]
    pub fn shared(self) -> Arc<Command> {
        Arc::new(self)
    }

    /// Name for logs: the explicit name, or the first line of SQL.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.sql.lines().next().unwrap_or_default().trim()
        } else {
            &self.name
        }
    }
}

/// Identity key of a shared command. Holding the `Arc` keeps the address from being reused
/// while the key is cached.
#[derive(Debug, Clone)]
pub(crate) struct CommandKey(Arc<Command>);

impl CommandKey {
    pub(crate) fn new(cmd: &Arc<Command>) -> Self {
        Self(Arc::clone(cmd))
    }
}

impl PartialEq for CommandKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CommandKey {}

impl Hash for CommandKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

/// One bound argument. Unnamed params bind by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    /// Declared type; drivers may infer it from the value when `Unknown`.
    pub sql_type: SqlType,
    /// Output parameter. Only drivers that support them accept it.
    pub out: bool,
    /// Do not send this value to the tracer.
    pub no_trace: bool,
    /// Declared length for variable length types.
    pub length: Option<usize>,
    pub value: Value,
}

impl Param {
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn typed(mut self, sql_type: SqlType) -> Self {
        self.sql_type = sql_type;
        self
    }

    #[must_use]
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn no_trace(mut self) -> Self {
        self.no_trace = true;
        self
    }

    #[must_use]
    pub fn output(mut self) -> Self {
        self.out = true;
        self
    }

    fn label(&self, position: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("#{}", position + 1))
    }

    /// The value to send, after applying the declared length.
    ///
    /// Text is measured in characters and bytes in bytes. Longer values are cut when the
    /// command allows truncation and rejected otherwise.
    ///
    /// # Errors
    /// Returns [`RdbError::ParameterError`] when the value exceeds its length and truncation is
    /// off.
    pub fn bound_value(&self, cmd: &Command, position: usize) -> Result<Cow<'_, Value>, RdbError> {
        let Some(limit) = self.length else {
            return Ok(Cow::Borrowed(&self.value));
        };
        let too_long = |actual: usize| {
            RdbError::ParameterError(format!(
                "value for {} has length {actual}, declared {limit}",
                self.label(position)
            ))
        };
        match &self.value {
            Value::Text(text) => {
                let count = text.chars().count();
                if count <= limit {
                    Ok(Cow::Borrowed(&self.value))
                } else if cmd.truncate_long_text {
                    Ok(Cow::Owned(Value::Text(text.chars().take(limit).collect())))
                } else {
                    Err(too_long(count))
                }
            }
            Value::Blob(bytes) => {
                if bytes.len() <= limit {
                    Ok(Cow::Borrowed(&self.value))
                } else if cmd.truncate_long_text {
                    Ok(Cow::Owned(Value::Blob(bytes[..limit].to_vec())))
                } else {
                    Err(too_long(bytes.len()))
                }
            }
            _ => Ok(Cow::Borrowed(&self.value)),
        }
    }
}

/// Copy of `params` safe to hand to a tracer: values flagged `no_trace` become `Null`.
pub(crate) fn redact(params: &[Param]) -> Cow<'_, [Param]> {
    if params.iter().all(|p| !p.no_trace) {
        return Cow::Borrowed(params);
    }
    Cow::Owned(
        params
            .iter()
            .map(|p| {
                if p.no_trace {
                    Param {
                        value: Value::Null,
                        ..p.clone()
                    }
                } else {
                    p.clone()
                }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn command_key_uses_identity() {
        let a = Command::new("select 1").prepared().shared();
        let b = Command::new("select 1").prepared().shared();
        let mut keys = HashSet::new();
        keys.insert(CommandKey::new(&a));
        assert!(keys.contains(&CommandKey::new(&a)));
        assert!(!keys.contains(&CommandKey::new(&b)));
    }

    #[test]
    fn long_text_is_rejected_or_truncated() {
        let param = Param::named("title", "abcdef").length(3);
        let strict = Command::new("insert");
        assert!(matches!(
            param.bound_value(&strict, 0),
            Err(RdbError::ParameterError(_))
        ));

        let lenient = Command::new("insert").truncate_long_text(true);
        let value = param.bound_value(&lenient, 0).unwrap();
        assert_eq!(value.as_ref(), &Value::Text("abc".into()));
    }

    #[test]
    fn redact_hides_no_trace_values() {
        let params = vec![Param::new(1), Param::named("secret", "hunter2").no_trace()];
        let redacted = redact(&params);
        assert_eq!(redacted[0].value, Value::Int(1));
        assert_eq!(redacted[1].value, Value::Null);
        assert_eq!(redacted[1].name.as_deref(), Some("secret"));
    }

    #[test]
    fn label_falls_back_to_sql() {
        assert_eq!(Command::new("select 1\nfrom t").label(), "select 1");
        assert_eq!(Command::new("select 1").named("health_check").label(), "health_check");
    }
}
