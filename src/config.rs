use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::RdbError;

/// Identifies which driver serves a database and how to reach it.
///
/// Parsed from `scheme://[authority]/path?opt1=val1&opt2=val2`. The scheme selects the driver,
/// everything after `://` is kept verbatim as [`raw`](Config::raw), and the query string is
/// split into ordered options. Repeated keys are kept in order.
///
/// ```rust
/// use rdb::Config;
///
/// let config: Config = "sqlite:///srv/folder/file.sqlite3?opt1=valA&opt2=valB".parse()?;
/// assert_eq!(config.driver_name(), "sqlite");
/// assert_eq!(config.path(), "/srv/folder/file.sqlite3");
/// assert_eq!(config.option("opt2"), Some("valB"));
/// # Ok::<(), rdb::RdbError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    driver_name: String,
    raw: String,
    options: Vec<(String, String)>,
}

impl Config {
    /// Build a config from a driver name and the driver-specific remainder.
    #[must_use]
    pub fn new(driver_name: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let options = parse_options(&raw);
        Self {
            driver_name: driver_name.into(),
            raw,
            options,
        }
    }

    /// Parse a `scheme://...` configuration string.
    ///
    /// # Errors
    /// Returns [`RdbError::ConfigError`] if the scheme separator is missing or the scheme is not
    /// a valid URL scheme.
    pub fn parse_url(input: &str) -> Result<Self, RdbError> {
        let (scheme, raw) = input.split_once("://").ok_or_else(|| {
            RdbError::ConfigError(format!("missing \"://\" in configuration {input:?}"))
        })?;
        let mut chars = scheme.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid {
            return Err(RdbError::ConfigError(format!(
                "invalid driver scheme {scheme:?}"
            )));
        }
        Ok(Self::new(scheme.to_ascii_lowercase(), raw))
    }

    #[must_use]
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Everything after `scheme://`, untouched.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    /// First value for `key`.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in the order given.
    pub fn option_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.options
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse the first value for `key`.
    ///
    /// # Errors
    /// Returns [`RdbError::ConfigError`] when the value is present but does not parse.
    pub fn parse_option<T>(&self, key: &str) -> Result<Option<T>, RdbError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.option(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    RdbError::ConfigError(format!("option {key}={raw:?} is invalid: {e}"))
                })
            })
            .transpose()
    }

    /// The authority part (`user@host:port`), empty when the string starts with a path.
    #[must_use]
    pub fn authority(&self) -> &str {
        let end = self.raw.find(['/', '?', '#']).unwrap_or(self.raw.len());
        &self.raw[..end]
    }

    /// The path between the authority and the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        let rest = &self.raw[self.authority().len()..];
        let end = rest.find(['?', '#']).unwrap_or(rest.len());
        &rest[..end]
    }
}

impl FromStr for Config {
    type Err = RdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Config::parse_url(s)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.driver_name, self.raw)
    }
}

fn parse_options(raw: &str) -> Vec<(String, String)> {
    let Some((_, query)) = raw.split_once('?') else {
        return Vec::new();
    };
    let query = query.split_once('#').map_or(query, |(q, _)| q);
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_url() {
        let config = Config::parse_url("sqlite:///srv/folder/file.sqlite3?opt1=valA&opt2=valB")
            .expect("config");
        assert_eq!(config.driver_name(), "sqlite");
        assert_eq!(config.raw(), "/srv/folder/file.sqlite3?opt1=valA&opt2=valB");
        assert_eq!(config.authority(), "");
        assert_eq!(config.path(), "/srv/folder/file.sqlite3");
        assert_eq!(
            config.options(),
            &[
                ("opt1".to_string(), "valA".to_string()),
                ("opt2".to_string(), "valB".to_string())
            ]
        );
    }

    #[test]
    fn keeps_duplicate_keys_in_order() {
        let config = Config::parse_url("pg://db.local:5432/app?host=a&x=1&host=b").unwrap();
        assert_eq!(config.authority(), "db.local:5432");
        assert_eq!(config.path(), "/app");
        assert_eq!(config.option("host"), Some("a"));
        assert_eq!(config.option_values("host").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn decodes_percent_escapes() {
        let config = Config::parse_url("memory://main?name=a%20b&flag").unwrap();
        assert_eq!(config.authority(), "main");
        assert_eq!(config.option("name"), Some("a b"));
        assert_eq!(config.option("flag"), Some(""));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(matches!(
            Config::parse_url("/tmp/file.db"),
            Err(RdbError::ConfigError(_))
        ));
        assert!(Config::parse_url("1x://host").is_err());
    }

    #[test]
    fn parse_option_reports_bad_values() {
        let config = Config::parse_url("memory://main?max_connections=lots").unwrap();
        assert!(config.parse_option::<u32>("max_connections").is_err());
        assert_eq!(config.parse_option::<u32>("missing").unwrap(), None);
    }
}
