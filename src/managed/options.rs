use std::time::Duration;

use crate::config::Config;
use crate::error::RdbError;

const DEFAULT_MAX_SIZE: u32 = 4;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for configuring a managed pool.
///
/// Read from a [`Config`] with [`PoolOptions::from_config`]:
/// `max_connections`, `connect_timeout_ms` and `verify` (ping once on open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub verify: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            verify: true,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::new()
    }

    /// # Errors
    /// Returns [`RdbError::ConfigError`] for malformed values or a zero pool size.
    pub fn from_config(config: &Config) -> Result<Self, RdbError> {
        let mut opts = Self::default();
        if let Some(max_size) = config.parse_option::<u32>("max_connections")? {
            if max_size == 0 {
                return Err(RdbError::ConfigError(
                    "max_connections must be at least 1".into(),
                ));
            }
            opts.max_size = max_size;
        }
        if let Some(ms) = config.parse_option::<u64>("connect_timeout_ms")? {
            opts.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(verify) = config.parse_option::<bool>("verify")? {
            opts.verify = verify;
        }
        Ok(opts)
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }
}

/// Fluent builder for [`PoolOptions`].
#[derive(Debug, Clone, Default)]
pub struct PoolOptionsBuilder {
    opts: PoolOptions,
}

impl PoolOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.opts.max_size = max_size.max(1);
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.opts.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn verify(mut self, verify: bool) -> Self {
        self.opts.verify = verify;
        self
    }

    #[must_use]
    pub fn finish(self) -> PoolOptions {
        self.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_known_keys() {
        let config =
            Config::parse_url("memory://db?max_connections=2&connect_timeout_ms=250&verify=false")
                .unwrap();
        let opts = PoolOptions::from_config(&config).unwrap();
        assert_eq!(opts.max_size, 2);
        assert_eq!(opts.connection_timeout, Duration::from_millis(250));
        assert!(!opts.verify);
    }

    #[test]
    fn rejects_zero_size() {
        let config = Config::parse_url("memory://db?max_connections=0").unwrap();
        assert!(matches!(
            PoolOptions::from_config(&config),
            Err(RdbError::ConfigError(_))
        ));
    }

    #[test]
    fn builder_matches_defaults() {
        assert_eq!(PoolOptions::builder().finish(), PoolOptions::default());
        let opts = PoolOptions::builder().max_size(0).verify(false).finish();
        assert_eq!(opts.max_size, 1);
        assert!(!opts.verify);
    }
}
