//! Driver lookup: maps a [`Config`] to the opener that can serve it.

use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::error::RdbError;
use crate::pool::Pool;
use crate::scope::Scope;

/// Factory for pools of one driver.
#[async_trait]
pub trait Opener: Send + Sync {
    /// Driver name, used in logs.
    fn name(&self) -> &str;

    /// Whether this opener serves `config`. Must be fast and free of side effects.
    fn can_open(&self, config: &Config) -> bool;

    /// Open a pool. May do I/O and must fail if `scope` is cancelled.
    ///
    /// # Errors
    /// Returns the connection or configuration failure.
    async fn open(&self, scope: &Scope, config: &Config) -> Result<Arc<dyn Pool>, RdbError>;
}

/// Ordered list of openers. The first opener whose `can_open` answers true wins.
#[derive(Default)]
pub struct Registry {
    openers: RwLock<Vec<Arc<dyn Opener>>>,
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`register_opener`] and [`open`].
    #[must_use]
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Append an opener. Openers registered earlier take precedence.
    pub fn register(&self, opener: Arc<dyn Opener>) {
        debug!(driver = opener.name(), "registering opener");
        let mut openers = match self.openers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        openers.push(opener);
    }

    /// Find the first opener for `config`.
    #[must_use]
    pub fn find(&self, config: &Config) -> Option<Arc<dyn Opener>> {
        let openers = match self.openers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        openers.iter().find(|o| o.can_open(config)).cloned()
    }

    /// Open a pool with the first matching opener.
    ///
    /// # Errors
    /// Returns [`RdbError::NoOpenerFound`] when no opener matches, [`RdbError::Cancelled`] when
    /// `scope` is already cancelled, or the opener's failure.
    pub async fn open(&self, scope: &Scope, config: &Config) -> Result<Arc<dyn Pool>, RdbError> {
        scope.check()?;
        let opener = self
            .find(config)
            .ok_or_else(|| RdbError::NoOpenerFound(config.driver_name().to_owned()))?;
        debug!(driver = opener.name(), config = %config.driver_name(), "opening pool");
        opener.open(scope, config).await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self.openers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("openers", &self.len()).finish()
    }
}

/// Register an opener in the process-wide registry.
pub fn register_opener(opener: Arc<dyn Opener>) {
    Registry::global().register(opener);
}

/// Open a pool through the process-wide registry.
///
/// # Errors
/// See [`Registry::open`].
pub async fn open(scope: &Scope, config: &Config) -> Result<Arc<dyn Pool>, RdbError> {
    Registry::global().open(scope, config).await
}

/// Register every driver compiled into this crate with the process-wide registry.
///
/// Only the first call registers; later calls are no-ops.
pub fn register_builtin_drivers() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        register_opener(Arc::new(crate::memory::MemoryOpener::new()));
        #[cfg(feature = "sqlite")]
        register_opener(Arc::new(crate::sqlite::SqliteOpener::new()));
    });
}
