use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::ManageConnection;
use rusqlite::OpenFlags;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::RdbError;
use crate::managed::{Backend, ManagedPool, PoolOptions, Session};
use crate::pool::{Capabilities, Pool};
use crate::registry::Opener;
use crate::scope::Scope;

use super::session::SqliteSession;

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

const MEMORY_PATH: &str = ":memory:";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How the database file is opened, from the `mode` option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SqliteMode {
    ReadOnly,
    ReadWrite,
    #[default]
    ReadWriteCreate,
    Memory,
}

impl SqliteMode {
    fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            SqliteMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
            SqliteMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            SqliteMode::ReadWriteCreate | SqliteMode::Memory => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        }
    }
}

impl FromStr for SqliteMode {
    type Err = RdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ro" => Ok(SqliteMode::ReadOnly),
            "rw" => Ok(SqliteMode::ReadWrite),
            "rwc" => Ok(SqliteMode::ReadWriteCreate),
            "memory" => Ok(SqliteMode::Memory),
            other => Err(RdbError::ConfigError(format!(
                "unknown sqlite mode {other:?} (expected ro, rw, rwc or memory)"
            ))),
        }
    }
}

/// Options for configuring a `SQLite` pool.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub mode: SqliteMode,
    pub busy_timeout: Duration,
    pub pool: PoolOptions,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            mode: SqliteMode::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            pool: PoolOptions::default(),
        }
    }

    #[must_use]
    pub fn builder(db_path: impl Into<String>) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    /// Read the path, `mode`, `busy_timeout_ms` and the pool options from `config`.
    ///
    /// # Errors
    /// Returns [`RdbError::ConfigError`] for an empty path or malformed options.
    pub fn from_config(config: &Config) -> Result<Self, RdbError> {
        let db_path = format!("{}{}", config.authority(), config.path());
        if db_path.is_empty() {
            return Err(RdbError::ConfigError(format!(
                "no database path in {config}"
            )));
        }
        let mut opts = Self::new(db_path);
        opts.pool = PoolOptions::from_config(config)?;
        if let Some(mode) = config.parse_option::<SqliteMode>("mode")? {
            opts.mode = mode;
        }
        if let Some(ms) = config.parse_option::<u64>("busy_timeout_ms")? {
            opts.busy_timeout = Duration::from_millis(ms);
        }
        Ok(opts)
    }

    /// Each in-memory connection is its own database, so such pools hold one connection.
    fn in_memory(&self) -> bool {
        self.mode == SqliteMode::Memory || self.db_path == MEMORY_PATH
    }

    /// Open a pool for these options.
    ///
    /// # Errors
    /// Returns [`RdbError::Cancelled`] if `scope` is cancelled first, or the open failure.
    pub async fn open(self, scope: &Scope) -> Result<ManagedPool<SqliteManager>, RdbError> {
        let mut pool_opts = self.pool.clone();
        if self.in_memory() {
            pool_opts = pool_opts.with_max_size(1);
        }
        ManagedPool::open("sqlite", SqliteManager::new(self), pool_opts, scope).await
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: SqliteMode) -> Self {
        self.opts.mode = mode;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolOptions) -> Self {
        self.opts.pool = pool;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Open a pool with the built options.
    ///
    /// # Errors
    /// See [`SqliteOptions::open`].
    pub async fn build(self, scope: &Scope) -> Result<ManagedPool<SqliteManager>, RdbError> {
        self.finish().open(scope).await
    }
}

/// bb8 connection manager for `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
    flags: OpenFlags,
    busy_timeout: Duration,
}

impl SqliteManager {
    #[must_use]
    pub fn new(opts: SqliteOptions) -> Self {
        let path = if opts.mode == SqliteMode::Memory {
            MEMORY_PATH.to_owned()
        } else {
            opts.db_path
        };
        Self {
            path,
            flags: opts.mode.flags(),
            busy_timeout: opts.busy_timeout,
        }
    }
}

impl ManageConnection for SqliteManager {
    type Connection = Box<dyn Session>;
    type Error = RdbError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        let flags = self.flags;
        let busy_timeout = self.busy_timeout;
        async move {
            let conn = tokio::task::spawn_blocking(move || {
                let conn = rusqlite::Connection::open_with_flags(&path, flags)?;
                conn.busy_timeout(busy_timeout)?;
                Ok::<_, RdbError>(conn)
            })
            .await
            .map_err(|e| {
                RdbError::ConnectionError(format!("sqlite spawn_blocking join error: {e}"))
            })??;
            Ok(Box::new(SqliteSession::new(conn)) as Box<dyn Session>)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.ping().await }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

impl Backend for SqliteManager {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            savepoints: true,
            dedicated_connections: true,
            tracing: true,
        }
    }
}

/// Opener for `sqlite://` and `sqlite3://` configurations.
#[derive(Debug, Default)]
pub struct SqliteOpener;

impl SqliteOpener {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Opener for SqliteOpener {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn can_open(&self, config: &Config) -> bool {
        matches!(config.driver_name(), "sqlite" | "sqlite3")
    }

    async fn open(&self, scope: &Scope, config: &Config) -> Result<Arc<dyn Pool>, RdbError> {
        let pool = SqliteOptions::from_config(config)?.open(scope).await?;
        Ok(Arc::new(pool))
    }
}
