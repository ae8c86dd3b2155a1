//! Scripted in-process driver, registered as `memory://<name>`.
//!
//! Each database name maps to one [`MemoryDatabase`]; the opener creates missing databases on
//! first use. Options: `savepoints` and `dedicated` (both default `true`) toggle the optional
//! capabilities, plus the pool options read by [`PoolOptions::from_config`].

mod database;
mod session;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bb8::ManageConnection;

use crate::config::Config;
use crate::error::RdbError;
use crate::managed::{Backend, ManagedPool, PoolOptions, Session};
use crate::pool::{Capabilities, Pool};
use crate::registry::Opener;
use crate::scope::Scope;

pub use database::{Execution, MemoryDatabase, Step, Table, TxEvent};

use session::MemorySession;

/// bb8 manager for memory sessions.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    db: MemoryDatabase,
    capabilities: Capabilities,
}

impl MemoryManager {
    #[must_use]
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            db,
            capabilities: Capabilities {
                savepoints: true,
                dedicated_connections: true,
                tracing: true,
            },
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl ManageConnection for MemoryManager {
    type Connection = Box<dyn Session>;
    type Error = RdbError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let db = self.db.clone();
        async move {
            db.connect()?;
            Ok(Box::new(MemorySession::new(db)) as Box<dyn Session>)
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

impl Backend for MemoryManager {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// Opener for `memory://` configurations.
#[derive(Default)]
pub struct MemoryOpener {
    databases: RwLock<HashMap<String, MemoryDatabase>>,
}

impl MemoryOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `db` for `memory://<name>`.
    #[must_use]
    pub fn with_database(self, name: impl Into<String>, db: MemoryDatabase) -> Self {
        self.insert(name, db);
        self
    }

    pub fn insert(&self, name: impl Into<String>, db: MemoryDatabase) {
        let mut databases = match self.databases.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        databases.insert(name.into(), db);
    }

    /// The database served for `name`, created if missing.
    #[must_use]
    pub fn database(&self, name: &str) -> MemoryDatabase {
        let mut databases = match self.databases.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        databases.entry(name.to_owned()).or_default().clone()
    }
}

#[async_trait]
impl Opener for MemoryOpener {
    fn name(&self) -> &str {
        "memory"
    }

    fn can_open(&self, config: &Config) -> bool {
        config.driver_name() == "memory"
    }

    async fn open(&self, scope: &Scope, config: &Config) -> Result<Arc<dyn Pool>, RdbError> {
        let options = PoolOptions::from_config(config)?;
        let capabilities = Capabilities {
            savepoints: config.parse_option::<bool>("savepoints")?.unwrap_or(true),
            dedicated_connections: config.parse_option::<bool>("dedicated")?.unwrap_or(true),
            tracing: true,
        };
        let manager =
            MemoryManager::new(self.database(config.authority())).with_capabilities(capabilities);
        let pool = ManagedPool::open("memory", manager, options, scope).await?;
        Ok(Arc::new(pool))
    }
}
