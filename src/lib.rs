//! Driver-agnostic async access to relational databases.
//!
//! Drivers register an [`Opener`]; [`open`] picks the first opener that accepts a [`Config`]
//! and returns a [`Pool`]. Pools are bound to a [`Scope`] so code deeper in the call tree can
//! [`query`] without threading the pool through. Every query returns a [`Next`], which streams
//! ([`Next::result`]) or buffers ([`Next::buffer`], [`Next::buffer_set`]) the result sets and
//! gives the underlying connection back exactly once: when the results are read to the end,
//! when it is closed, or when its scope is cancelled.
//!
//! ```rust
//! use rdb::prelude::*;
//! use rdb::memory::{MemoryDatabase, MemoryOpener, Step, Table};
//!
//! # #[tokio::main] async fn main() -> Result<(), RdbError> {
//! let db = MemoryDatabase::new();
//! db.script(
//!     "select name from users",
//!     vec![Step::Result(Table::new(&["name"]).row(vec!["ada".into()]))],
//! );
//! let registry = Registry::new();
//! registry.register(Arc::new(MemoryOpener::new().with_database("app", db)));
//!
//! let root = Scope::new();
//! let pool = registry.open(&root, &"memory://app".parse()?).await?;
//! let scope = root.bind(pool);
//!
//! let sets = query_all(&scope, &Command::new("select name from users").shared(), &[])
//!     .await
//!     .map_err(RdbError::from)?;
//! assert_eq!(sets[0].rows[0].get("name"), Some(&Value::Text("ada".into())));
//! # Ok(()) }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod managed;
pub mod memory;
pub mod next;
pub mod pool;
pub mod prelude;
pub mod registry;
pub mod results;
pub mod scope;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod trace;
pub mod types;

pub use command::{Command, Param};
pub use config::Config;
pub use error::{ErrorList, RdbError, SqlError};
pub use next::{Cursor, MaterializedCursor, Next, ResultStream};
pub use pool::{
    Capabilities, Connection, Pool, PoolStatus, Preparer, Queryer, Statement, Transaction,
};
pub use registry::{Opener, Registry, open, register_builtin_drivers, register_opener};
pub use results::{Buffer, BufferSet, Column, PartialBufferSet, Row, ScanTarget, Schema, Slot};
pub use scope::{Scope, begin, bind, lookup, query, query_all};
pub use trace::{TraceEvent, Tracer, TracingTracer};
pub use types::{FromValue, Isolation, SqlType, Value};
