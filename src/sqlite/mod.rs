//! SQLite driver over `rusqlite`, pooled by `bb8`.
//!
//! Registered as `sqlite://` and `sqlite3://`. The database path is everything between the
//! scheme and the query string: `sqlite:///var/db/app.sqlite3`, `sqlite://app.db` or
//! `sqlite://:memory:`. Calls run on the blocking thread pool; a cancelled call interrupts the
//! statement running on the connection.

mod config;
mod params;
mod query;
mod session;

pub use config::{SqliteManager, SqliteMode, SqliteOpener, SqliteOptions, SqliteOptionsBuilder};
