//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use std::sync::Arc;

pub use crate::command::{Command, Param};
pub use crate::config::Config;
pub use crate::error::{RdbError, SqlError};
pub use crate::next::Next;
pub use crate::pool::{Connection, Pool, Preparer, Queryer, Statement, Transaction};
pub use crate::registry::{Opener, Registry, open, register_builtin_drivers};
pub use crate::results::{Buffer, BufferSet, PartialBufferSet, Row, Schema, Slot};
pub use crate::scope::{Scope, begin, query, query_all};
pub use crate::types::{FromValue, Isolation, Value};
