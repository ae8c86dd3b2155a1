//! A reusable [`Pool`](crate::Pool) implementation over `bb8`.
//!
//! A driver provides a `bb8::ManageConnection` whose connections are boxed [`Session`]s, marks
//! it as a [`Backend`], and hands it to [`ManagedPool::open`]. The managed pool supplies the
//! capability model on top: checkout, cancellation races, transactions and dedicated connections
//! with release watchers, the prepared-statement cache and tracing.

mod connection;
mod holder;
mod options;
mod pool;
mod statement;
mod transaction;

use std::future::Future;

use async_trait::async_trait;
use bb8::ManageConnection;

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::next::{Cursor, Owner};
use crate::pool::Capabilities;
use crate::scope::Scope;
use crate::types::Isolation;

pub use options::{PoolOptions, PoolOptionsBuilder};
pub use pool::ManagedPool;

/// A `bb8` manager whose connections are driver sessions.
pub trait Backend: ManageConnection<Connection = Box<dyn Session>, Error = RdbError> {
    /// Optional features of this driver. Tracing is always provided by the managed pool.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

/// One driver connection.
///
/// Every call runs on a connection that is checked out of the pool for the caller alone.
#[async_trait]
pub trait Session: Send + 'static {
    /// Run `cmd` and return a cursor over its result sets.
    ///
    /// Param lengths were already checked and truncated.
    async fn execute(&mut self, cmd: &Command, params: &[Param]) -> Result<Box<dyn Cursor>, RdbError>;

    /// Validate a command that will be executed repeatedly.
    async fn prepare(&mut self, _cmd: &Command) -> Result<(), RdbError> {
        Ok(())
    }

    async fn begin(&mut self, isolation: Isolation) -> Result<(), RdbError>;

    async fn commit(&mut self) -> Result<(), RdbError>;

    async fn rollback(&mut self) -> Result<(), RdbError>;

    async fn save_point(&mut self, _name: &str) -> Result<(), RdbError> {
        Err(RdbError::not_supported("savepoints"))
    }

    async fn rollback_to(&mut self, _name: &str) -> Result<(), RdbError> {
        Err(RdbError::not_supported("savepoints"))
    }

    async fn ping(&mut self) -> Result<(), RdbError>;

    /// Server messages collected since the last call, forwarded to the tracer.
    fn take_messages(&mut self) -> Vec<String> {
        Vec::new()
    }
}

/// Run `op` unless `scope` is cancelled or `owner` shuts down first.
pub(crate) async fn guarded<T>(
    scope: &Scope,
    owner: &Owner,
    op: impl Future<Output = Result<T, RdbError>>,
) -> Result<T, RdbError> {
    if scope.is_cancelled() {
        return Err(RdbError::Cancelled);
    }
    tokio::select! {
        biased;
        () = scope.cancelled() => Err(RdbError::Cancelled),
        () = owner.token.cancelled() => Err(owner.error.clone()),
        res = op => res,
    }
}

/// Apply declared lengths before the params reach the driver.
pub(crate) fn bind_params(cmd: &Command, params: &[Param]) -> Result<Vec<Param>, RdbError> {
    params
        .iter()
        .enumerate()
        .map(|(position, param)| {
            let value = param.bound_value(cmd, position)?.into_owned();
            Ok(Param {
                value,
                ..param.clone()
            })
        })
        .collect()
}
