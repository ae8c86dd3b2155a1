//! Capability traits over a live backend.
//!
//! A [`Pool`] is the entry point; [`Connection`], [`Transaction`] and [`Statement`] are scoped
//! sub-resources it produces. Optional capabilities have default methods that answer
//! [`RdbError::NotSupported`], so a driver only overrides what it really offers.

pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::next::Next;
use crate::scope::Scope;
use crate::trace::Tracer;
use crate::types::Isolation;

pub use types::{Capabilities, PoolStatus};

/// Runs commands.
///
/// The command has been sent once the call returns. Failures, including cancellation, are
/// reported through the returned [`Next`].
#[async_trait]
pub trait Queryer: Send + Sync {
    async fn query(&self, scope: &Scope, cmd: &Arc<Command>, params: &[Param]) -> Next;
}

/// Prepares commands for repeated execution.
#[async_trait]
pub trait Preparer: Send + Sync {
    /// # Errors
    /// Returns the driver failure, or [`RdbError::Cancelled`] when the scope is cancelled.
    async fn prepare(&self, scope: &Scope, cmd: &Arc<Command>) -> Result<Box<dyn Statement>, RdbError>;
}

/// A pool of connections to one database.
#[async_trait]
pub trait Pool: Queryer + Preparer {
    /// Start a transaction on a connection reserved until commit, rollback or cancellation of
    /// `scope`.
    ///
    /// # Errors
    /// Returns [`RdbError::NotSupported`] for an isolation level the driver does not offer.
    async fn begin(&self, scope: &Scope, isolation: Isolation) -> Result<Box<dyn Transaction>, RdbError>;

    /// Reserve one connection until it is closed or `scope` is cancelled.
    ///
    /// # Errors
    /// Returns [`RdbError::NotSupported`] unless the pool offers dedicated connections.
    async fn connection(&self, _scope: &Scope) -> Result<Box<dyn Connection>, RdbError> {
        Err(RdbError::not_supported("dedicated connections"))
    }

    /// Check that the database answers.
    ///
    /// # Errors
    /// Returns the connection failure.
    async fn ping(&self, scope: &Scope) -> Result<(), RdbError>;

    /// Stop handing out connections. Idempotent.
    async fn close(&self) -> Result<(), RdbError>;

    fn status(&self) -> PoolStatus;

    fn capabilities(&self) -> Capabilities;

    /// Install or remove the tracer used for later operations.
    ///
    /// # Errors
    /// Returns [`RdbError::NotSupported`] when the pool cannot trace.
    fn set_tracer(&self, _tracer: Option<Arc<dyn Tracer>>) -> Result<(), RdbError> {
        Err(RdbError::not_supported("tracing"))
    }
}

/// One reserved connection.
#[async_trait]
pub trait Connection: Queryer {
    /// Return the connection to the pool. Idempotent.
    async fn close(&self) -> Result<(), RdbError>;
}

/// One open transaction.
///
/// After commit, rollback or cancellation of its scope, every further call returns the stored
/// terminal error without touching the database.
#[async_trait]
pub trait Transaction: Queryer {
    /// Commit. On failure a rollback is attempted and both failures are reported.
    ///
    /// # Errors
    /// Returns [`RdbError::TransactionDone`] after the transaction finished, or
    /// [`RdbError::Cancelled`] after its scope was cancelled.
    async fn commit(&self, scope: &Scope) -> Result<(), RdbError>;

    /// # Errors
    /// Same as [`commit`](Transaction::commit).
    async fn rollback(&self, scope: &Scope) -> Result<(), RdbError>;

    /// # Errors
    /// Returns [`RdbError::NotSupported`] when the driver has no savepoints.
    async fn save_point(&self, _scope: &Scope, _name: &str) -> Result<(), RdbError> {
        Err(RdbError::not_supported("savepoints"))
    }

    /// Roll back to `name`. Commit or rollback must still follow.
    ///
    /// # Errors
    /// Returns [`RdbError::NotSupported`] when the driver has no savepoints, and
    /// [`RdbError::UsageError`] when `name` was already rolled back to and not set again.
    async fn rollback_to(&self, _scope: &Scope, _name: &str) -> Result<(), RdbError> {
        Err(RdbError::not_supported("savepoints"))
    }
}

/// A prepared command, valid until its prepare scope is cancelled or the pool closes.
#[async_trait]
pub trait Statement: Send + Sync {
    /// Execute with `params`. A cancelled scope yields a [`Next`] holding
    /// [`RdbError::Cancelled`] without touching the database.
    async fn exec(&self, scope: &Scope, params: &[Param]) -> Next;

    fn command(&self) -> &Arc<Command>;

    /// Release the statement. Idempotent.
    async fn close(&self) -> Result<(), RdbError>;
}

impl std::fmt::Debug for dyn Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for dyn Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}
