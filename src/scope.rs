//! Cancellable execution scopes and ambient pool lookup.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::next::Next;
use crate::pool::{Pool, Queryer, Transaction};
use crate::results::{BufferSet, PartialBufferSet};
use crate::types::Isolation;

/// Cancellation boundary for database work, optionally carrying a bound pool.
///
/// Every handle produced under a scope (results, transactions, connections, statements) is
/// released when the scope is cancelled. Child scopes are cancelled with their parent.
///
/// ```rust
/// use rdb::Scope;
///
/// let root = Scope::new();
/// let child = root.child();
/// root.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    pool: Option<Arc<dyn Pool>>,
}

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope that is cancelled with this one but can also be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            pool: self.pool.clone(),
        }
    }

    /// A child scope that cancels itself after `timeout`.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.child();
        let token = child.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => token.cancel(),
            }
        });
        child
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail fast before starting I/O.
    ///
    /// # Errors
    /// Returns [`RdbError::Cancelled`] if the scope was cancelled.
    pub fn check(&self) -> Result<(), RdbError> {
        if self.is_cancelled() {
            Err(RdbError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A scope with the same cancellation carrying `pool`. `self` is left untouched.
    #[must_use]
    pub fn bind(&self, pool: Arc<dyn Pool>) -> Self {
        Self {
            token: self.token.clone(),
            pool: Some(pool),
        }
    }

    /// The pool bound to this scope or one of its ancestors.
    #[must_use]
    pub fn pool(&self) -> Option<Arc<dyn Pool>> {
        self.pool.clone()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("cancelled", &self.is_cancelled())
            .field("pool", &self.pool.is_some())
            .finish()
    }
}

/// Derive a scope carrying `pool`.
#[must_use]
pub fn bind(scope: &Scope, pool: Arc<dyn Pool>) -> Scope {
    scope.bind(pool)
}

/// The pool bound to `scope`, if any.
#[must_use]
pub fn lookup(scope: &Scope) -> Option<Arc<dyn Pool>> {
    scope.pool()
}

/// Query the pool bound to `scope`.
///
/// Without a bound pool the returned [`Next`] holds [`RdbError::NoPoolInScope`].
pub async fn query(scope: &Scope, cmd: &Arc<Command>, params: &[Param]) -> Next {
    match scope.pool() {
        Some(pool) => pool.query(scope, cmd, params).await,
        None => Next::failed(RdbError::NoPoolInScope),
    }
}

/// Begin a transaction on the pool bound to `scope`.
///
/// # Errors
/// Returns [`RdbError::NoPoolInScope`] without a bound pool, otherwise whatever the pool returns.
pub async fn begin(scope: &Scope, isolation: Isolation) -> Result<Box<dyn Transaction>, RdbError> {
    let pool = scope.pool().ok_or(RdbError::NoPoolInScope)?;
    pool.begin(scope, isolation).await
}

/// Run a query on the bound pool and buffer every result set.
///
/// The [`Next`] is closed on every path.
///
/// # Errors
/// On failure the sets read so far travel with the error.
pub async fn query_all(
    scope: &Scope,
    cmd: &Arc<Command>,
    params: &[Param],
) -> Result<BufferSet, PartialBufferSet> {
    let mut next = query(scope, cmd, params).await;
    let outcome = next.buffer_set().await;
    let closed = next.close().await;
    match (outcome, closed) {
        (Ok(buffers), Ok(())) => Ok(buffers),
        (Ok(buffers), Err(err)) => Err(PartialBufferSet::new(buffers, err)),
        (Err(partial), _) => Err(partial),
    }
}
