use std::collections::HashSet;
use std::sync::{Arc, Mutex as SyncMutex};

use bb8::PooledConnection;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::next::{Next, NextParts, Owner};
use crate::scope::Scope;
use crate::trace::TraceHandle;

use super::Backend;
use super::pool::PoolShared;

/// A connection reserved for one transaction or dedicated connection.
///
/// The connection goes back to the pool exactly once: on commit, rollback or close, when the
/// scope it was reserved under is cancelled, when the pool closes, or when the handle is dropped.
pub(crate) struct Holder<M: Backend> {
    pub(crate) pool: Arc<PoolShared<M>>,
    pub(crate) conn: Mutex<Option<PooledConnection<'static, M>>>,
    terminal: SyncMutex<Option<RdbError>>,
    /// Savepoints already rolled back to; a new `save_point` with the same name re-arms one.
    consumed: SyncMutex<HashSet<String>>,
    /// Cancelled once the holder is finished; results still open are released with it.
    done: CancellationToken,
    pub(crate) trace: TraceHandle,
    /// What open results report when the holder finishes under them.
    closed_error: RdbError,
}

impl<M: Backend> Holder<M> {
    pub(crate) fn new(
        pool: Arc<PoolShared<M>>,
        conn: PooledConnection<'static, M>,
        trace: TraceHandle,
        closed_error: RdbError,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            conn: Mutex::new(Some(conn)),
            terminal: SyncMutex::new(None),
            consumed: SyncMutex::new(HashSet::new()),
            done: CancellationToken::new(),
            trace,
            closed_error,
        })
    }

    fn terminal(&self) -> std::sync::MutexGuard<'_, Option<RdbError>> {
        match self.terminal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The error every call reports once the holder is finished.
    pub(crate) fn stored(&self) -> Option<RdbError> {
        self.terminal().clone()
    }

    /// Record how the holder finished. Returns `false` if it already had.
    pub(crate) fn mark(&self, err: RdbError) -> bool {
        {
            let mut terminal = self.terminal();
            if terminal.is_some() {
                return false;
            }
            *terminal = Some(err);
        }
        self.done.cancel();
        true
    }

    fn consumed(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.consumed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fails if `name` was already rolled back to since it was last set.
    pub(crate) fn check_savepoint(&self, name: &str) -> Result<(), RdbError> {
        if self.consumed().contains(name) {
            return Err(RdbError::UsageError(format!(
                "savepoint {name:?} was already rolled back to"
            )));
        }
        Ok(())
    }

    pub(crate) fn arm_savepoint(&self, name: &str) {
        self.consumed().remove(name);
    }

    pub(crate) fn consume_savepoint(&self, name: &str) {
        self.consumed().insert(name.to_string());
    }

    pub(crate) async fn query(&self, scope: &Scope, cmd: &Arc<Command>, params: &[Param]) -> Next {
        if let Some(err) = self.stored() {
            return Next::failed(err);
        }
        let trace = self.trace.borrowed();
        trace.query_begin(cmd, params);
        let owner = Owner {
            token: self.done.clone(),
            error: self.closed_error.clone(),
        };
        let result = async {
            self.pool.check_open()?;
            scope.check()?;
            let mut guard = self.conn.lock().await;
            let Some(conn) = guard.as_mut() else {
                return Err(self.stored().unwrap_or_else(|| self.closed_error.clone()));
            };
            self.pool
                .execute(&mut ***conn, scope, &owner, cmd, params, &trace)
                .await
        }
        .await;
        if let Err(err) = &result {
            trace.error(err);
        }
        trace.query_end();
        match result {
            Ok(cursor) => Next::from_parts(
                scope,
                NextParts {
                    cursor,
                    lease: None,
                    trace,
                    owner: Some(owner),
                    name: cmd.name.clone(),
                },
            ),
            Err(err) => Next::failed(err),
        }
    }

    /// Finish with `reason` and give the connection back, rolling back first if asked.
    pub(crate) async fn abandon(&self, reason: RdbError, rollback: bool) {
        if !self.mark(reason.clone()) {
            return;
        }
        let conn = self.conn.lock().await.take();
        if let Some(mut conn) = conn {
            if rollback && let Err(err) = conn.rollback().await {
                warn!(reason = %reason, error = %err, "rollback failed while releasing transaction");
                self.trace.error(&err);
            }
            drop(conn);
            debug!(reason = %reason, "reserved connection released");
        }
        self.trace.close();
    }

    /// Release on scope cancellation or pool shutdown; exits once the holder finishes.
    pub(crate) fn watch(self: &Arc<Self>, scope: &Scope, rollback: bool) {
        let holder = Arc::clone(self);
        let scope = scope.token().clone();
        let pool_closed = self.pool.closed.clone();
        tokio::spawn(async move {
            let reason = tokio::select! {
                biased;
                () = holder.done.cancelled() => return,
                () = scope.cancelled() => RdbError::Cancelled,
                () = pool_closed.cancelled() => RdbError::PoolClosed,
            };
            holder.abandon(reason, rollback).await;
        });
    }

    /// Drop-time release for a handle that was never finished.
    pub(crate) fn release_on_drop(self: &Arc<Self>, rollback: bool) {
        if self.done.is_cancelled() {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let holder = Arc::clone(self);
            let reason = self.closed_error.clone();
            handle.spawn(async move {
                holder.abandon(reason, rollback).await;
            });
        } else if self.mark(self.closed_error.clone()) {
            // No runtime left, so the connection goes back without a rollback.
            if let Ok(mut guard) = self.conn.try_lock() {
                guard.take();
            }
            self.trace.close();
        }
    }
}
