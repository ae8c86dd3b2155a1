use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::next::Next;
use crate::pool::Statement;
use crate::scope::Scope;
use crate::trace::TraceHandle;

use super::pool::PoolShared;
use super::{Backend, guarded};

/// A command validated once and kept in the pool's prepared-statement cache.
///
/// Executions check out any pool connection. The cache entry is shared with other statements for
/// the same command and dropped with the last of them. A statement is released on
/// [`close`](Statement::close), when its prepare scope is cancelled, or on drop.
pub(crate) struct ManagedStatement<M: Backend> {
    pool: Arc<PoolShared<M>>,
    cmd: Arc<Command>,
    prepare_scope: CancellationToken,
    released: CancellationToken,
    trace: TraceHandle,
}

impl<M: Backend> ManagedStatement<M> {
    pub(crate) async fn prepare(
        pool: &Arc<PoolShared<M>>,
        scope: &Scope,
        cmd: &Arc<Command>,
    ) -> Result<Self, RdbError> {
        let cmd = if cmd.prepare {
            Arc::clone(cmd)
        } else {
            Arc::new(Command {
                prepare: true,
                ..Command::clone(cmd)
            })
        };
        let trace = pool.trace_event();
        let prepared = async {
            let mut conn = pool.checkout(scope).await?;
            guarded(scope, &pool.owner(), conn.prepare(&cmd)).await
        }
        .await;
        if let Err(err) = prepared {
            trace.error(&err);
            trace.close();
            return Err(err);
        }
        pool.retain_prepared(&cmd);
        debug!(query = cmd.label(), "statement prepared");

        let statement = Self {
            pool: Arc::clone(pool),
            cmd,
            prepare_scope: scope.token().clone(),
            released: CancellationToken::new(),
            trace,
        };
        statement.watch();
        Ok(statement)
    }

    fn watch(&self) {
        let pool = Arc::clone(&self.pool);
        let cmd = Arc::clone(&self.cmd);
        let prepare_scope = self.prepare_scope.clone();
        let released = self.released.clone();
        let trace = self.trace.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = released.cancelled() => return,
                () = prepare_scope.cancelled() => {}
                () = pool.closed.cancelled() => {}
            }
            released.cancel();
            pool.release_prepared(&cmd);
            trace.close();
        });
    }

    fn release(&self) {
        if self.released.is_cancelled() {
            return;
        }
        self.released.cancel();
        self.pool.release_prepared(&self.cmd);
        self.trace.close();
    }
}

#[async_trait]
impl<M: Backend> Statement for ManagedStatement<M> {
    async fn exec(&self, scope: &Scope, params: &[Param]) -> Next {
        if self.pool.closed.is_cancelled() {
            return Next::failed(RdbError::PoolClosed);
        }
        if self.released.is_cancelled() || self.prepare_scope.is_cancelled() {
            return Next::failed(RdbError::StatementClosed);
        }
        if scope.is_cancelled() {
            return Next::failed(RdbError::Cancelled);
        }
        self.pool
            .run(scope, &self.cmd, params, self.trace.borrowed())
            .await
    }

    fn command(&self) -> &Arc<Command> {
        &self.cmd
    }

    async fn close(&self) -> Result<(), RdbError> {
        self.release();
        Ok(())
    }
}

impl<M: Backend> Drop for ManagedStatement<M> {
    fn drop(&mut self) {
        self.release();
    }
}
