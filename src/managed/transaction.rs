use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::next::Next;
use crate::pool::{Queryer, Transaction};
use crate::scope::Scope;

use super::holder::Holder;
use super::{Backend, guarded};

/// Transaction on a reserved pool connection.
///
/// Cancelling the scope the transaction began under rolls it back and returns the connection;
/// a failed rollback is logged and traced, the connection is returned regardless.
pub(crate) struct ManagedTransaction<M: Backend> {
    holder: Arc<Holder<M>>,
}

impl<M: Backend> ManagedTransaction<M> {
    pub(crate) fn new(holder: Arc<Holder<M>>) -> Self {
        Self { holder }
    }

    async fn finish(&self, scope: &Scope, commit: bool) -> Result<(), RdbError> {
        let holder = &self.holder;
        if let Some(err) = holder.stored() {
            return Err(err);
        }
        let conn = holder.conn.lock().await.take();
        let Some(mut conn) = conn else {
            return Err(holder.stored().unwrap_or(RdbError::TransactionDone));
        };
        if !holder.mark(RdbError::TransactionDone) {
            // Cancellation won the race; finish its rollback here since the connection is ours.
            let err = holder.stored().unwrap_or(RdbError::TransactionDone);
            if let Err(rollback_err) = conn.rollback().await {
                warn!(error = %rollback_err, "rollback failed while releasing transaction");
                holder.trace.error(&rollback_err);
            }
            holder.trace.close();
            return Err(err);
        }
        let owner = holder.pool.owner();
        let outcome = if commit {
            match guarded(scope, &owner, conn.commit()).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(error = %err, "commit failed, rolling back");
                    match conn.rollback().await {
                        Ok(()) => Err(err),
                        Err(rollback_err) => Err(err.join(rollback_err)),
                    }
                }
            }
        } else {
            guarded(scope, &owner, conn.rollback()).await
        };
        if let Err(err) = &outcome {
            holder.trace.error(err);
        }
        drop(conn);
        holder.trace.close();
        debug!(commit, ok = outcome.is_ok(), "transaction finished");
        outcome
    }
}

#[async_trait]
impl<M: Backend> Queryer for ManagedTransaction<M> {
    async fn query(&self, scope: &Scope, cmd: &Arc<Command>, params: &[Param]) -> Next {
        self.holder.query(scope, cmd, params).await
    }
}

#[async_trait]
impl<M: Backend> Transaction for ManagedTransaction<M> {
    async fn commit(&self, scope: &Scope) -> Result<(), RdbError> {
        self.finish(scope, true).await
    }

    async fn rollback(&self, scope: &Scope) -> Result<(), RdbError> {
        self.finish(scope, false).await
    }

    async fn save_point(&self, scope: &Scope, name: &str) -> Result<(), RdbError> {
        if !self.holder.pool.capabilities().savepoints {
            return Err(RdbError::not_supported("savepoints"));
        }
        if let Some(err) = self.holder.stored() {
            return Err(err);
        }
        let mut guard = self.holder.conn.lock().await;
        let conn = guard.as_mut().ok_or(RdbError::TransactionDone)?;
        guarded(scope, &self.holder.pool.owner(), conn.save_point(name)).await?;
        self.holder.arm_savepoint(name);
        Ok(())
    }

    async fn rollback_to(&self, scope: &Scope, name: &str) -> Result<(), RdbError> {
        if !self.holder.pool.capabilities().savepoints {
            return Err(RdbError::not_supported("savepoints"));
        }
        if let Some(err) = self.holder.stored() {
            return Err(err);
        }
        self.holder.check_savepoint(name)?;
        let mut guard = self.holder.conn.lock().await;
        let conn = guard.as_mut().ok_or(RdbError::TransactionDone)?;
        guarded(scope, &self.holder.pool.owner(), conn.rollback_to(name)).await?;
        self.holder.consume_savepoint(name);
        Ok(())
    }
}

impl<M: Backend> Drop for ManagedTransaction<M> {
    fn drop(&mut self) {
        self.holder.release_on_drop(true);
    }
}
