use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::next::Next;
use crate::pool::{Connection, Queryer};
use crate::scope::Scope;

use super::Backend;
use super::holder::Holder;

/// Dedicated pool connection, returned on [`close`](Connection::close) or when its scope is
/// cancelled, whichever comes first.
pub(crate) struct ManagedConnection<M: Backend> {
    holder: Arc<Holder<M>>,
}

impl<M: Backend> ManagedConnection<M> {
    pub(crate) fn new(holder: Arc<Holder<M>>) -> Self {
        Self { holder }
    }
}

#[async_trait]
impl<M: Backend> Queryer for ManagedConnection<M> {
    async fn query(&self, scope: &Scope, cmd: &Arc<Command>, params: &[Param]) -> Next {
        self.holder.query(scope, cmd, params).await
    }
}

#[async_trait]
impl<M: Backend> Connection for ManagedConnection<M> {
    async fn close(&self) -> Result<(), RdbError> {
        self.holder.abandon(RdbError::ConnectionClosed, false).await;
        match self.holder.stored() {
            None | Some(RdbError::ConnectionClosed) => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl<M: Backend> Drop for ManagedConnection<M> {
    fn drop(&mut self) {
        self.holder.release_on_drop(false);
    }
}
