use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bb8::PooledConnection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{Command, CommandKey, Param};
use crate::error::RdbError;
use crate::next::{Cursor, Next, NextParts, Owner};
use crate::pool::{
    Capabilities, Connection, Pool, PoolStatus, Preparer, Queryer, Statement, Transaction,
};
use crate::scope::Scope;
use crate::trace::{TraceHandle, Tracer};
use crate::types::Isolation;

use super::connection::ManagedConnection;
use super::holder::Holder;
use super::options::PoolOptions;
use super::statement::ManagedStatement;
use super::transaction::ManagedTransaction;
use super::{Backend, Session, bind_params, guarded};

/// [`Pool`] over a `bb8` pool of driver sessions.
pub struct ManagedPool<M: Backend> {
    shared: Arc<PoolShared<M>>,
}

pub(crate) struct PoolShared<M: Backend> {
    driver: String,
    inner: RwLock<Option<bb8::Pool<M>>>,
    capacity: usize,
    capabilities: Capabilities,
    tracer: RwLock<Option<Arc<dyn Tracer>>>,
    prepared: Mutex<PreparedCache>,
    pub(crate) closed: CancellationToken,
}

/// Prepared commands, plus how many live statements rely on each one.
#[derive(Default)]
struct PreparedCache {
    entries: HashSet<CommandKey>,
    holders: HashMap<CommandKey, usize>,
}

impl PreparedCache {
    fn clear(&mut self) {
        self.entries.clear();
        self.holders.clear();
    }
}

impl<M: Backend> ManagedPool<M> {
    /// Build the pool and, when `options.verify` is set, ping one connection.
    ///
    /// # Errors
    /// Returns [`RdbError::Cancelled`] if `scope` is cancelled first, or the connection failure.
    pub async fn open(
        driver: impl Into<String>,
        manager: M,
        options: PoolOptions,
        scope: &Scope,
    ) -> Result<Self, RdbError> {
        scope.check()?;
        let driver = driver.into();
        let capabilities = Capabilities {
            tracing: true,
            ..manager.capabilities()
        };
        let build = bb8::Pool::builder()
            .max_size(options.max_size)
            .connection_timeout(options.connection_timeout)
            .retry_connection(false)
            .build(manager);
        let pool = tokio::select! {
            biased;
            () = scope.cancelled() => return Err(RdbError::Cancelled),
            res = build => res?,
        };
        if options.verify {
            let verify = async {
                let mut conn = pool.get().await?;
                conn.ping().await
            };
            tokio::select! {
                biased;
                () = scope.cancelled() => return Err(RdbError::Cancelled),
                res = verify => res?,
            }
        }
        debug!(driver = %driver, max_size = options.max_size, "pool opened");
        Ok(Self {
            shared: Arc::new(PoolShared {
                driver,
                inner: RwLock::new(Some(pool)),
                capacity: options.max_size as usize,
                capabilities,
                tracer: RwLock::new(None),
                prepared: Mutex::new(PreparedCache::default()),
                closed: CancellationToken::new(),
            }),
        })
    }

    #[must_use]
    pub fn driver(&self) -> &str {
        &self.shared.driver
    }

    /// Number of commands currently in the prepared-statement cache.
    #[must_use]
    pub fn prepared_count(&self) -> usize {
        self.shared.prepared_set().entries.len()
    }
}

impl<M: Backend> PoolShared<M> {
    pub(crate) fn owner(&self) -> Owner {
        Owner {
            token: self.closed.clone(),
            error: RdbError::PoolClosed,
        }
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) fn check_open(&self) -> Result<(), RdbError> {
        if self.closed.is_cancelled() {
            Err(RdbError::PoolClosed)
        } else {
            Ok(())
        }
    }

    fn pool(&self) -> Result<bb8::Pool<M>, RdbError> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().cloned().ok_or(RdbError::PoolClosed)
    }

    pub(crate) fn trace_event(&self) -> TraceHandle {
        let guard = match self.tracer.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        TraceHandle::start(guard.as_ref())
    }

    fn prepared_set(&self) -> std::sync::MutexGuard<'_, PreparedCache> {
        match self.prepared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn forget(&self, cmd: &Arc<Command>) {
        if self.prepared_set().entries.remove(&CommandKey::new(cmd)) {
            debug!(driver = %self.driver, query = cmd.label(), "prepared statement dropped");
        }
    }

    pub(crate) fn remember(&self, cmd: &Arc<Command>) {
        self.prepared_set().entries.insert(CommandKey::new(cmd));
    }

    /// Cache `cmd` on behalf of one more [`Statement`](crate::Statement).
    pub(crate) fn retain_prepared(&self, cmd: &Arc<Command>) {
        let key = CommandKey::new(cmd);
        let mut cache = self.prepared_set();
        cache.entries.insert(key.clone());
        *cache.holders.entry(key).or_insert(0) += 1;
    }

    /// A statement let go of `cmd`; the entry is dropped with the last one.
    pub(crate) fn release_prepared(&self, cmd: &Arc<Command>) {
        let key = CommandKey::new(cmd);
        let last = {
            let mut cache = self.prepared_set();
            let remaining = match cache.holders.get_mut(&key) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                cache.holders.remove(&key);
            }
            remaining == 0
        };
        if last {
            self.forget(cmd);
        }
    }

    /// Check a connection out of the pool, giving up when the scope or pool shuts down.
    pub(crate) async fn checkout(
        &self,
        scope: &Scope,
    ) -> Result<PooledConnection<'static, M>, RdbError> {
        self.check_open()?;
        scope.check()?;
        let pool = self.pool()?;
        let conn = guarded(scope, &self.owner(), async move {
            pool.get_owned().await.map_err(RdbError::from)
        })
        .await?;
        debug!(driver = %self.driver, "connection checked out");
        Ok(conn)
    }

    /// Run one command on `session`. The caller reports begin/end to the trace.
    pub(crate) async fn execute(
        &self,
        session: &mut dyn Session,
        scope: &Scope,
        owner: &Owner,
        cmd: &Arc<Command>,
        params: &[Param],
        trace: &TraceHandle,
    ) -> Result<Box<dyn Cursor>, RdbError> {
        let result = async {
            let bound = bind_params(cmd, params)?;
            let cached = self.prepared_set().entries.contains(&CommandKey::new(cmd));
            if cmd.prepare && !cached {
                guarded(scope, owner, session.prepare(cmd)).await?;
                self.remember(cmd);
                debug!(driver = %self.driver, query = cmd.label(), "statement prepared");
            }
            guarded(scope, owner, session.execute(cmd, &bound)).await
        }
        .await;
        for message in session.take_messages() {
            trace.message(&message);
        }
        if result.is_err() && cmd.prepare {
            self.forget(cmd);
        }
        result
    }

    /// Query on a freshly checked out connection that the returned [`Next`] keeps until release.
    pub(crate) async fn run(
        &self,
        scope: &Scope,
        cmd: &Arc<Command>,
        params: &[Param],
        trace: TraceHandle,
    ) -> Next {
        trace.query_begin(cmd, params);
        let owner = self.owner();
        let result = async {
            let mut conn = self.checkout(scope).await?;
            let cursor = self
                .execute(&mut **conn, scope, &owner, cmd, params, &trace)
                .await?;
            Ok::<_, RdbError>((cursor, conn))
        }
        .await;
        if let Err(err) = &result {
            trace.error(err);
        }
        trace.query_end();
        match result {
            Ok((cursor, conn)) => Next::from_parts(
                scope,
                NextParts {
                    cursor,
                    lease: Some(Box::new(conn)),
                    trace,
                    owner: Some(owner),
                    name: cmd.name.clone(),
                },
            ),
            Err(err) => {
                trace.close();
                Next::failed(err)
            }
        }
    }

    fn status(&self) -> PoolStatus {
        let Ok(pool) = self.pool() else {
            return PoolStatus {
                capacity: self.capacity,
                available: 0,
            };
        };
        let state = pool.state();
        let in_use = state.connections.saturating_sub(state.idle_connections) as usize;
        PoolStatus {
            capacity: self.capacity,
            available: self.capacity.saturating_sub(in_use),
        }
    }
}

#[async_trait]
impl<M: Backend> Queryer for ManagedPool<M> {
    async fn query(&self, scope: &Scope, cmd: &Arc<Command>, params: &[Param]) -> Next {
        let trace = self.shared.trace_event();
        self.shared.run(scope, cmd, params, trace).await
    }
}

#[async_trait]
impl<M: Backend> Preparer for ManagedPool<M> {
    async fn prepare(&self, scope: &Scope, cmd: &Arc<Command>) -> Result<Box<dyn Statement>, RdbError> {
        let statement = ManagedStatement::prepare(&self.shared, scope, cmd).await?;
        Ok(Box::new(statement))
    }
}

#[async_trait]
impl<M: Backend> Pool for ManagedPool<M> {
    async fn begin(&self, scope: &Scope, isolation: Isolation) -> Result<Box<dyn Transaction>, RdbError> {
        let trace = self.shared.trace_event();
        let started = async {
            let mut conn = self.shared.checkout(scope).await?;
            guarded(scope, &self.shared.owner(), conn.begin(isolation)).await?;
            Ok::<_, RdbError>(conn)
        }
        .await;
        match started {
            Ok(conn) => {
                debug!(driver = %self.shared.driver, ?isolation, "transaction started");
                let holder = Holder::new(
                    Arc::clone(&self.shared),
                    conn,
                    trace,
                    RdbError::TransactionDone,
                );
                holder.watch(scope, true);
                Ok(Box::new(ManagedTransaction::new(holder)))
            }
            Err(err) => {
                trace.error(&err);
                trace.close();
                Err(err)
            }
        }
    }

    async fn connection(&self, scope: &Scope) -> Result<Box<dyn Connection>, RdbError> {
        if !self.shared.capabilities.dedicated_connections {
            return Err(RdbError::not_supported("dedicated connections"));
        }
        let trace = self.shared.trace_event();
        match self.shared.checkout(scope).await {
            Ok(conn) => {
                let holder = Holder::new(
                    Arc::clone(&self.shared),
                    conn,
                    trace,
                    RdbError::ConnectionClosed,
                );
                holder.watch(scope, false);
                Ok(Box::new(ManagedConnection::new(holder)))
            }
            Err(err) => {
                trace.error(&err);
                trace.close();
                Err(err)
            }
        }
    }

    async fn ping(&self, scope: &Scope) -> Result<(), RdbError> {
        let mut conn = self.shared.checkout(scope).await?;
        guarded(scope, &self.shared.owner(), conn.ping()).await
    }

    async fn close(&self) -> Result<(), RdbError> {
        if self.shared.closed.is_cancelled() {
            return Ok(());
        }
        self.shared.closed.cancel();
        let pool = match self.shared.inner.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(pool);
        self.shared.prepared_set().clear();
        debug!(driver = %self.shared.driver, "pool closed");
        Ok(())
    }

    fn status(&self) -> PoolStatus {
        self.shared.status()
    }

    fn capabilities(&self) -> Capabilities {
        self.shared.capabilities
    }

    fn set_tracer(&self, tracer: Option<Arc<dyn Tracer>>) -> Result<(), RdbError> {
        let mut guard = match self.shared.tracer.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = tracer;
        Ok(())
    }
}

impl<M: Backend> std::fmt::Debug for ManagedPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("driver", &self.shared.driver)
            .field("status", &self.shared.status())
            .field("closed", &self.shared.closed.is_cancelled())
            .finish()
    }
}
