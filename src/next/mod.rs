//! The per-query handle that gates access to results and owns the connection release.
//!
//! A [`Next`] starts `Open`, moves to streaming through [`Next::result`] or to buffering through
//! [`Next::buffer`] / [`Next::buffer_set`], and ends `Closed`. Closing happens once: on explicit
//! [`Next::close`], after the last result set was read, on a driver failure, when the scope is
//! cancelled, when the owning pool or transaction shuts down, or when the value is dropped.
//! Whichever comes first releases the cursor, the connection lease and the trace event; every
//! later call sees the stored outcome.

mod cursor;
mod stream;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RdbError;
use crate::results::{Buffer, BufferSet, PartialBufferSet, Row, Schema};
use crate::scope::Scope;
use crate::trace::TraceHandle;
use crate::types::Value;

pub use cursor::{Cursor, MaterializedCursor};
pub use stream::ResultStream;

/// Anything that must stay alive until the cursor is released, usually a pooled connection.
pub(crate) type Lease = Box<dyn Any + Send>;

/// Shutdown signal of the handle that produced a `Next`, with the error its results report.
#[derive(Clone)]
pub(crate) struct Owner {
    pub(crate) token: CancellationToken,
    pub(crate) error: RdbError,
}

#[derive(Debug, Clone)]
enum Terminal {
    /// Every result set was read.
    Exhausted,
    /// Closed by the caller or dropped.
    Explicit,
    Failed(RdbError),
}

impl Terminal {
    fn close_outcome(&self) -> Result<(), RdbError> {
        match self {
            Terminal::Exhausted | Terminal::Explicit => Ok(()),
            Terminal::Failed(err) => Err(err.clone()),
        }
    }

    fn read_outcome<T>(&self) -> Result<Option<T>, RdbError> {
        match self {
            Terminal::Exhausted => Ok(None),
            Terminal::Explicit => Err(RdbError::Closed),
            Terminal::Failed(err) => Err(err.clone()),
        }
    }
}

enum Position {
    /// Before the first result set.
    Start,
    /// On a set, no row read yet.
    Ready(Arc<Schema>),
    /// On a set, some rows read.
    Reading(Arc<Schema>),
}

struct NextState {
    cursor: Option<Box<dyn Cursor>>,
    lease: Option<Lease>,
    trace: TraceHandle,
    position: Position,
    /// Incremented each time the cursor moves to a new result set.
    set: usize,
    terminal: Option<Terminal>,
}

struct NextShared {
    state: Mutex<NextState>,
    scope: CancellationToken,
    owner: Option<Owner>,
    released: CancellationToken,
    name: String,
}

/// Handle on the results of one query.
///
/// Use exactly one of [`result`](Next::result), [`buffer`](Next::buffer) or
/// [`buffer_set`](Next::buffer_set) per value; results are single pass.
pub struct Next {
    shared: Arc<NextShared>,
}

/// Everything a pool hands to a new [`Next`].
pub(crate) struct NextParts {
    pub(crate) cursor: Box<dyn Cursor>,
    pub(crate) lease: Option<Lease>,
    pub(crate) trace: TraceHandle,
    pub(crate) owner: Option<Owner>,
    pub(crate) name: String,
}

impl Next {
    /// Wrap a driver cursor. The cursor is released when `scope` is cancelled.
    #[must_use]
    pub fn new(scope: &Scope, cursor: Box<dyn Cursor>) -> Self {
        Self::from_parts(
            scope,
            NextParts {
                cursor,
                lease: None,
                trace: TraceHandle::none(),
                owner: None,
                name: String::new(),
            },
        )
    }

    pub(crate) fn from_parts(scope: &Scope, parts: NextParts) -> Self {
        let shared = Arc::new(NextShared {
            state: Mutex::new(NextState {
                cursor: Some(parts.cursor),
                lease: parts.lease,
                trace: parts.trace,
                position: Position::Start,
                set: 0,
                terminal: None,
            }),
            scope: scope.token().clone(),
            owner: parts.owner,
            released: CancellationToken::new(),
            name: parts.name,
        });
        spawn_watcher(&shared);
        Self { shared }
    }

    /// A `Next` that is already closed with `err`. No I/O ever happens through it.
    #[must_use]
    pub fn failed(err: RdbError) -> Self {
        let released = CancellationToken::new();
        released.cancel();
        Self {
            shared: Arc::new(NextShared {
                state: Mutex::new(NextState {
                    cursor: None,
                    lease: None,
                    trace: TraceHandle::none(),
                    position: Position::Start,
                    set: 0,
                    terminal: Some(Terminal::Failed(err)),
                }),
                scope: CancellationToken::new(),
                owner: None,
                released,
                name: String::new(),
            }),
        }
    }

    /// Whether the cursor and connection were already released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.released.is_cancelled()
    }

    /// Stream the current result set row by row. `Ok(None)` when no result set is left.
    ///
    /// # Errors
    /// Returns the stored terminal error once the value is closed, [`RdbError::Cancelled`] when
    /// the scope was cancelled, or the driver failure.
    pub async fn result(&mut self) -> Result<Option<ResultStream<'_>>, RdbError> {
        let (schema, set, fresh) = {
            let mut st = self.shared.state.lock().await;
            if let Some(terminal) = &st.terminal {
                return terminal.read_outcome();
            }
            self.shared.check_tokens(&mut st).await?;
            if matches!(st.position, Position::Start) && !self.shared.advance(&mut st).await? {
                return Ok(None);
            }
            match &st.position {
                Position::Ready(schema) => (Arc::clone(schema), st.set, true),
                Position::Reading(schema) => (Arc::clone(schema), st.set, false),
                Position::Start => return Ok(None),
            }
        };
        Ok(Some(ResultStream::new(self, schema, set, fresh)))
    }

    /// Read the rest of the current result set into memory. `Ok(None)` when no result set is
    /// left.
    ///
    /// # Errors
    /// Same as [`result`](Next::result).
    pub async fn buffer(&mut self) -> Result<Option<Buffer>, RdbError> {
        let mut st = self.shared.state.lock().await;
        if let Some(terminal) = &st.terminal {
            return terminal.read_outcome();
        }
        self.shared.check_tokens(&mut st).await?;
        if matches!(st.position, Position::Start) && !self.shared.advance(&mut st).await? {
            return Ok(None);
        }
        let schema = match &st.position {
            Position::Ready(schema) | Position::Reading(schema) => Arc::clone(schema),
            Position::Start => return Ok(None),
        };
        let mut buffer = Buffer::new(self.shared.name.clone(), Arc::clone(&schema));
        while let Some(values) = self.shared.fetch(&mut st).await? {
            buffer.rows.push(Row::new(Arc::clone(&schema), values));
        }
        Ok(Some(buffer))
    }

    /// Read every remaining result set.
    ///
    /// # Errors
    /// On failure the sets completed so far travel with the error in [`PartialBufferSet`].
    pub async fn buffer_set(&mut self) -> Result<BufferSet, PartialBufferSet> {
        let mut buffers = BufferSet::new();
        loop {
            match self.buffer().await {
                Ok(Some(buffer)) => buffers.push(buffer),
                Ok(None) => return Ok(buffers),
                Err(err) => return Err(PartialBufferSet::new(buffers, err)),
            }
        }
    }

    /// Release the cursor and connection. Safe to call repeatedly; every call returns the same
    /// outcome.
    ///
    /// # Errors
    /// Returns the failure that closed the value, if one did.
    pub async fn close(&mut self) -> Result<(), RdbError> {
        let mut st = self.shared.state.lock().await;
        self.shared.finish(&mut st, Terminal::Explicit).await.close_outcome()
    }
}

impl NextShared {
    /// Run one cursor operation, abandoning it if the scope or the owner shuts down.
    async fn guarded<T>(
        &self,
        op: impl Future<Output = Result<T, RdbError>>,
    ) -> Result<T, RdbError> {
        tokio::select! {
            biased;
            () = self.scope.cancelled() => Err(RdbError::Cancelled),
            err = owner_closed(self.owner.as_ref()) => Err(err),
            res = op => res,
        }
    }

    /// Close with the cancellation reason if the scope or owner already shut down.
    async fn check_tokens(&self, st: &mut NextState) -> Result<(), RdbError> {
        let reason = if self.scope.is_cancelled() {
            Some(RdbError::Cancelled)
        } else {
            self.owner
                .as_ref()
                .filter(|owner| owner.token.is_cancelled())
                .map(|owner| owner.error.clone())
        };
        match reason {
            Some(err) => Err(self.fail(st, err).await),
            None => Ok(()),
        }
    }

    /// Move to the next result set. Returns `false` and releases everything when there is none.
    async fn advance(&self, st: &mut NextState) -> Result<bool, RdbError> {
        let Some(cursor) = st.cursor.as_mut() else {
            return Err(RdbError::Closed);
        };
        let outcome = self.guarded(cursor.next_result()).await;
        match outcome {
            Ok(Some(schema)) => {
                st.set += 1;
                st.position = Position::Ready(schema);
                Ok(true)
            }
            Ok(None) => {
                self.finish(st, Terminal::Exhausted).await;
                Ok(false)
            }
            Err(err) => Err(self.fail(st, err).await),
        }
    }

    /// Read one row of the current set. At the end of the set, looks ahead so the connection is
    /// released as soon as the last set is drained.
    async fn fetch(&self, st: &mut NextState) -> Result<Option<Vec<Value>>, RdbError> {
        let Some(cursor) = st.cursor.as_mut() else {
            return Err(RdbError::Closed);
        };
        let outcome = self.guarded(cursor.fetch()).await;
        match outcome {
            Ok(Some(values)) => {
                if let Position::Ready(schema) = &st.position {
                    st.position = Position::Reading(Arc::clone(schema));
                }
                Ok(Some(values))
            }
            Ok(None) => {
                // A failure while looking ahead is stored and reported by the next read.
                let _ = self.advance(st).await;
                Ok(None)
            }
            Err(err) => Err(self.fail(st, err).await),
        }
    }

    async fn fail(&self, st: &mut NextState, err: RdbError) -> RdbError {
        st.trace.error(&err);
        match self.finish(st, Terminal::Failed(err.clone())).await {
            Terminal::Failed(stored) => stored,
            _ => err,
        }
    }

    /// Release everything exactly once and remember how the value ended.
    async fn finish(&self, st: &mut NextState, terminal: Terminal) -> Terminal {
        if let Some(stored) = &st.terminal {
            return stored.clone();
        }
        let mut terminal = terminal;
        if let Some(mut cursor) = st.cursor.take()
            && let Err(err) = cursor.close().await
            && !matches!(terminal, Terminal::Failed(_))
        {
            st.trace.error(&err);
            terminal = Terminal::Failed(err);
        }
        release(st, terminal.clone());
        self.released.cancel();
        debug!(name = %self.name, outcome = ?terminal, "query results released");
        terminal
    }
}

fn release(st: &mut NextState, terminal: Terminal) {
    st.cursor = None;
    st.lease = None;
    st.trace.close();
    st.terminal = Some(terminal);
}

async fn owner_closed(owner: Option<&Owner>) -> RdbError {
    match owner {
        Some(owner) => {
            owner.token.cancelled().await;
            owner.error.clone()
        }
        None => std::future::pending().await,
    }
}

/// One task per open `Next`: releases on scope cancellation or owner shutdown, and exits as soon
/// as the value is released any other way.
fn spawn_watcher(shared: &Arc<NextShared>) {
    let Ok(handle) = Handle::try_current() else {
        return;
    };
    let shared = Arc::clone(shared);
    handle.spawn(async move {
        let reason = tokio::select! {
            biased;
            () = shared.released.cancelled() => return,
            () = shared.scope.cancelled() => RdbError::Cancelled,
            err = owner_closed(shared.owner.as_ref()) => err,
        };
        let mut st = shared.state.lock().await;
        if st.terminal.is_none() {
            st.trace.error(&reason);
        }
        shared.finish(&mut st, Terminal::Failed(reason)).await;
    });
}

impl Drop for Next {
    fn drop(&mut self) {
        if self.shared.released.is_cancelled() {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            handle.spawn(async move {
                let mut st = shared.state.lock().await;
                shared.finish(&mut st, Terminal::Explicit).await;
            });
        } else if let Ok(mut st) = self.shared.state.try_lock()
            && st.terminal.is_none()
        {
            // No runtime left to close the cursor on; drop it in place.
            release(&mut st, Terminal::Explicit);
            self.shared.released.cancel();
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("name", &self.shared.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
