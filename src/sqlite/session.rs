use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::InterruptHandle;
use tokio::sync::Mutex;

use crate::command::{Command, Param};
use crate::error::RdbError;
use crate::managed::Session;
use crate::next::Cursor;
use crate::types::Isolation;

use super::config::SharedSqliteConnection;
use super::{params, query};

/// One pooled `SQLite` connection.
pub(crate) struct SqliteSession {
    conn: SharedSqliteConnection,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteSession {
    pub(crate) fn new(conn: rusqlite::Connection) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        }
    }

    /// Run `func` on the blocking pool. Dropping the future interrupts the running statement.
    async fn run<F, R>(&self, func: F) -> Result<R, RdbError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, RdbError> + Send + 'static,
        R: Send + 'static,
    {
        let mut interrupt = InterruptOnDrop {
            handle: Arc::clone(&self.interrupt),
            armed: true,
        };
        let result = run_blocking(Arc::clone(&self.conn), func).await;
        interrupt.armed = false;
        result
    }

    async fn batch(&self, sql: String) -> Result<(), RdbError> {
        self.run(move |conn| conn.execute_batch(&sql).map_err(RdbError::from))
            .await
    }
}

struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    armed: bool,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.interrupt();
        }
    }
}

pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, RdbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, RdbError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| RdbError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl Session for SqliteSession {
    async fn execute(&mut self, cmd: &Command, params: &[Param]) -> Result<Box<dyn Cursor>, RdbError> {
        let sql = cmd.sql.clone();
        let cached = cmd.prepare;
        let text_as_bytes = cmd.text_as_bytes;
        let params = params.to_vec();
        let cursor = self
            .run(move |conn| {
                if cached {
                    let mut stmt = conn.prepare_cached(&sql)?;
                    params::bind(&mut stmt, &params)?;
                    query::collect(&mut stmt, text_as_bytes)
                } else {
                    let mut stmt = conn.prepare(&sql)?;
                    params::bind(&mut stmt, &params)?;
                    query::collect(&mut stmt, text_as_bytes)
                }
            })
            .await?;
        Ok(Box::new(cursor))
    }

    async fn prepare(&mut self, cmd: &Command) -> Result<(), RdbError> {
        let sql = cmd.sql.clone();
        self.run(move |conn| {
            conn.prepare_cached(&sql)?;
            Ok(())
        })
        .await
    }

    async fn begin(&mut self, isolation: Isolation) -> Result<(), RdbError> {
        match isolation {
            Isolation::WriteCommitted | Isolation::Snapshot | Isolation::Linearizable => Err(
                RdbError::not_supported(format!("isolation level {isolation:?}")),
            ),
            _ => self.batch("BEGIN DEFERRED".to_owned()).await,
        }
    }

    async fn commit(&mut self) -> Result<(), RdbError> {
        self.batch("COMMIT".to_owned()).await
    }

    async fn rollback(&mut self) -> Result<(), RdbError> {
        self.batch("ROLLBACK".to_owned()).await
    }

    async fn save_point(&mut self, name: &str) -> Result<(), RdbError> {
        self.batch(format!("SAVEPOINT {}", quote_ident(name))).await
    }

    async fn rollback_to(&mut self, name: &str) -> Result<(), RdbError> {
        self.batch(format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn ping(&mut self) -> Result<(), RdbError> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("sp1"), "\"sp1\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[tokio::test]
    async fn unsupported_isolation_is_rejected() {
        let mut session = SqliteSession::new(rusqlite::Connection::open_in_memory().unwrap());
        let err = session.begin(Isolation::Snapshot).await.unwrap_err();
        assert!(err.is_not_supported());
        session.begin(Isolation::Serializable).await.unwrap();
        session.rollback().await.unwrap();
    }
}
