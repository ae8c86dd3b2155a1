use serde::Serialize;

/// Point-in-time gauge of a pool. Advisory only: it can be stale by the time it is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Maximum number of connections.
    pub capacity: usize,
    /// Connections that could be handed out right now without waiting.
    pub available: usize,
}

/// Optional features a pool supports. Probing avoids a round trip that would fail with
/// [`RdbError::NotSupported`](crate::RdbError::NotSupported).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Named savepoints inside transactions.
    pub savepoints: bool,
    /// [`Pool::connection`](crate::Pool::connection) hands out dedicated connections.
    pub dedicated_connections: bool,
    /// [`Pool::set_tracer`](crate::Pool::set_tracer) is accepted.
    pub tracing: bool,
}
