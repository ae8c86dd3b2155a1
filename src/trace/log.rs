use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::command::{Command, Param};
use crate::error::RdbError;

use super::{TraceEvent, Tracer};

/// Tracer that forwards every event to the `tracing` crate under the `rdb::trace` target.
///
/// Each event gets a sequence number so interleaved queries can be told apart in the log.
#[derive(Debug, Default)]
pub struct TracingTracer {
    next_id: AtomicU64,
}

impl TracingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for TracingTracer {
    fn event(&self) -> Option<Box<dyn TraceEvent>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Some(Box::new(LogEvent {
            id,
            label: String::new(),
            started: None,
            opened: Utc::now(),
        }))
    }
}

struct LogEvent {
    id: u64,
    label: String,
    started: Option<DateTime<Utc>>,
    opened: DateTime<Utc>,
}

impl TraceEvent for LogEvent {
    fn query_begin(&mut self, at: DateTime<Utc>, cmd: &Command, params: &[Param]) {
        self.label = cmd.label().to_owned();
        self.started = Some(at);
        debug!(
            target: "rdb::trace",
            event = self.id,
            query = %self.label,
            params = ?params.iter().map(|p| &p.value).collect::<Vec<_>>(),
            "query begin"
        );
    }

    fn query_end(&mut self, at: DateTime<Utc>) {
        let elapsed_ms = self
            .started
            .take()
            .map(|started| (at - started).num_milliseconds());
        debug!(target: "rdb::trace", event = self.id, query = %self.label, ?elapsed_ms, "query end");
    }

    fn message(&mut self, _at: DateTime<Utc>, text: &str) {
        debug!(target: "rdb::trace", event = self.id, message = text, "server message");
    }

    fn error(&mut self, _at: DateTime<Utc>, err: &RdbError) {
        warn!(target: "rdb::trace", event = self.id, query = %self.label, error = %err, "query failed");
    }

    fn close(&mut self, at: DateTime<Utc>) {
        debug!(
            target: "rdb::trace",
            event = self.id,
            lifetime_ms = (at - self.opened).num_milliseconds(),
            "event closed"
        );
    }
}
