//! Observer protocol for query lifecycles.
//!
//! A pool with a tracer asks it for one [`TraceEvent`] per `query`, `begin`, `prepare` and
//! `connection`. Events opened by `begin`, `prepare` and `connection` see one
//! `query_begin`/`query_end` pair per query run through the handle. Messages and a failed
//! execute arrive between the two, so an execute error always precedes its `query_end`. `close`
//! is delivered exactly once per event, whichever way the handle ends.

mod log;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::command::{Command, Param, redact};
use crate::error::RdbError;

pub use log::TracingTracer;

/// Source of trace events.
pub trait Tracer: Send + Sync {
    /// Start a new event. Returning `None` skips tracing for this operation.
    fn event(&self) -> Option<Box<dyn TraceEvent>>;
}

/// Callbacks for one traced operation.
///
/// Params flagged `no_trace` arrive with their value replaced by `Null`.
pub trait TraceEvent: Send {
    fn query_begin(&mut self, at: DateTime<Utc>, cmd: &Command, params: &[Param]);
    fn query_end(&mut self, at: DateTime<Utc>);
    fn message(&mut self, at: DateTime<Utc>, text: &str);
    fn error(&mut self, at: DateTime<Utc>, err: &RdbError);
    fn close(&mut self, at: DateTime<Utc>);
}

struct Span {
    event: Mutex<Box<dyn TraceEvent>>,
    closed: AtomicBool,
}

impl Span {
    fn with<F: FnOnce(&mut dyn TraceEvent)>(&self, f: F) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = match self.event.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(guard.as_mut());
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut guard = match self.event.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.close(Utc::now());
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shared handle on one trace event.
///
/// The owning handle closes the event; borrowed handles (one per query run under a
/// transaction, connection or statement) only report begin/end pairs and errors.
#[derive(Clone, Default)]
pub(crate) struct TraceHandle {
    span: Option<Arc<Span>>,
    owned: bool,
}

impl TraceHandle {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn start(tracer: Option<&Arc<dyn Tracer>>) -> Self {
        let span = tracer.and_then(|t| t.event()).map(|event| {
            Arc::new(Span {
                event: Mutex::new(event),
                closed: AtomicBool::new(false),
            })
        });
        Self { span, owned: true }
    }

    pub(crate) fn borrowed(&self) -> Self {
        Self {
            span: self.span.clone(),
            owned: false,
        }
    }

    pub(crate) fn query_begin(&self, cmd: &Command, params: &[Param]) {
        if let Some(span) = &self.span {
            let params = redact(params);
            span.with(|event| event.query_begin(Utc::now(), cmd, &params));
        }
    }

    pub(crate) fn query_end(&self) {
        if let Some(span) = &self.span {
            span.with(|event| event.query_end(Utc::now()));
        }
    }

    pub(crate) fn message(&self, text: &str) {
        if let Some(span) = &self.span {
            span.with(|event| event.message(Utc::now(), text));
        }
    }

    pub(crate) fn error(&self, err: &RdbError) {
        if let Some(span) = &self.span {
            span.with(|event| event.error(Utc::now(), err));
        }
    }

    /// Close the event if this handle owns it. Later calls are no-ops.
    pub(crate) fn close(&self) {
        if self.owned
            && let Some(span) = &self.span
        {
            span.close();
        }
    }
}

impl std::fmt::Debug for TraceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceHandle")
            .field("active", &self.span.is_some())
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[derive(Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    struct Event(Arc<Mutex<Vec<String>>>);

    impl Tracer for Log {
        fn event(&self) -> Option<Box<dyn TraceEvent>> {
            Some(Box::new(Event(Arc::clone(&self.0))))
        }
    }

    impl TraceEvent for Event {
        fn query_begin(&mut self, _at: DateTime<Utc>, cmd: &Command, params: &[Param]) {
            let values: Vec<_> = params.iter().map(|p| format!("{:?}", p.value)).collect();
            self.0
                .lock()
                .unwrap()
                .push(format!("begin {} {}", cmd.sql, values.join(",")));
        }
        fn query_end(&mut self, _at: DateTime<Utc>) {
            self.0.lock().unwrap().push("end".into());
        }
        fn message(&mut self, _at: DateTime<Utc>, text: &str) {
            self.0.lock().unwrap().push(format!("msg {text}"));
        }
        fn error(&mut self, _at: DateTime<Utc>, err: &RdbError) {
            self.0.lock().unwrap().push(format!("err {err}"));
        }
        fn close(&mut self, _at: DateTime<Utc>) {
            self.0.lock().unwrap().push("close".into());
        }
    }

    #[test]
    fn borrowed_handles_do_not_close() {
        let log = Log::default();
        let tracer: Arc<dyn Tracer> = Arc::new(Log(Arc::clone(&log.0)));
        let owner = TraceHandle::start(Some(&tracer));
        let borrowed = owner.borrowed();
        borrowed.query_begin(&Command::new("q"), &[Param::new(1)]);
        borrowed.query_end();
        borrowed.close();
        owner.close();
        owner.close();
        drop(owner);
        drop(borrowed);
        assert_eq!(*log.0.lock().unwrap(), vec!["begin q Int(1)", "end", "close"]);
    }

    #[test]
    fn dropping_the_last_handle_closes() {
        let log = Log::default();
        let tracer: Arc<dyn Tracer> = Arc::new(Log(Arc::clone(&log.0)));
        let handle = TraceHandle::start(Some(&tracer));
        handle.message("hello");
        drop(handle);
        assert_eq!(*log.0.lock().unwrap(), vec!["msg hello", "close"]);
    }

    #[test]
    fn no_trace_values_are_redacted() {
        let log = Log::default();
        let tracer: Arc<dyn Tracer> = Arc::new(Log(Arc::clone(&log.0)));
        let handle = TraceHandle::start(Some(&tracer));
        handle.query_begin(
            &Command::new("login"),
            &[Param::new("bob"), Param::new("secret").no_trace()],
        );
        let first = log.0.lock().unwrap()[0].clone();
        assert_eq!(first, format!("begin login {:?},{:?}", Value::Text("bob".into()), Value::Null));
    }
}
