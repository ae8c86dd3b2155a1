#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rdb::memory::{MemoryDatabase, MemoryOpener};
use rdb::{Command, Param, Pool, RdbError, Registry, Scope, TraceEvent, Tracer};

/// Open a memory pool serving `db`, with extra `k=v` options.
pub async fn memory_pool(db: &MemoryDatabase, options: &str) -> Arc<dyn Pool> {
    let registry = Registry::new();
    registry.register(Arc::new(
        MemoryOpener::new().with_database("test", db.clone()),
    ));
    let config = if options.is_empty() {
        "memory://test".to_string()
    } else {
        format!("memory://test?{options}")
    };
    registry
        .open(&Scope::new(), &config.parse().unwrap())
        .await
        .unwrap()
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn all_available(pool: &Arc<dyn Pool>) {
    let pool = Arc::clone(pool);
    eventually("connections to return", move || {
        let status = pool.status();
        status.available == status.capacity
    })
    .await;
}

/// Tracer that writes every callback to a shared log.
#[derive(Clone, Default)]
pub struct RecordingTracer {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl RecordingTracer {
    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

impl Tracer for RecordingTracer {
    fn event(&self) -> Option<Box<dyn TraceEvent>> {
        Some(Box::new(RecordingEvent {
            log: Arc::clone(&self.log),
        }))
    }
}

struct RecordingEvent {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingEvent {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl TraceEvent for RecordingEvent {
    fn query_begin(&mut self, _at: DateTime<Utc>, cmd: &Command, params: &[Param]) {
        let values: Vec<String> = params.iter().map(|p| format!("{:?}", p.value)).collect();
        self.push(format!("begin {} [{}]", cmd.sql, values.join(", ")));
    }

    fn query_end(&mut self, _at: DateTime<Utc>) {
        self.push("end".into());
    }

    fn message(&mut self, _at: DateTime<Utc>, text: &str) {
        self.push(format!("message {text}"));
    }

    fn error(&mut self, _at: DateTime<Utc>, err: &RdbError) {
        self.push(format!("error {err}"));
    }

    fn close(&mut self, _at: DateTime<Utc>) {
        self.push("close".into());
    }
}
