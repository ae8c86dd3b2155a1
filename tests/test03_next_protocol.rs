mod common;

use rdb::memory::{MemoryDatabase, Step, Table};
use rdb::{Command, RdbError, ScanTarget, Scope, Slot, Value};

use common::{all_available, memory_pool};

fn two_sets() -> Vec<Step> {
    vec![
        Step::Result(
            Table::new(&["id", "name"])
                .row(vec![Value::Int(1), "ada".into()])
                .row(vec![Value::Int(2), "grace".into()])
                .row(vec![Value::Int(3), "edsger".into()]),
        ),
        Step::Result(Table::new(&["total"]).row(vec![Value::Int(3)])),
    ]
}

async fn setup(steps: Vec<Step>) -> (MemoryDatabase, Scope, std::sync::Arc<dyn rdb::Pool>) {
    let db = MemoryDatabase::new();
    db.script("q", steps);
    let pool = memory_pool(&db, "").await;
    let scope = Scope::new().bind(pool.clone());
    (db, scope, pool)
}

#[tokio::test]
async fn buffering_every_set_releases_the_connection() {
    let (_db, scope, pool) = setup(two_sets()).await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;
    assert_eq!(pool.status().available, pool.status().capacity - 1);

    let sets = next.buffer_set().await.unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].len(), 3);
    assert_eq!(sets[1].rows[0].get("total"), Some(&Value::Int(3)));

    // Draining the last set released everything without an explicit close.
    assert!(next.is_closed());
    all_available(&pool).await;
    assert!(next.buffer().await.unwrap().is_none());
    next.close().await.unwrap();
    next.close().await.unwrap();
}

#[tokio::test]
async fn streaming_ends_each_set_with_none() {
    let (_db, scope, _pool) = setup(two_sets()).await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;

    let mut ids = Vec::new();
    {
        let mut stream = next.result().await.unwrap().expect("first set");
        assert_eq!(stream.schema().len(), 2);
        while let Some(row) = stream.scan().await.unwrap() {
            ids.push(row.get("id").and_then(Value::as_int).unwrap());
        }
        // The end sentinel repeats.
        assert!(stream.scan().await.unwrap().is_none());
    }
    assert_eq!(ids, vec![1, 2, 3]);

    {
        let mut stream = next.result().await.unwrap().expect("second set");
        let row = stream.scan().await.unwrap().unwrap();
        assert_eq!(row.get("total"), Some(&Value::Int(3)));
        assert!(stream.scan().await.unwrap().is_none());
    }
    assert!(next.result().await.unwrap().is_none());
    next.close().await.unwrap();
}

/// Rejects the first value offered, then records every value.
struct RejectsOnce {
    rejected: bool,
    seen: std::sync::Arc<std::sync::Mutex<Vec<Value>>>,
}

impl ScanTarget for RejectsOnce {
    fn assign(&mut self, value: Value) -> Result<(), RdbError> {
        if !self.rejected {
            self.rejected = true;
            return Err(RdbError::ConversionError(format!("rejected {value:?}")));
        }
        self.seen.lock().unwrap().push(value);
        Ok(())
    }
}

#[tokio::test]
async fn rejected_row_is_offered_again_on_the_next_scan() {
    let (_db, scope, _pool) = setup(two_sets()).await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut stream = next.result().await.unwrap().unwrap();
    stream
        .prep(
            "name",
            RejectsOnce {
                rejected: false,
                seen: seen.clone(),
            },
        )
        .unwrap();

    let err = stream.scan().await.unwrap_err();
    assert!(matches!(err, RdbError::ConversionError(_)));
    let row = stream.scan().await.unwrap().unwrap();
    assert_eq!(row.get("id"), Some(&Value::Int(1)));
    let row = stream.scan().await.unwrap().unwrap();
    assert_eq!(row.get("id"), Some(&Value::Int(2)));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::Text("ada".into()), Value::Text("grace".into())]
    );
    stream.close().await.unwrap();
}

#[tokio::test]
async fn bound_columns_are_written_to_targets() {
    let (_db, scope, _pool) = setup(two_sets()).await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;

    let name = Slot::<String>::new();
    let mut stream = next.result().await.unwrap().unwrap();
    stream.prep("name", name.clone()).unwrap();
    let row = stream.scan().await.unwrap().unwrap();
    assert_eq!(name.get().as_deref(), Some("ada"));
    assert_eq!(row.get("id"), Some(&Value::Int(1)));
    assert_eq!(row.get("name"), None);

    let err = stream.prepx(0, Slot::<i64>::new()).unwrap_err();
    assert!(matches!(err, RdbError::UsageError(_)));
    assert!(matches!(
        stream.prep("missing", Slot::<i64>::new()),
        Err(RdbError::UsageError(_))
    ));

    stream.scan().await.unwrap().unwrap();
    assert_eq!(name.take().as_deref(), Some("grace"));
    stream.close().await.unwrap();
    assert!(next.is_closed());
}

#[tokio::test]
async fn reads_after_explicit_close_fail() {
    let (_db, scope, pool) = setup(two_sets()).await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;
    {
        let mut stream = next.result().await.unwrap().unwrap();
        stream.scan().await.unwrap().unwrap();
    }
    next.close().await.unwrap();
    all_available(&pool).await;

    assert!(matches!(next.result().await, Err(RdbError::Closed)));
    assert!(matches!(next.buffer().await, Err(RdbError::Closed)));
    next.close().await.unwrap();
}

#[tokio::test]
async fn partial_buffer_set_keeps_completed_sets() {
    let failure = RdbError::ExecutionError("division by zero".into());
    let (_db, scope, pool) = setup(vec![
        Step::Result(Table::new(&["a"]).row(vec![Value::Int(1)])),
        Step::Fail(failure),
        Step::Result(Table::new(&["b"])),
    ])
    .await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;

    let partial = next.buffer_set().await.unwrap_err();
    assert_eq!(partial.buffers.len(), 1);
    assert!(matches!(partial.error, RdbError::ExecutionError(_)));

    // The failure is terminal and reported identically from then on.
    assert!(next.is_closed());
    for _ in 0..2 {
        match next.close().await {
            Err(RdbError::ExecutionError(msg)) => assert_eq!(msg, "division by zero"),
            other => panic!("unexpected close outcome {other:?}"),
        }
    }
    assert!(matches!(next.buffer().await, Err(RdbError::ExecutionError(_))));
    all_available(&pool).await;
}

#[tokio::test]
async fn buffer_continues_a_started_stream() {
    let (_db, scope, _pool) = setup(two_sets()).await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;
    {
        let mut stream = next.result().await.unwrap().unwrap();
        stream.scan().await.unwrap().unwrap();
    }
    let rest = next.buffer().await.unwrap().unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest.rows[0].get("name"), Some(&Value::Text("grace".into())));
    let totals = next.buffer().await.unwrap().unwrap();
    assert_eq!(totals.len(), 1);
    assert!(next.buffer().await.unwrap().is_none());
}

#[tokio::test]
async fn statements_without_result_sets_close_immediately() {
    let (_db, scope, pool) = setup(Vec::new()).await;
    let mut next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;
    assert!(next.buffer_set().await.unwrap().is_empty());
    assert!(next.is_closed());
    all_available(&pool).await;
}

#[tokio::test]
async fn text_as_bytes_returns_blobs() {
    let (_db, scope, _pool) = setup(two_sets()).await;
    let cmd = Command::new("q").text_as_bytes(true).shared();
    let sets = rdb::query_all(&scope, &cmd, &[]).await.unwrap();
    assert_eq!(
        sets[0].rows[0].get("name"),
        Some(&Value::Blob(b"ada".to_vec()))
    );
}

#[tokio::test]
async fn dropping_an_open_next_releases_the_connection() {
    let (_db, scope, pool) = setup(two_sets()).await;
    let next = rdb::query(&scope, &Command::new("q").shared(), &[]).await;
    assert_eq!(pool.status().available, pool.status().capacity - 1);
    drop(next);
    all_available(&pool).await;
}
