mod common;

use rdb::memory::{MemoryDatabase, Step, Table};
use rdb::{Command, Param, Preparer, RdbError, Scope, Value};

use common::{all_available, memory_pool};

fn db() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    db.script(
        "select name from users where id = ?",
        vec![Step::Result(Table::new(&["name"]).row(vec!["ada".into()]))],
    );
    db
}

fn lookup() -> std::sync::Arc<Command> {
    Command::new("select name from users where id = ?").shared()
}

#[tokio::test]
async fn prepared_statement_runs_repeatedly() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let scope = Scope::new();

    let stmt = pool.prepare(&scope, &lookup()).await.unwrap();
    assert!(stmt.command().prepare);
    for id in 1..=3 {
        let mut next = stmt.exec(&scope, &[Param::new(id)]).await;
        let buffer = next.buffer().await.unwrap().unwrap();
        assert_eq!(buffer.rows[0].get("name"), Some(&Value::Text("ada".into())));
        next.close().await.unwrap();
    }
    assert_eq!(db.prepare_count(), 1);
    assert_eq!(db.executed().len(), 3);
    assert_eq!(db.executed()[2].params, vec![Value::Int(3)]);
    all_available(&pool).await;
}

#[tokio::test]
async fn cancelled_exec_scope_leaves_statement_usable() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let prepare_scope = Scope::new();
    let stmt = pool.prepare(&prepare_scope, &lookup()).await.unwrap();

    let exec_scope = Scope::new();
    exec_scope.cancel();
    let mut next = stmt.exec(&exec_scope, &[Param::new(1)]).await;
    assert!(matches!(next.close().await, Err(RdbError::Cancelled)));
    assert!(db.executed().is_empty());

    let mut next = stmt.exec(&Scope::new(), &[Param::new(1)]).await;
    assert_eq!(next.buffer_set().await.unwrap().len(), 1);
}

#[tokio::test]
async fn statement_closes_with_its_prepare_scope() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let prepare_scope = Scope::new();
    let stmt = pool.prepare(&prepare_scope, &lookup()).await.unwrap();

    prepare_scope.cancel();
    let mut next = stmt.exec(&Scope::new(), &[Param::new(1)]).await;
    assert!(matches!(next.close().await, Err(RdbError::StatementClosed)));
}

#[tokio::test]
async fn statement_reports_pool_shutdown() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let stmt = pool.prepare(&Scope::new(), &lookup()).await.unwrap();

    pool.close().await.unwrap();
    let mut next = stmt.exec(&Scope::new(), &[Param::new(1)]).await;
    assert!(matches!(next.close().await, Err(RdbError::PoolClosed)));
}

#[tokio::test]
async fn closed_statement_rejects_exec() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let stmt = pool.prepare(&Scope::new(), &lookup()).await.unwrap();

    stmt.close().await.unwrap();
    stmt.close().await.unwrap();
    let mut next = stmt.exec(&Scope::new(), &[Param::new(1)]).await;
    assert!(matches!(next.close().await, Err(RdbError::StatementClosed)));
}

#[tokio::test]
async fn prepare_of_unknown_sql_fails() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let err = pool
        .prepare(&Scope::new(), &Command::new("selec nothing").shared())
        .await
        .err()
        .expect("prepare should fail");
    assert!(err.as_sql_error().is_some());
    all_available(&pool).await;
}

#[tokio::test]
async fn prepared_commands_are_cached_per_command() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let scope = Scope::new().bind(pool.clone());

    let cmd = Command::new("select name from users where id = ?")
        .prepared()
        .shared();
    for _ in 0..3 {
        rdb::query_all(&scope, &cmd, &[Param::new(1)]).await.unwrap();
    }
    assert_eq!(db.prepare_count(), 1);

    // A distinct command with the same text gets its own entry.
    let other = Command::new("select name from users where id = ?")
        .prepared()
        .shared();
    rdb::query_all(&scope, &other, &[Param::new(1)]).await.unwrap();
    assert_eq!(db.prepare_count(), 2);
}

#[tokio::test]
async fn failed_execution_drops_the_cache_entry() {
    let db = MemoryDatabase::new();
    db.script("flaky", vec![Step::Fail(RdbError::ExecutionError("deadlock".into()))]);
    let pool = memory_pool(&db, "").await;
    let scope = Scope::new().bind(pool.clone());

    let cmd = Command::new("flaky").prepared().shared();
    assert!(rdb::query_all(&scope, &cmd, &[]).await.is_err());
    assert!(rdb::query_all(&scope, &cmd, &[]).await.is_err());
    assert_eq!(db.prepare_count(), 2);
}

#[tokio::test]
async fn declared_lengths_are_enforced_before_the_driver() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let scope = Scope::new().bind(pool.clone());

    let strict = lookup();
    let err = rdb::query_all(&scope, &strict, &[Param::new("abcdef").length(3)])
        .await
        .unwrap_err();
    assert!(matches!(err.error, RdbError::ParameterError(_)));
    assert!(db.executed().is_empty());

    let lenient = Command::new("select name from users where id = ?")
        .truncate_long_text(true)
        .shared();
    rdb::query_all(&scope, &lenient, &[Param::new("abcdef").length(3)])
        .await
        .unwrap();
    assert_eq!(db.executed()[0].params, vec![Value::Text("abc".into())]);
}

#[tokio::test]
async fn output_params_are_not_supported_by_memory() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let scope = Scope::new().bind(pool);
    let err = rdb::query_all(&scope, &lookup(), &[Param::new(Value::Null).output()])
        .await
        .unwrap_err();
    assert!(err.error.is_not_supported());
}

#[tokio::test]
async fn statements_for_one_command_share_the_cache_entry() {
    let db = db();
    let pool = memory_pool(&db, "").await;
    let scope = Scope::new().bind(pool.clone());

    let cmd = Command::new("select name from users where id = ?")
        .prepared()
        .shared();
    let first = pool.prepare(&scope, &cmd).await.unwrap();
    let second = pool.prepare(&scope, &cmd).await.unwrap();
    assert_eq!(db.prepare_count(), 2);

    first.close().await.unwrap();
    let mut next = second.exec(&scope, &[Param::new(1)]).await;
    next.buffer_set().await.unwrap();
    assert_eq!(db.prepare_count(), 2);

    // With the last statement gone the entry is dropped and the next run prepares again.
    second.close().await.unwrap();
    rdb::query_all(&scope, &cmd, &[Param::new(1)]).await.unwrap();
    assert_eq!(db.prepare_count(), 3);
}
