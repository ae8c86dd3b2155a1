#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use rdb::sqlite::{SqliteMode, SqliteOptions};
use rdb::{Command, Isolation, Param, Pool, Preparer, Queryer, RdbError, Registry, Scope, Value};

use common::all_available;

async fn open_file_pool(dir: &tempfile::TempDir) -> Result<Arc<dyn Pool>, RdbError> {
    let path = dir.path().join("app.sqlite3");
    let registry = Registry::new();
    registry.register(Arc::new(rdb::sqlite::SqliteOpener::new()));
    let config = format!("sqlite://{}?max_connections=2", path.display());
    registry.open(&Scope::new(), &config.parse()?).await
}

async fn exec(scope: &Scope, sql: &str, params: &[Param]) -> Result<(), RdbError> {
    rdb::query_all(scope, &Command::new(sql).shared(), params).await?;
    Ok(())
}

#[tokio::test]
async fn sqlite_round_trips_rows() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let pool = open_file_pool(&dir).await?;
    let scope = Scope::new().bind(pool.clone());

    exec(
        &scope,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB)",
        &[],
    )
    .await?;
    exec(
        &scope,
        "INSERT INTO users (id, name, score, avatar) VALUES (?1, ?2, ?3, ?4)",
        &[
            Param::new(1),
            Param::new("ada"),
            Param::new(9.5),
            Param::new(vec![1_u8, 2, 3]),
        ],
    )
    .await?;
    exec(
        &scope,
        "INSERT INTO users (id, name) VALUES (:id, :name)",
        &[Param::named("name", "grace"), Param::named("id", 2)],
    )
    .await?;

    let sets = rdb::query_all(
        &scope,
        &Command::new("SELECT id, name, score, avatar FROM users ORDER BY id").shared(),
        &[],
    )
    .await?;
    assert_eq!(sets.len(), 1);
    let rows = &sets[0].rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("ada".into())));
    assert_eq!(rows[0].get("score"), Some(&Value::Float(9.5)));
    assert_eq!(rows[0].get("avatar"), Some(&Value::Blob(vec![1, 2, 3])));
    assert_eq!(rows[1].get("id"), Some(&Value::Int(2)));
    assert_eq!(rows[1].get("score"), Some(&Value::Null));

    let mut name = String::new();
    rows[1].get_into("name", &mut name)?;
    assert_eq!(name, "grace");

    all_available(&pool).await;
    pool.close().await?;
    Ok(())
}

#[tokio::test]
async fn sqlite_transactions_and_savepoints() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let pool = open_file_pool(&dir).await?;
    let scope = Scope::new().bind(pool.clone());
    exec(&scope, "CREATE TABLE t (n INTEGER)", &[]).await?;

    let tx = pool.begin(&scope, Isolation::Default).await?;
    let insert = Command::new("INSERT INTO t (n) VALUES (?)").shared();
    tx.query(&scope, &insert, &[Param::new(1)]).await.close().await?;
    tx.save_point(&scope, "sp").await?;
    tx.query(&scope, &insert, &[Param::new(2)]).await.close().await?;
    tx.rollback_to(&scope, "sp").await?;
    tx.commit(&scope).await?;

    let tx = pool.begin(&scope, Isolation::Serializable).await?;
    tx.query(&scope, &insert, &[Param::new(3)]).await.close().await?;
    tx.rollback(&scope).await?;

    let sets = rdb::query_all(&scope, &Command::new("SELECT n FROM t").shared(), &[]).await?;
    let values: Vec<&Value> = sets[0].column_values("n").unwrap_or_default();
    assert_eq!(values, vec![&Value::Int(1)]);

    let err = pool.begin(&scope, Isolation::Snapshot).await.err().expect("unsupported");
    assert!(err.is_not_supported());
    all_available(&pool).await;
    Ok(())
}

#[tokio::test]
async fn sqlite_prepared_statements_and_errors() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let pool = open_file_pool(&dir).await?;
    let scope = Scope::new().bind(pool.clone());
    exec(&scope, "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)", &[]).await?;

    let put = pool
        .prepare(&scope, &Command::new("INSERT INTO kv (k, v) VALUES (?, ?)").shared())
        .await?;
    for i in 0..5 {
        put.exec(&scope, &[Param::new(format!("k{i}")), Param::new(format!("v{i}"))])
            .await
            .close()
            .await?;
    }
    put.close().await?;

    let cmd = Command::new("SELECT v FROM kv WHERE k = ?").text_as_bytes(true).shared();
    let sets = rdb::query_all(&scope, &cmd, &[Param::new("k3")]).await?;
    assert_eq!(sets[0].rows[0].get("v"), Some(&Value::Blob(b"v3".to_vec())));

    let dup = rdb::query_all(
        &scope,
        &Command::new("INSERT INTO kv (k, v) VALUES ('k1', 'again')").shared(),
        &[],
    )
    .await
    .unwrap_err();
    assert!(dup.error.as_sql_error().is_some(), "{:?}", dup.error);

    let missing = rdb::query_all(
        &scope,
        &Command::new("SELECT v FROM kv WHERE k = :key").shared(),
        &[Param::named("nope", "k1")],
    )
    .await
    .unwrap_err();
    assert!(matches!(missing.error, RdbError::ParameterError(_)));
    all_available(&pool).await;
    Ok(())
}

#[tokio::test]
async fn sqlite_memory_pool_holds_one_connection() -> Result<(), Box<dyn std::error::Error>> {
    let scope = Scope::new();
    let pool = SqliteOptions::builder("ignored")
        .mode(SqliteMode::Memory)
        .build(&scope)
        .await?;
    assert_eq!(pool.status().capacity, 1);

    let conn = pool.connection(&scope).await?;
    conn.query(&scope, &Command::new("CREATE TABLE t (n INTEGER)").shared(), &[])
        .await
        .close()
        .await?;
    let mut next = conn
        .query(&scope, &Command::new("SELECT count(*) AS c FROM t").shared(), &[])
        .await;
    let buffer = next.buffer().await?.expect("one set");
    assert_eq!(buffer.rows[0].get("c"), Some(&Value::Int(0)));
    conn.close().await?;
    Ok(())
}
