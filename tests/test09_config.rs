mod common;

use std::sync::Arc;

use clap::ValueEnum;
use rdb::memory::{MemoryDatabase, MemoryOpener};
use rdb::{Capabilities, Config, Isolation, RdbError, Registry, Scope};

#[test]
fn config_strings_round_trip() {
    let text = "Memory://main/ignored?max_connections=3&tag=a&tag=b";
    let config: Config = text.parse().unwrap();
    assert_eq!(config.driver_name(), "memory");
    assert_eq!(config.raw(), "main/ignored?max_connections=3&tag=a&tag=b");
    assert_eq!(config.authority(), "main");
    assert_eq!(config.path(), "/ignored");
    assert_eq!(config.option_values("tag").collect::<Vec<_>>(), ["a", "b"]);
    assert_eq!(
        config.to_string(),
        "memory://main/ignored?max_connections=3&tag=a&tag=b"
    );

    let built = Config::new("memory", "main?x=1");
    assert_eq!(built.option("x"), Some("1"));
}

#[test]
fn config_serializes_as_json() {
    let config: Config = "sqlite:///data/app.db?mode=ro".parse().unwrap();
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["driver_name"], "sqlite");
    assert_eq!(json["raw"], "/data/app.db?mode=ro");

    let caps = serde_json::to_value(Capabilities {
        savepoints: true,
        dedicated_connections: false,
        tracing: true,
    })
    .unwrap();
    assert_eq!(caps["dedicated_connections"], false);
}

#[test]
fn isolation_parses_from_the_command_line() {
    let iso = Isolation::from_str("serializable", true).unwrap();
    assert_eq!(iso, Isolation::Serializable);
    assert!(Isolation::from_str("chaotic", true).is_err());
    assert!(Isolation::ReadCommitted < Isolation::Serializable);
    assert_eq!(Isolation::default(), Isolation::Default);
}

#[tokio::test]
async fn malformed_driver_options_fail_open() {
    let registry = Registry::new();
    registry.register(Arc::new(MemoryOpener::new()));
    for bad in [
        "memory://x?savepoints=maybe",
        "memory://x?max_connections=0",
        "memory://x?connect_timeout_ms=-5",
    ] {
        let err = registry
            .open(&Scope::new(), &bad.parse().unwrap())
            .await
            .err()
            .unwrap_or_else(|| panic!("{bad} should not open"));
        assert!(matches!(err, RdbError::ConfigError(_)), "{bad}: {err:?}");
    }
}

#[tokio::test]
async fn pool_options_come_from_the_config() {
    let db = MemoryDatabase::new();
    let registry = Registry::new();
    let opener = MemoryOpener::new();
    opener.insert("sized", db.clone());
    registry.register(Arc::new(opener));

    let pool = registry
        .open(
            &Scope::new(),
            &"memory://sized?max_connections=7&verify=false".parse().unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(pool.status().capacity, 7);
    assert_eq!(pool.status().available, 7);
    // Without verification nothing connects until first use.
    assert_eq!(db.connect_count(), 0);
    pool.ping(&Scope::new()).await.unwrap();
    assert_eq!(db.connect_count(), 1);
    common::all_available(&pool).await;
}
