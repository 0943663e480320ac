use assert_cmd::Command;
use kvstore::KVDb;
use predicates::prelude::*;
use serde_json::Value;

const CONFIG: &str = r#"
{
    "tags": [
        {"id": 1, "name": "power", "address": "1!400001", "data_type": "WORD"},
        {"id": 2, "name": "enabled", "address": "1!00001", "data_type": "BOOLEAN"}
    ],
    "nodes": [
        {"name": "plc-1", "plugin": "modbus-tcp", "running": true,
         "settings": {"host": "192.168.8.30", "interval_ms": 1000}},
        {"name": "bridge", "plugin": "mqtt-bridge", "running": true}
    ],
    "groups": [
        {"driver": "plc-1", "name": "meters", "interval_ms": 2000, "tag_ids": [1, 2]}
    ],
    "subscriptions": [
        {"app": "bridge", "driver": "plc-1", "group": "meters"}
    ]
}
"#;

#[test]
fn init_seeds_config_and_registry() {
    let tempdir = tempfile::tempdir().unwrap();
    let config_path = tempdir.path().join("gateway.json");
    std::fs::write(&config_path, CONFIG).unwrap();

    Command::cargo_bin("fieldgate")
        .unwrap()
        .env("FG_DATA_DIR", tempdir.path())
        .arg("init")
        .arg(&config_path)
        .assert()
        .success();

    let kvs = KVDb::new(tempdir.path().join("kvs-db/kvstore.db")).unwrap();

    let cfg: Value = kvs.get("config").unwrap().unwrap();
    assert_eq!(cfg["nodes"][0]["name"], "plc-1");
    assert_eq!(cfg["groups"][0]["tag_ids"], serde_json::json!([1, 2]));

    // The persisted registry is seeded in load order
    let plugins: Vec<String> = kvs.get("plugins").unwrap().unwrap();
    assert_eq!(plugins, vec!["modbus-tcp", "mqtt-bridge"]);

    let plc: Value = kvs.get("node/plc-1").unwrap().unwrap();
    assert_eq!(plc["kind"], "driver");
    assert_eq!(plc["state"], "running");

    assert!(kvs
        .get::<Value>("sub/bridge/plc-1/meters")
        .unwrap()
        .is_some());

    // A second run without arguments is satisfied with the stored config
    Command::cargo_bin("fieldgate")
        .unwrap()
        .env("FG_DATA_DIR", tempdir.path())
        .arg("init")
        .assert()
        .success();
}

#[test]
fn init_without_config_fails() {
    let tempdir = tempfile::tempdir().unwrap();

    Command::cargo_bin("fieldgate")
        .unwrap()
        .env("FG_DATA_DIR", tempdir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No configuration present"));
}
