use kvstore::{KVDb, KVStoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::keys;
use crate::data_mgmt::models::{DataTag, GroupConfig};

use super::subscription::Subscription;

/// Gateway configuration as provisioned through `init`: the shared tag
/// table, node definitions, group bindings and initial subscriptions.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub tags: Vec<DataTag>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub groups: Vec<GroupBinding>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeConfig {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// A tag group together with the driver node that polls it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GroupBinding {
    pub driver: String,
    #[serde(flatten)]
    pub group: GroupConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
}

pub fn from_str(config_raw: &str) -> Result<GatewayConfig, ConfigError> {
    let mut cfg = serde_json::from_str::<GatewayConfig>(config_raw)?;
    for binding in &mut cfg.groups {
        let before = binding.group.tag_ids().len();
        binding.group.dedup_tags();
        if binding.group.tag_ids().len() != before {
            log::warn!(
                "Group '{}' listed duplicate tag ids; keeping first occurrences",
                binding.group.name
            );
        }
    }
    Ok(cfg)
}

pub fn set(kvs: &KVDb, config: &GatewayConfig) -> Result<(), KVStoreError> {
    kvs.set(keys::CONFIG, config)
}

pub fn get(kvs: &KVDb) -> Result<Option<GatewayConfig>, KVStoreError> {
    kvs.get(keys::CONFIG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let cfg = from_str(
            r#"{
                "tags": [
                    {"id": 1, "name": "power", "address": "1!400001", "data_type": "WORD"}
                ],
                "nodes": [
                    {"name": "plc-1", "plugin": "modbus-tcp", "running": true,
                     "settings": {"host": "192.168.8.30", "port": 502, "interval_ms": 1000}},
                    {"name": "bridge", "plugin": "mqtt-bridge"}
                ],
                "groups": [
                    {"driver": "plc-1", "name": "grp", "interval_ms": 2000, "tag_ids": [1, 1]}
                ],
                "subscriptions": [
                    {"app": "bridge", "driver": "plc-1", "group": "grp"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.tags.len(), 1);
        assert_eq!(cfg.nodes[0].settings["host"], "192.168.8.30");
        assert!(!cfg.nodes[1].running);
        // Duplicate tag id was dropped
        assert_eq!(cfg.groups[0].group.tag_ids(), &[1]);
        assert_eq!(cfg.subscriptions.len(), 1);
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        assert!(matches!(from_str("blah"), Err(ConfigError::ParseJson(_))));
    }
}
