use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use kvstore::KVDb;

use crate::data_mgmt::models::TagTable;
use crate::interfaces::kvpath;
use crate::node_mgmt::{config, NodeManager, Persister};
use crate::plugin::PluginConfig;

/// Bring the gateway up from persisted state and drive the fan-out cycle.
pub fn run() -> Result<()> {
    let kvs = KVDb::new(kvpath::SQLITE_STORE.as_path())?;
    let cfg = config::get(&kvs)?
        .ok_or_else(|| anyhow!("No configuration present; run 'init' first"))?;

    let tag_table = Arc::new(TagTable::from_tags(cfg.tags.clone()));

    let mut manager = NodeManager::new(Some(Persister::open_default()?));
    // Strict bring-up order: plugins, then nodes, then subscriptions
    manager.load_plugins()?;
    manager.load_nodes()?;

    // Apply per-node settings, the shared tag table and group bindings
    for node in &cfg.nodes {
        let groups = cfg
            .groups
            .iter()
            .filter(|b| b.driver == node.name)
            .map(|b| b.group.clone())
            .collect();
        let plugin_config = PluginConfig {
            settings: node.settings.clone(),
            tag_table: Some(tag_table.clone()),
            groups,
            transport: None,
        };
        if let Err(e) = manager.configure_node(&node.name, &plugin_config) {
            log::error!("Failed to configure node '{}': {e}", node.name);
        }
    }

    manager.load_subscriptions()?;

    let manager = Arc::new(Mutex::new(manager));

    // One scheduler per group binding drives read + fan-out at the group's
    // own interval
    let mut schedulers = Vec::new();
    for binding in cfg.groups {
        let manager = Arc::clone(&manager);
        schedulers.push(thread::spawn(move || loop {
            {
                let mut mgr = manager.lock().unwrap_or_else(|p| p.into_inner());
                match mgr.fanout_group(&binding.driver, &binding.group) {
                    Ok(delivered) => log::debug!(
                        "Fanned out {}/{} to {delivered} apps",
                        binding.driver,
                        binding.group.name
                    ),
                    Err(e) => log::warn!(
                        "Fan-out of {}/{} failed: {e}",
                        binding.driver,
                        binding.group.name
                    ),
                }
            }
            thread::sleep(Duration::from_millis(u64::from(binding.group.interval_ms)));
        }));
    }

    log::info!(
        "Gateway running with {} fan-out schedulers",
        schedulers.len()
    );
    for scheduler in schedulers {
        let _ = scheduler.join();
    }
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
