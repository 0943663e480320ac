use anyhow::{anyhow, Context, Result};
use kvstore::KVDb;

use crate::argsets::InitArgs;
use crate::interfaces::kvpath;
use crate::node_mgmt::{config, NodeInfo, Persister, RunState};
use crate::plugin::registry;

/// Provision the gateway from a JSON config file: store the configuration
/// and seed the persisted registry in load order (plugins, nodes,
/// subscriptions).
pub fn init(args: InitArgs) -> Result<()> {
    let kvs = KVDb::new(kvpath::SQLITE_STORE.as_path())?;

    let Some(config_path) = args.config_path else {
        return match config::get(&kvs)? {
            Some(cfg) => {
                log::info!("Gateway already initialized with {} nodes", cfg.nodes.len());
                Ok(())
            }
            None => Err(anyhow!("No configuration present; pass a config file path")),
        };
    };

    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("could not read {}", config_path.display()))?;
    let cfg = config::from_str(&raw)?;
    config::set(&kvs, &cfg)?;

    let persister = Persister::new(kvs);

    let mut plugins: Vec<String> = cfg.nodes.iter().map(|n| n.plugin.clone()).collect();
    plugins.sort();
    plugins.dedup();
    persister.store_plugins(&plugins);

    for node in &cfg.nodes {
        let Some(module) = registry::find_module(&node.plugin) else {
            log::warn!(
                "Node '{}' references unknown plugin '{}'",
                node.name,
                node.plugin
            );
            continue;
        };
        persister.store_node(&NodeInfo {
            name: node.name.clone(),
            kind: module.kind,
            plugin: node.plugin.clone(),
            state: if node.running {
                RunState::Running
            } else {
                RunState::Stopped
            },
        });
    }

    for sub in &cfg.subscriptions {
        persister.store_subscription(sub);
    }

    log::info!(
        "Initialized gateway: {} tags, {} nodes, {} subscriptions",
        cfg.tags.len(),
        cfg.nodes.len(),
        cfg.subscriptions.len()
    );
    Ok(())
}
