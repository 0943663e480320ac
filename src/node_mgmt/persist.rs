//! Durable registry of plugins, nodes and subscriptions.
//!
//! Stores and deletes are best-effort: a failure is logged and never rolls
//! back the in-memory mutation. Loads surface their errors so startup can
//! decide what to do.

use kvstore::{KVDb, KVStoreError};

use crate::constants::keys;
use crate::interfaces::kvpath;

use super::node::NodeInfo;
use super::subscription::Subscription;

pub struct Persister {
    db: KVDb,
}

fn node_key(name: &str) -> String {
    format!("{}{}", keys::NODE_PFX, name)
}

fn subscription_key(sub: &Subscription) -> String {
    format!("{}{}/{}/{}", keys::SUB_PFX, sub.app, sub.driver, sub.group)
}

impl Persister {
    pub fn new(db: KVDb) -> Self {
        Persister { db }
    }

    pub fn open_default() -> Result<Self, KVStoreError> {
        Ok(Persister::new(KVDb::new(kvpath::SQLITE_STORE.as_path())?))
    }

    pub fn store_plugins(&self, names: &[String]) {
        if let Err(e) = self.db.set(keys::PLUGINS, names) {
            log::error!("Failed to store plugin list: {e}");
        }
    }

    pub fn load_plugins(&self) -> Result<Vec<String>, KVStoreError> {
        Ok(self.db.get(keys::PLUGINS)?.unwrap_or_default())
    }

    pub fn store_node(&self, info: &NodeInfo) {
        if let Err(e) = self.db.set(node_key(&info.name), info) {
            log::error!("Failed to store node '{}': {e}", info.name);
        }
    }

    pub fn delete_node(&self, name: &str) {
        if let Err(e) = self.db.delete(node_key(name)) {
            log::error!("Failed to delete node '{name}': {e}");
        }
    }

    pub fn load_nodes(&self) -> Result<Vec<NodeInfo>, KVStoreError> {
        let mut nodes = Vec::new();
        for key in self.db.keys_with_prefix(keys::NODE_PFX)? {
            match self.db.get::<NodeInfo>(&key)? {
                Some(info) => nodes.push(info),
                None => log::warn!("Node entry '{key}' disappeared during load"),
            }
        }
        Ok(nodes)
    }

    pub fn store_subscription(&self, sub: &Subscription) {
        if let Err(e) = self.db.set(subscription_key(sub), sub) {
            log::error!(
                "Failed to store subscription app:{} driver:{} group:{}: {e}",
                sub.app,
                sub.driver,
                sub.group
            );
        }
    }

    pub fn delete_subscription(&self, sub: &Subscription) {
        if let Err(e) = self.db.delete(subscription_key(sub)) {
            log::error!(
                "Failed to delete subscription app:{} driver:{} group:{}: {e}",
                sub.app,
                sub.driver,
                sub.group
            );
        }
    }

    pub fn load_subscriptions(&self, app: &str) -> Result<Vec<Subscription>, KVStoreError> {
        let prefix = format!("{}{}/", keys::SUB_PFX, app);
        let mut subs = Vec::new();
        for key in self.db.keys_with_prefix(&prefix)? {
            match self.db.get::<Subscription>(&key)? {
                Some(sub) => subs.push(sub),
                None => log::warn!("Subscription entry '{key}' disappeared during load"),
            }
        }
        Ok(subs)
    }
}
