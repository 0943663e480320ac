use ahash::AHashMap;
use kvstore::KVStoreError;
use thiserror::Error;

use crate::data_mgmt::models::GroupConfig;
use crate::helpers;
use crate::plugin::message::{
    DataMessage, NodeCtl, ReadRequest, ReadResponse, Request, Response, WriteRequest,
    WriteResponse,
};
use crate::plugin::registry;
use crate::plugin::{Adapter, PluginConfig, PluginError, PluginKind, PluginModule};

use super::node::{Node, NodeInfo};
use super::persist::Persister;
use super::subscription::{Subscription, SubscriptionRouter};
use super::RunState;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("node '{0}' already exists")]
    DuplicateNode(String),
    #[error("node '{node}' is not a {expected:?} node")]
    KindMismatch {
        node: String,
        expected: PluginKind,
    },
    #[error("node '{0}' did not answer the request")]
    NoResponse(String),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error("persisted state could not be loaded: {0}")]
    Persistence(#[from] KVStoreError),
}

/// Registry of all nodes and their plugin bindings; owns the subscription
/// router and the persistence gateway.
///
/// Startup ordering is strict: plugins are loaded before nodes, nodes
/// before subscriptions. Violations surface as `UnknownPlugin` or
/// `UnknownNode` on the offending operation.
pub struct NodeManager {
    modules: AHashMap<String, &'static PluginModule>,
    nodes: AHashMap<String, Node>,
    router: SubscriptionRouter,
    persister: Option<Persister>,
}

impl NodeManager {
    pub fn new(persister: Option<Persister>) -> Self {
        NodeManager {
            modules: AHashMap::new(),
            nodes: AHashMap::new(),
            router: SubscriptionRouter::new(),
            persister,
        }
    }

    pub fn add_plugin(&mut self, name: &str) -> Result<(), ManagerError> {
        let module = registry::find_module(name)
            .ok_or_else(|| ManagerError::UnknownPlugin(name.to_string()))?;
        self.modules.insert(name.to_string(), module);

        if let Some(p) = &self.persister {
            let mut names: Vec<String> = self.modules.keys().cloned().collect();
            names.sort();
            p.store_plugins(&names);
        }
        Ok(())
    }

    pub fn add_node(
        &mut self,
        name: &str,
        plugin_name: &str,
        start_running: bool,
    ) -> Result<(), ManagerError> {
        let module = *self
            .modules
            .get(plugin_name)
            .ok_or_else(|| ManagerError::UnknownPlugin(plugin_name.to_string()))?;
        if self.nodes.contains_key(name) {
            return Err(ManagerError::DuplicateNode(name.to_string()));
        }

        let inbox = if module.kind == PluginKind::App {
            let (tx, rx) = flume::unbounded();
            self.router.register_app(name, tx);
            Some(rx)
        } else {
            None
        };

        let plugin = match (module.open)(Adapter {
            node: name.to_string(),
            inbox,
        }) {
            Ok(plugin) => plugin,
            Err(e) => {
                self.router.remove_node(name);
                return Err(e.into());
            }
        };

        let info = NodeInfo {
            name: name.to_string(),
            kind: module.kind,
            plugin: plugin_name.to_string(),
            state: RunState::Stopped,
        };
        self.nodes.insert(name.to_string(), Node { info, plugin });
        self.persist_node(name);
        log::info!("Added {:?} node '{}' (plugin {})", module.kind, name, plugin_name);

        if start_running {
            self.start_node(name)?;
        }
        Ok(())
    }

    /// Remove a node, cascading to every subscription that references it
    /// as app or driver.
    pub fn remove_node(&mut self, name: &str) -> Result<(), ManagerError> {
        let mut node = self
            .nodes
            .remove(name)
            .ok_or_else(|| ManagerError::UnknownNode(name.to_string()))?;

        for sub in self.router.remove_node(name) {
            if let Some(p) = &self.persister {
                p.delete_subscription(&sub);
            }
        }

        if node.info.state == RunState::Running {
            node.plugin.uninit();
        }
        node.plugin.close();

        if let Some(p) = &self.persister {
            p.delete_node(name);
        }
        log::info!("Removed node '{name}'");
        Ok(())
    }

    pub fn get_node_info(&self, name: &str) -> Result<NodeInfo, ManagerError> {
        self.nodes
            .get(name)
            .map(|n| n.info.clone())
            .ok_or_else(|| ManagerError::UnknownNode(name.to_string()))
    }

    pub fn configure_node(
        &mut self,
        name: &str,
        config: &PluginConfig,
    ) -> Result<(), ManagerError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| ManagerError::UnknownNode(name.to_string()))?;
        node.plugin.config(config)?;
        Ok(())
    }

    pub fn start_node(&mut self, name: &str) -> Result<(), ManagerError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| ManagerError::UnknownNode(name.to_string()))?;
        if node.info.state == RunState::Running {
            return Ok(());
        }
        node.plugin.init()?;
        node.info.state = RunState::Running;
        self.persist_node(name);
        Ok(())
    }

    pub fn stop_node(&mut self, name: &str) -> Result<(), ManagerError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| ManagerError::UnknownNode(name.to_string()))?;
        if node.info.state == RunState::Running {
            node.plugin.uninit();
            node.info.state = RunState::Stopped;
            self.persist_node(name);
        }
        Ok(())
    }

    /// Pause or resume a driver's polling without tearing it down.
    pub fn ctl_node(&mut self, name: &str, ctl: NodeCtl) -> Result<(), ManagerError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| ManagerError::UnknownNode(name.to_string()))?;
        node.plugin.request(Request::Ctl(ctl));
        Ok(())
    }

    pub fn subscribe(&mut self, app: &str, driver: &str, group: &str) -> Result<(), ManagerError> {
        self.expect_kind(app, PluginKind::App)?;
        self.expect_kind(driver, PluginKind::Driver)?;

        if self.router.subscribe(app, driver, group) {
            if let Some(p) = &self.persister {
                p.store_subscription(&Subscription {
                    app: app.to_string(),
                    driver: driver.to_string(),
                    group: group.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, app: &str, driver: &str, group: &str) {
        if self.router.unsubscribe(app, driver, group) {
            if let Some(p) = &self.persister {
                p.delete_subscription(&Subscription {
                    app: app.to_string(),
                    driver: driver.to_string(),
                    group: group.to_string(),
                });
            }
        }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        self.router.subscriptions()
    }

    /// Read the group's tags from the owning driver's point cache.
    pub fn read(
        &mut self,
        driver: &str,
        group: &GroupConfig,
    ) -> Result<ReadResponse, ManagerError> {
        self.expect_kind(driver, PluginKind::Driver)?;
        let node = self
            .nodes
            .get_mut(driver)
            .ok_or_else(|| ManagerError::UnknownNode(driver.to_string()))?;
        match node.plugin.request(Request::Read(ReadRequest {
            group: group.clone(),
        })) {
            Some(Response::Read(resp)) => Ok(resp),
            _ => Err(ManagerError::NoResponse(driver.to_string())),
        }
    }

    /// Write tag values through the owning driver; one code per tag.
    pub fn write(
        &mut self,
        driver: &str,
        request: WriteRequest,
    ) -> Result<WriteResponse, ManagerError> {
        self.expect_kind(driver, PluginKind::Driver)?;
        let node = self
            .nodes
            .get_mut(driver)
            .ok_or_else(|| ManagerError::UnknownNode(driver.to_string()))?;
        match node.plugin.request(Request::Write(request)) {
            Some(Response::Write(resp)) => Ok(resp),
            _ => Err(ManagerError::NoResponse(driver.to_string())),
        }
    }

    /// Read the group and deliver the result to every subscribed app.
    /// Returns the number of deliveries.
    pub fn fanout_group(
        &mut self,
        driver: &str,
        group: &GroupConfig,
    ) -> Result<usize, ManagerError> {
        let resp = self.read(driver, group)?;
        let payload = DataMessage {
            driver: driver.to_string(),
            group: resp.group,
            ts: helpers::now_iso(),
            items: resp.items,
        };
        Ok(self.router.fanout(driver, &group.name, &payload))
    }

    /// Load the persisted plugin list. Per-plugin failures are logged and
    /// skipped, matching the load semantics of nodes and subscriptions.
    pub fn load_plugins(&mut self) -> Result<(), ManagerError> {
        let names = match &self.persister {
            Some(p) => p.load_plugins()?,
            None => return Ok(()),
        };
        for name in names {
            match self.add_plugin(&name) {
                Ok(()) => log::info!("Loaded plugin '{name}'"),
                Err(e) => log::error!("Failed to load plugin '{name}': {e}"),
            }
        }
        Ok(())
    }

    /// Load persisted nodes. Requires the referenced plugins to be loaded
    /// first.
    pub fn load_nodes(&mut self) -> Result<(), ManagerError> {
        let infos = match &self.persister {
            Some(p) => p.load_nodes()?,
            None => return Ok(()),
        };
        for info in infos {
            let start_running = info.state == RunState::Running;
            match self.add_node(&info.name, &info.plugin, start_running) {
                Ok(()) => log::info!(
                    "Loaded node '{}' plugin:{} state:{:?}",
                    info.name,
                    info.plugin,
                    info.state
                ),
                Err(e) => log::error!("Failed to load node '{}': {e}", info.name),
            }
        }
        Ok(())
    }

    /// Load persisted subscriptions for every app node. Requires the
    /// referenced nodes to be loaded first.
    pub fn load_subscriptions(&mut self) -> Result<(), ManagerError> {
        let apps: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.info.kind == PluginKind::App)
            .map(|n| n.info.name.clone())
            .collect();

        for app in apps {
            let subs = match &self.persister {
                Some(p) => match p.load_subscriptions(&app) {
                    Ok(subs) => subs,
                    Err(e) => {
                        log::warn!("Failed to load subscriptions of '{app}': {e}");
                        continue;
                    }
                },
                None => return Ok(()),
            };
            for sub in subs {
                match self.subscribe(&sub.app, &sub.driver, &sub.group) {
                    Ok(()) => log::info!(
                        "Loaded subscription app:{} driver:{} group:{}",
                        sub.app,
                        sub.driver,
                        sub.group
                    ),
                    Err(e) => log::error!(
                        "Failed to load subscription app:{} driver:{} group:{}: {e}",
                        sub.app,
                        sub.driver,
                        sub.group
                    ),
                }
            }
        }
        Ok(())
    }

    fn expect_kind(&self, name: &str, expected: PluginKind) -> Result<(), ManagerError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| ManagerError::UnknownNode(name.to_string()))?;
        if node.info.kind != expected {
            return Err(ManagerError::KindMismatch {
                node: name.to_string(),
                expected,
            });
        }
        Ok(())
    }

    fn persist_node(&self, name: &str) {
        if let (Some(p), Some(node)) = (&self.persister, self.nodes.get(name)) {
            p.store_node(&node.info);
        }
    }
}
