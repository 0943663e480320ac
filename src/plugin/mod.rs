pub mod message;
pub mod registry;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data_mgmt::models::{GroupConfig, TagTable};
use crate::interfaces::transport::Transport;
use self::message::{DataMessage, EventReply, Request, Response};

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Driver,
    App,
}

/// Binding of a plugin instance to its owning node. App nodes receive a
/// fan-out inbox; driver nodes do not.
pub struct Adapter {
    pub node: String,
    pub inbox: Option<flume::Receiver<DataMessage>>,
}

pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Configuration applied through `Plugin::config`. Recognized settings keys
/// are plugin-specific; unrecognized keys are ignored.
#[derive(Clone, Default)]
pub struct PluginConfig {
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub tag_table: Option<Arc<TagTable>>,
    pub groups: Vec<GroupConfig>,
    /// Platform-supplied transport. When absent, drivers construct their
    /// own from the `host`/`port` settings.
    pub transport: Option<SharedTransport>,
}

impl PluginConfig {
    pub fn str_setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn u64_setting(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(|v| v.as_u64())
    }
}

/// The fixed plugin operation set. `open` lives on the module descriptor;
/// `close` consumes the instance. Callers must not call `init` twice
/// without an intervening `uninit`.
pub trait Plugin: Send {
    /// One-time setup; drivers start their polling loop here.
    fn init(&mut self) -> Result<(), PluginError>;

    /// Apply or refresh configuration.
    fn config(&mut self, config: &PluginConfig) -> Result<(), PluginError>;

    /// Handle a typed request. Unrecognized request kinds yield `None`,
    /// which is not an error.
    fn request(&mut self, req: Request) -> Option<Response>;

    /// Platform event acknowledgment; informational.
    fn event_reply(&mut self, _reply: EventReply) {}

    /// Stop all activity and release transport and table resources.
    fn uninit(&mut self);

    /// Free the plugin instance.
    fn close(self: Box<Self>) {}
}

pub type OpenFn = fn(Adapter) -> Result<Box<dyn Plugin>, PluginError>;

/// Static descriptor for a compiled-in plugin.
pub struct PluginModule {
    pub name: &'static str,
    pub descr: &'static str,
    pub kind: PluginKind,
    pub open: OpenFn,
}
