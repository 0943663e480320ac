use serde::{Deserialize, Serialize};

use crate::plugin::{Plugin, PluginKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
}

/// Identity and state of a registered node, as reported to callers and
/// persisted across restarts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub kind: PluginKind,
    pub plugin: String,
    pub state: RunState,
}

/// A registered node and its live plugin instance. The sending half of an
/// app node's fan-out inbox is held by the subscription router.
pub(crate) struct Node {
    pub info: NodeInfo,
    pub plugin: Box<dyn Plugin>,
}
