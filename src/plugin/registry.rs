use super::PluginModule;
use crate::{apps, drivers};

/// Plugin modules compiled into this gateway: an explicit registration
/// record, not process-global discovery.
pub static BUILTIN_MODULES: &[&PluginModule] = &[
    &drivers::modbus_tcp::MODULE,
    &apps::mqtt_bridge::MODULE,
];

pub fn find_module(name: &str) -> Option<&'static PluginModule> {
    BUILTIN_MODULES.iter().copied().find(|m| m.name == name)
}
