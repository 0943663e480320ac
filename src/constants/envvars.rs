pub const DATA_DIR: &str = "FG_DATA_DIR";
pub const ROOT_DIR: &str = "FG_ROOT_DIR";

pub const LOG_LEVEL: &str = "FG_LOG_LEVEL";

pub const MQTT_BRIDGE_HOST: &str = "MQTT_BRIDGE_HOST";
pub const MQTT_BRIDGE_PORT: &str = "MQTT_BRIDGE_PORT";
