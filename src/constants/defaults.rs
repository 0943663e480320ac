use std::time::Duration;

pub const LOG_LEVEL: &str = "info";

pub const MQTT_BRIDGE_HOST: &str = "localhost";
pub const MQTT_BRIDGE_PORT: u16 = 1883;

pub const MODBUS_TCP_PORT: u16 = 502;
pub const POLL_INTERVAL_MS: u32 = 1000;
pub const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(5);
