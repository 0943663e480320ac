pub mod mqtt_bridge;
