pub mod kvpath;
pub mod mqtt;
pub mod transport;
