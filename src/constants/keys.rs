pub const CONFIG: &str = "config";

// Persisted registry keys (see node_mgmt::persist)
pub const PLUGINS: &str = "plugins";
pub const NODE_PFX: &str = "node/";
pub const SUB_PFX: &str = "sub/";
