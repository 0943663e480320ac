use serde::{Deserialize, Serialize};

use crate::data_mgmt::models::{GroupConfig, Value};

/// Per-item result codes used in batched write responses.
pub const ITEM_OK: u8 = 0;
pub const ITEM_ERR_LOOKUP: u8 = 1;
pub const ITEM_ERR_TRANSPORT: u8 = 2;
pub const ITEM_ERR_TYPE: u8 = 3;

#[derive(Clone, Debug)]
pub enum Request {
    Read(ReadRequest),
    Write(WriteRequest),
    Ctl(NodeCtl),
}

/// Pause/resume of a driver's polling, independent of the stopped state
/// that only `uninit` enters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeCtl {
    Start,
    Stop,
}

#[derive(Clone, Debug)]
pub struct ReadRequest {
    pub group: GroupConfig,
}

/// Values are given in group tag order, one per tag.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub group: GroupConfig,
    pub values: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Read(ReadResponse),
    Write(WriteResponse),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagResult {
    Value(Value),
    Error { error: u8 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub group: String,
    pub items: Vec<TagResult>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub group: String,
    pub codes: Vec<u8>,
}

/// Payload fanned out to subscribed app nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataMessage {
    pub driver: String,
    pub group: String,
    pub ts: String,
    pub items: Vec<TagResult>,
}

/// Platform acknowledgment of an earlier event. Informational only.
#[derive(Clone, Debug)]
pub struct EventReply {
    pub node: String,
    pub code: i32,
}
