//! End-to-end acquisition scenario against a scripted slave: register a
//! WORD and a BOOLEAN tag, let the driver poll, then read and write the
//! tags back through the node manager.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fieldgate::data_mgmt::models::{DataTag, DataType, GroupConfig, TagTable, Value};
use fieldgate::interfaces::transport::{Transport, TransportError};
use fieldgate::node_mgmt::NodeManager;
use fieldgate::plugin::message::{TagResult, WriteRequest, ITEM_OK};
use fieldgate::plugin::PluginConfig;

/// Fixed-response slave: holding register 0 reads 0x0042, coil 0 reads
/// set. Writes are accepted and change the subsequent read responses.
struct ScriptedSlave {
    holding0: u16,
    coil0: bool,
}

impl ScriptedSlave {
    fn new() -> Self {
        ScriptedSlave {
            holding0: 0x0042,
            coil0: true,
        }
    }

    fn frame(request: &[u8], pdu: Vec<u8>) -> Vec<u8> {
        let mut frame = Vec::with_capacity(7 + pdu.len());
        frame.extend_from_slice(&request[0..2]);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
        frame.push(request[6]);
        frame.extend_from_slice(&pdu);
        frame
    }
}

impl Transport for ScriptedSlave {
    fn send_recv(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let function = request[7];
        let arg = u16::from_be_bytes([request[10], request[11]]);
        let pdu = match function {
            // Read holding registers (the group polls exactly one)
            0x03 => vec![function, 2, (self.holding0 >> 8) as u8, self.holding0 as u8],
            // Read coils
            0x01 => vec![function, 1, u8::from(self.coil0)],
            // Write single register / coil: apply and echo
            0x06 => {
                self.holding0 = arg;
                request[7..12].to_vec()
            }
            0x05 => {
                self.coil0 = arg == 0xFF00;
                request[7..12].to_vec()
            }
            // Illegal function
            _ => vec![function | 0x80, 0x01],
        };
        Ok(Self::frame(request, pdu))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn disconnect(&mut self) {}
}

fn tag_table() -> Arc<TagTable> {
    Arc::new(TagTable::from_tags([
        DataTag {
            id: 1,
            name: "power".into(),
            address: "1!400001".into(),
            data_type: DataType::Word,
        },
        DataTag {
            id: 2,
            name: "enabled".into(),
            address: "1!00001".into(),
            data_type: DataType::Boolean,
        },
    ]))
}

fn group() -> GroupConfig {
    let mut group = GroupConfig::new("meters", 10);
    group.push_tag(1);
    group.push_tag(2);
    group
}

fn gateway() -> (NodeManager, GroupConfig) {
    let mut settings = serde_json::Map::new();
    settings.insert("interval_ms".into(), serde_json::json!(10));

    let mut manager = NodeManager::new(None);
    manager.add_plugin("modbus-tcp").unwrap();
    manager.add_plugin("mqtt-bridge").unwrap();
    manager.add_node("plc-1", "modbus-tcp", false).unwrap();
    manager.add_node("bridge", "mqtt-bridge", false).unwrap();

    manager
        .configure_node(
            "plc-1",
            &PluginConfig {
                settings,
                tag_table: Some(tag_table()),
                groups: vec![group()],
                transport: Some(Arc::new(Mutex::new(
                    Box::new(ScriptedSlave::new()) as Box<dyn Transport>
                ))),
            },
        )
        .unwrap();

    (manager, group())
}

#[test]
fn poll_read_write_round_trip() {
    let (mut manager, group) = gateway();

    manager.start_node("plc-1").unwrap();
    thread::sleep(Duration::from_millis(100));

    // The polling loop has filled the point cache by now
    let resp = manager.read("plc-1", &group).unwrap();
    assert_eq!(resp.group, "meters");
    assert_eq!(
        resp.items,
        vec![
            TagResult::Value(Value::Word(66)),
            TagResult::Value(Value::Boolean(true)),
        ]
    );

    // Write both tags and read the new values straight back from the
    // cache (write-through, no further poll needed)
    let write = manager
        .write(
            "plc-1",
            WriteRequest {
                group: group.clone(),
                values: vec![Value::Word(0x1234), Value::Boolean(false)],
            },
        )
        .unwrap();
    assert_eq!(write.codes, vec![ITEM_OK, ITEM_OK]);

    let resp = manager.read("plc-1", &group).unwrap();
    assert_eq!(
        resp.items,
        vec![
            TagResult::Value(Value::Word(0x1234)),
            TagResult::Value(Value::Boolean(false)),
        ]
    );

    manager.stop_node("plc-1").unwrap();
}

#[test]
fn fanout_delivers_to_subscribed_apps_only() {
    let (mut manager, group) = gateway();

    assert_eq!(manager.fanout_group("plc-1", &group).unwrap(), 0);

    manager.subscribe("bridge", "plc-1", "meters").unwrap();
    manager.subscribe("bridge", "plc-1", "meters").unwrap();
    assert_eq!(manager.fanout_group("plc-1", &group).unwrap(), 1);

    manager.remove_node("bridge").unwrap();
    assert_eq!(manager.fanout_group("plc-1", &group).unwrap(), 0);
}
