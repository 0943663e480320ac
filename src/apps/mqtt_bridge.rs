//! App plugin that bridges fan-out payloads to an MQTT broker as JSON.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::topics;
use crate::interfaces::mqtt::{self, MqttMessage};
use crate::plugin::message::{DataMessage, Request, Response};
use crate::plugin::{Adapter, Plugin, PluginConfig, PluginError, PluginKind, PluginModule};

pub static MODULE: PluginModule = PluginModule {
    name: "mqtt-bridge",
    descr: "MQTT northbound bridge",
    kind: PluginKind::App,
    open,
};

const INBOX_POLL_TIMEOUT: Duration = Duration::from_millis(500);

pub struct MqttBridgePlugin {
    node: String,
    inbox: flume::Receiver<DataMessage>,
    topic_root: String,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

fn open(adapter: Adapter) -> Result<Box<dyn Plugin>, PluginError> {
    let inbox = adapter.inbox.ok_or_else(|| {
        PluginError::InvalidArgument("mqtt-bridge requires a fan-out inbox".into())
    })?;
    Ok(Box::new(MqttBridgePlugin {
        node: adapter.node,
        inbox,
        topic_root: topics::DATA.to_string(),
        running: Arc::new(AtomicBool::new(false)),
        worker: None,
    }))
}

impl Plugin for MqttBridgePlugin {
    fn init(&mut self) -> Result<(), PluginError> {
        if self.worker.is_some() {
            return Err(PluginError::InvalidArgument(
                "init called twice without uninit".into(),
            ));
        }
        self.running.store(true, Ordering::SeqCst);

        let node = self.node.clone();
        let inbox = self.inbox.clone();
        let topic_root = self.topic_root.clone();
        let running = self.running.clone();
        self.worker = Some(thread::spawn(move || {
            bridge_loop(node, inbox, topic_root, running)
        }));

        log::info!("MQTT bridge '{}' started", self.node);
        Ok(())
    }

    fn config(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        if let Some(topic) = config.str_setting("topic") {
            self.topic_root = topic.to_string();
        }
        Ok(())
    }

    fn request(&mut self, _req: Request) -> Option<Response> {
        // Data arrives through the inbox; no request kinds are handled here
        None
    }

    fn uninit(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Bridge worker of '{}' panicked", self.node);
            }
        }
        log::info!("MQTT bridge '{}' stopped", self.node);
    }
}

fn bridge_loop(
    node: String,
    inbox: flume::Receiver<DataMessage>,
    topic_root: String,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match inbox.recv_timeout(INBOX_POLL_TIMEOUT) {
            Ok(msg) => publish_payload(&node, &topic_root, &msg),
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("Bridge worker of '{node}' exited");
}

/// Publish one fan-out payload. A failed publish is logged and the payload
/// dropped; the broker sees the next group cycle soon enough.
fn publish_payload(node: &str, topic_root: &str, msg: &DataMessage) {
    let payload = match serde_json::to_string(msg) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("Could not serialize payload for {}/{}: {e}", msg.driver, msg.group);
            return;
        }
    };
    let message = MqttMessage::new(format!("{topic_root}/{}/{}", msg.driver, msg.group), payload);
    if let Err(e) = mqtt::publish_msgs(std::slice::from_ref(&message), Some(false), Some(node)) {
        log::warn!(
            "Dropping payload for {}/{}: publish failed: {e}",
            msg.driver,
            msg.group
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_without_inbox_is_an_invalid_argument() {
        let result = (MODULE.open)(Adapter {
            node: "bridge".into(),
            inbox: None,
        });
        assert!(matches!(result, Err(PluginError::InvalidArgument(_))));
    }

    #[test]
    fn worker_drains_inbox_and_stops_on_uninit() {
        let (tx, rx) = flume::unbounded();
        let mut plugin = (MODULE.open)(Adapter {
            node: "bridge".into(),
            inbox: Some(rx),
        })
        .unwrap();

        plugin.init().unwrap();
        assert!(plugin.init().is_err());

        tx.send(DataMessage {
            driver: "plc-1".into(),
            group: "grp".into(),
            ts: "2024-01-01T00:00:00Z".into(),
            items: vec![],
        })
        .unwrap();

        // uninit must return even with a payload in flight (the publish
        // attempt fails fast against the unset default broker and is
        // dropped with a warning)
        plugin.uninit();
    }
}
