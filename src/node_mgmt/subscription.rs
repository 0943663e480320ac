use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::plugin::message::DataMessage;

/// Binding that causes a driver group's data to be delivered to an app
/// node. At most one subscription exists per (app, driver, group) triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub app: String,
    pub driver: String,
    pub group: String,
}

/// Maps (driver, group) pairs to subscribed app nodes and delivers fan-out
/// payloads into the apps' inboxes.
#[derive(Default)]
pub struct SubscriptionRouter {
    subs: Vec<Subscription>,
    inboxes: AHashMap<String, flume::Sender<DataMessage>>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        SubscriptionRouter::default()
    }

    /// Register the inbox of an app node. Payloads fanned out to the app
    /// are sent through this channel.
    pub fn register_app(&mut self, app: &str, tx: flume::Sender<DataMessage>) {
        self.inboxes.insert(app.to_string(), tx);
    }

    /// Idempotent: returns false when the subscription already existed.
    pub fn subscribe(&mut self, app: &str, driver: &str, group: &str) -> bool {
        let sub = Subscription {
            app: app.to_string(),
            driver: driver.to_string(),
            group: group.to_string(),
        };
        if self.subs.contains(&sub) {
            return false;
        }
        self.subs.push(sub);
        true
    }

    /// No-op when the subscription is absent; returns whether anything was
    /// removed.
    pub fn unsubscribe(&mut self, app: &str, driver: &str, group: &str) -> bool {
        let before = self.subs.len();
        self.subs
            .retain(|s| !(s.app == app && s.driver == driver && s.group == group));
        self.subs.len() != before
    }

    /// Drop every subscription mentioning the node as app or driver, along
    /// with its inbox registration. Returns the removed subscriptions.
    pub fn remove_node(&mut self, name: &str) -> Vec<Subscription> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .subs
            .drain(..)
            .partition(|s| s.app == name || s.driver == name);
        self.subs = kept;
        self.inboxes.remove(name);
        removed
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subs
    }

    /// Deliver the payload to every app subscribed to (driver, group);
    /// each subscribed app receives exactly one copy. Returns the number
    /// of deliveries.
    pub fn fanout(&self, driver: &str, group: &str, payload: &DataMessage) -> usize {
        let mut delivered = 0;
        for sub in self
            .subs
            .iter()
            .filter(|s| s.driver == driver && s.group == group)
        {
            match self.inboxes.get(&sub.app) {
                Some(tx) => match tx.send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => log::warn!("Inbox of app '{}' is gone; dropping payload", sub.app),
                },
                None => log::warn!("App '{}' has no registered inbox", sub.app),
            }
        }
        delivered
    }
}
