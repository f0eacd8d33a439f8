use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::value::RawValue;
use tokio::sync::broadcast;
use tracing::debug;

use crate::broker::message::Message;
use crate::utils::error::BrokerError;

pub type SubscriberId = String;

/// Receiving half of one subscription.
pub type DataChannel = broadcast::Receiver<Message>;

/// Something messages can be published through.
pub trait Publisher: Send + Sync {
    fn publish(&self, source: &str, topic: &str, data: Box<RawValue>);
}

/// Something subscriptions can be opened on and closed against.
pub trait Subscriber: Send + Sync {
    fn subscribe(&self, id: &str, topic: &str) -> Result<DataChannel, BrokerError>;
    fn unsubscribe(&self, id: &str, topic: &str);
}

/// The pub/sub engine.
///
/// Keeps one delivery channel per `(topic, subscriber id)` pair. A single
/// `cap` bounds both the number of distinct topics and the number of
/// subscribers per topic, purely as a denial-of-service guard.
///
/// Subscribe and unsubscribe take the registry write lock; publish takes the
/// read lock, so concurrent publishes proceed in parallel but never observe a
/// half-removed subscriber. Delivery channels are bounded: a subscriber that
/// stops draining lags and loses the oldest buffered messages rather than
/// blocking publishers.
pub struct PubSub {
    subs: RwLock<HashMap<String, HashMap<SubscriberId, broadcast::Sender<Message>>>>,
    cap: usize,
    queue_depth: usize,
}

impl PubSub {
    /// Creates an engine allowing at most `cap` topics and `cap` subscribers
    /// per topic, with `queue_depth` messages buffered per subscription.
    pub fn new(cap: usize, queue_depth: usize) -> Self {
        Self {
            subs: RwLock::new(HashMap::new()),
            cap,
            queue_depth: queue_depth.max(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn topic_count(&self) -> usize {
        self.subs.read().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, topic: &str) -> usize {
        self.subs
            .read()
            .unwrap()
            .get(topic)
            .map_or(0, |subs| subs.len())
    }
}

impl Subscriber for PubSub {
    /// Opens a subscription and returns its channel.
    ///
    /// Re-subscribing an existing `(topic, id)` pair returns another receiver
    /// on the existing channel and does not count against capacity. A failed
    /// subscribe leaves the registry untouched.
    fn subscribe(&self, id: &str, topic: &str) -> Result<DataChannel, BrokerError> {
        let mut subs = self.subs.write().unwrap();
        if let Some(topic_subs) = subs.get(topic) {
            if let Some(tx) = topic_subs.get(id) {
                return Ok(tx.subscribe());
            }
            if topic_subs.len() >= self.cap {
                return Err(BrokerError::SubscriberCapacity);
            }
        } else if subs.len() >= self.cap {
            return Err(BrokerError::TopicCapacity);
        }
        let (tx, rx) = broadcast::channel(self.queue_depth);
        subs.entry(topic.to_string())
            .or_default()
            .insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Closes a subscription. Unknown pairs are a no-op. The topic entry is
    /// removed as soon as its last subscriber leaves.
    fn unsubscribe(&self, id: &str, topic: &str) {
        let mut subs = self.subs.write().unwrap();
        if let Some(topic_subs) = subs.get_mut(topic) {
            // dropping the sender closes the channel for anything still draining it
            topic_subs.remove(id);
            if topic_subs.is_empty() {
                subs.remove(topic);
            }
        }
    }
}

impl Publisher for PubSub {
    /// Delivers a copy of the message to every current subscriber of `topic`.
    /// A topic with no subscribers is a silent no-op, not an error.
    fn publish(&self, source: &str, topic: &str, data: Box<RawValue>) {
        let subs = self.subs.read().unwrap();
        let Some(topic_subs) = subs.get(topic) else {
            debug!(topic, "publish to topic without subscribers");
            return;
        };
        let msg = Message::new(source, topic, data);
        for (id, tx) in topic_subs {
            if tx.send(msg.clone()).is_err() {
                // receiver was dropped without unsubscribing
                debug!(subscriber = %id, topic, "subscriber channel has no receivers");
            }
        }
    }
}
