//! Publish/subscribe transport.
//!
//! Each location owns one topic (named after it) and one subscription
//! (`<name>-sub`). `send` publishes to the destination's topic and waits for
//! the broker to acknowledge the publish. `receive` pulls from the
//! subscription, acknowledges the first message whose `from` attribute
//! matches, and leaves every other message unacknowledged for later calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::location::Location;
use crate::payload::Payload;
use crate::transport::Transport;

/// Attribute carrying the sending location.
pub const FROM_ATTRIBUTE: &str = "from";
/// Attribute carrying the destination location.
pub const TO_ATTRIBUTE: &str = "to";

/// A message as stored by a broker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

impl BrokerMessage {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// An unacknowledged message handed out by [`Broker::pull`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub ack_id: u64,
    pub message_id: String,
    pub message: BrokerMessage,
}

/// Minimal topic/subscription broker.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn create_topic(&self, topic: &str) -> TransportResult<()>;

    /// Attach `subscription` to `topic`; later publishes are copied into it.
    async fn create_subscription(&self, topic: &str, subscription: &str) -> TransportResult<()>;

    /// Publish and wait for the broker to accept the message. Returns its id.
    async fn publish(&self, topic: &str, message: BrokerMessage) -> TransportResult<String>;

    /// Wait for the oldest unacknowledged delivery whose ack id is after
    /// `cursor` (or the oldest overall when `cursor` is `None`).
    ///
    /// Several pulls may wait on one subscription at once; every one of them
    /// must see a later publish.
    async fn pull(&self, subscription: &str, cursor: Option<u64>) -> TransportResult<Delivery>;

    /// Remove a delivery from its subscription for good.
    async fn ack(&self, subscription: &str, ack_id: u64) -> TransportResult<()>;

    /// Stop handing out deliveries; pending pulls fail with `Closed`.
    async fn shutdown(&self) -> TransportResult<()> {
        Ok(())
    }
}

/// Outstanding messages of one subscription, keyed by ack id.
#[derive(Default)]
struct SubscriptionQueue {
    pending: Mutex<BTreeMap<u64, (String, BrokerMessage)>>,
    notify: Notify,
}

impl SubscriptionQueue {
    fn first_after(&self, cursor: Option<u64>) -> Option<Delivery> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match cursor {
            Some(cursor) => pending.range(cursor + 1..).next(),
            None => pending.iter().next(),
        };
        next.map(|(ack_id, (message_id, message))| Delivery {
            ack_id: *ack_id,
            message_id: message_id.clone(),
            message: message.clone(),
        })
    }
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, Arc<SubscriptionQueue>>,
    next_ack_id: u64,
}

/// In-process broker with at-least-once subscriptions.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, subscription: &str) -> TransportResult<Arc<SubscriptionQueue>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .subscriptions
            .get(subscription)
            .cloned()
            .ok_or_else(|| TransportError::Broker(format!("subscription {subscription} not found")))
    }

    /// Messages published to `subscription` and not yet acknowledged.
    pub fn outstanding(&self, subscription: &str) -> usize {
        self.queue(subscription)
            .map(|queue| {
                queue
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn create_topic(&self, topic: &str) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn create_subscription(&self, topic: &str, subscription: &str) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let subscribers = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| TransportError::Broker(format!("topic {topic} not found")))?;
        if !subscribers.iter().any(|s| s == subscription) {
            subscribers.push(subscription.to_string());
        }
        state.subscriptions.entry(subscription.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, topic: &str, message: BrokerMessage) -> TransportResult<String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let message_id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let subscribers = state
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| TransportError::Broker(format!("topic {topic} not found")))?;
        for subscription in subscribers {
            state.next_ack_id += 1;
            let ack_id = state.next_ack_id;
            if let Some(queue) = state.subscriptions.get(&subscription) {
                queue
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(ack_id, (message_id.clone(), message.clone()));
                queue.notify.notify_waiters();
            }
        }
        Ok(message_id)
    }

    async fn pull(&self, subscription: &str, cursor: Option<u64>) -> TransportResult<Delivery> {
        let queue = self.queue(subscription)?;
        loop {
            // Register before checking, so a publish in between still wakes us.
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            if let Some(delivery) = queue.first_after(cursor) {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&self, subscription: &str, ack_id: u64) -> TransportResult<()> {
        let queue = self.queue(subscription)?;
        let removed = queue
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ack_id);
        match removed {
            Some(_) => Ok(()),
            None => Err(TransportError::Broker(format!(
                "ack id {ack_id} not outstanding on {subscription}"
            ))),
        }
    }

    async fn shutdown(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for queue in state.subscriptions.values() {
            queue.notify.notify_waiters();
        }
        Ok(())
    }
}

/// Transport mapping each location onto a topic and a subscription.
pub struct PubSubTransport<B> {
    broker: Arc<B>,
    locations: Vec<Location>,
}

impl<B: Broker> PubSubTransport<B> {
    /// Create the topic and subscription of every location on `broker`.
    #[instrument(skip_all)]
    pub async fn connect(
        broker: Arc<B>,
        locations: impl IntoIterator<Item = Location>,
    ) -> TransportResult<Self> {
        let mut unique: Vec<Location> = Vec::new();
        for location in locations {
            if !unique.contains(&location) {
                unique.push(location);
            }
        }
        for location in &unique {
            broker.create_topic(location.name()).await?;
            broker
                .create_subscription(location.name(), &subscription_name(location))
                .await?;
        }
        debug!(count = unique.len(), "pub/sub topics ready");
        Ok(Self {
            broker,
            locations: unique,
        })
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    fn ensure_known(&self, location: &Location) -> TransportResult<()> {
        if self.locations.contains(location) {
            Ok(())
        } else {
            Err(TransportError::UnknownLocation(location.to_string()))
        }
    }
}

/// Subscription consumed by `location`.
pub fn subscription_name(location: &Location) -> String {
    format!("{}-sub", location.name())
}

#[async_trait]
impl<B: Broker> Transport for PubSubTransport<B> {
    #[instrument(skip_all, fields(%from, %to))]
    async fn send(&self, from: &Location, to: &Location, payload: Payload) -> TransportResult<()> {
        self.ensure_known(to)?;
        let message = BrokerMessage {
            data: serde_json::to_vec(&payload)?,
            attributes: BTreeMap::from([
                (FROM_ATTRIBUTE.to_string(), from.name().to_string()),
                (TO_ATTRIBUTE.to_string(), to.name().to_string()),
            ]),
        };
        let message_id = self.broker.publish(to.name(), message).await?;
        debug!(%message_id, "published");
        Ok(())
    }

    #[instrument(skip_all, fields(%from, %at))]
    async fn receive(&self, from: &Location, at: &Location) -> TransportResult<Payload> {
        self.ensure_known(at)?;
        let subscription = subscription_name(at);
        let mut cursor = None;
        loop {
            let delivery = self.broker.pull(&subscription, cursor).await?;
            if delivery.message.attribute(FROM_ATTRIBUTE) == Some(from.name()) {
                self.broker.ack(&subscription, delivery.ack_id).await?;
                debug!(message_id = %delivery.message_id, "received");
                return Ok(serde_json::from_slice(&delivery.message.data)?);
            }
            trace!(message_id = %delivery.message_id, "skipping message from another sender");
            cursor = Some(delivery.ack_id);
        }
    }

    fn locations(&self) -> &[Location] {
        &self.locations
    }

    async fn close(&self) -> TransportResult<()> {
        self.broker.shutdown().await
    }
}
