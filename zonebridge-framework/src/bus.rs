//! Message bus abstraction.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

pub use rumqttc::QoS;

use crate::error::{BridgeError, BusError};

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a new inbound message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text (invalid UTF-8 is replaced).
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Client side of a publish/subscribe message bus.
///
/// Implementations own their network I/O; every method here is non-blocking so
/// a bridge can drive the client from a cooperative run loop.
pub trait BusClient: Send {
    /// Start connecting to the broker. Returns once the attempt is underway.
    fn connect(&mut self) -> Result<(), BusError>;

    /// Whether the client currently holds a broker session.
    fn is_connected(&self) -> bool;

    /// Number of broker sessions established so far.
    ///
    /// Increases on every (re)connect, letting callers detect reconnects.
    fn sessions(&self) -> u64;

    /// Publish a payload.
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError>;

    /// Subscribe to a topic pattern.
    fn subscribe(&mut self, pattern: &str, qos: QoS) -> Result<(), BusError>;

    /// Unsubscribe from a topic pattern.
    fn unsubscribe(&mut self, pattern: &str) -> Result<(), BusError>;

    /// Drain the messages received since the last call.
    fn poll_inbound(&mut self) -> Vec<InboundMessage>;

    /// Close the broker session.
    fn disconnect(&mut self);

    /// Publish a text payload.
    fn publish_str(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        self.publish(topic, payload.as_bytes(), qos, retain)
    }

    /// Publish a value serialized as JSON.
    fn publish_json<T: Serialize>(
        &mut self,
        topic: &str,
        value: &T,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BridgeError>
    where
        Self: Sized,
    {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, &payload, qos, retain)?;
        Ok(())
    }
}

/// A message recorded by [`MemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    /// Payload as text (invalid UTF-8 is replaced).
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[derive(Debug, Default)]
struct MemoryBusState {
    reachable: bool,
    connected: bool,
    sessions: u64,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<String>,
    inbound: VecDeque<InboundMessage>,
    fail_subscriptions: bool,
}

/// In-process bus that records traffic instead of talking to a broker.
///
/// Clones share state, so a test can keep a handle while the bridge owns
/// another. Published messages are recorded, not looped back to subscribers.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<MemoryBusState>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// A bus whose broker accepts the connection.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryBusState {
                reachable: true,
                ..Default::default()
            })),
        }
    }

    /// A bus whose broker never answers.
    pub fn unreachable() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryBusState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message as if the broker delivered it.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.lock()
            .inbound
            .push_back(InboundMessage::new(topic, payload));
    }

    /// Drop the session, as a broker outage would.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }

    /// Re-establish the session after [`drop_connection`](Self::drop_connection).
    pub fn reconnect(&self) {
        let mut state = self.lock();
        state.connected = true;
        state.sessions += 1;
    }

    /// Make subsequent subscribe calls fail.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.lock().fail_subscriptions = fail;
    }

    /// Everything published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Messages published to one topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Forget recorded publishes.
    pub fn clear_published(&self) {
        self.lock().published.clear();
    }

    /// Active subscription patterns.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }
}

impl BusClient for MemoryBus {
    fn connect(&mut self) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.reachable && !state.connected {
            state.connected = true;
            state.sessions += 1;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn sessions(&self) -> u64 {
        self.lock().sessions
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(BusError::NotConnected);
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, pattern: &str, _qos: QoS) -> Result<(), BusError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(BusError::NotConnected);
        }
        if state.fail_subscriptions {
            return Err(BusError::Client(format!("subscribe to {} rejected", pattern)));
        }
        if !state.subscriptions.iter().any(|p| p == pattern) {
            state.subscriptions.push(pattern.to_string());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, pattern: &str) -> Result<(), BusError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(BusError::NotConnected);
        }
        state.subscriptions.retain(|p| p != pattern);
        Ok(())
    }

    fn poll_inbound(&mut self) -> Vec<InboundMessage> {
        let mut state = self.lock();
        if !state.connected {
            return Vec::new();
        }
        state.inbound.drain(..).collect()
    }

    fn disconnect(&mut self) {
        self.lock().connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_requires_connection() {
        let mut bus = MemoryBus::new();
        assert_eq!(
            bus.publish_str("a/b", "1", QoS::AtMostOnce, false),
            Err(BusError::NotConnected)
        );

        bus.connect().unwrap();
        bus.publish_str("a/b", "1", QoS::AtLeastOnce, true).unwrap();

        let published = bus.published_to("a/b");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload_str(), "1");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(published[0].retain);
    }

    #[test]
    fn test_unreachable_broker_never_connects() {
        let mut bus = MemoryBus::unreachable();
        bus.connect().unwrap();
        assert!(!bus.is_connected());
        assert_eq!(bus.sessions(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let mut bus = MemoryBus::new();
        let observer = bus.clone();

        bus.connect().unwrap();
        bus.subscribe("a/+", QoS::AtLeastOnce).unwrap();
        assert_eq!(observer.subscriptions(), vec!["a/+".to_string()]);

        observer.inject("a/x", "hello");
        let inbound = bus.poll_inbound();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].payload_str(), "hello");
        assert!(bus.poll_inbound().is_empty());
    }

    #[test]
    fn test_reconnect_counts_sessions() {
        let mut bus = MemoryBus::new();
        bus.connect().unwrap();
        assert_eq!(bus.sessions(), 1);

        bus.drop_connection();
        assert!(!bus.is_connected());
        bus.reconnect();
        assert!(bus.is_connected());
        assert_eq!(bus.sessions(), 2);
    }

    #[test]
    fn test_publish_json() {
        let mut bus = MemoryBus::new();
        bus.connect().unwrap();
        bus.publish_json("a/json", &serde_json::json!({ "zones": 3 }), QoS::AtMostOnce, false)
            .unwrap();

        let published = bus.published_to("a/json");
        let value: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(value["zones"], 3);
    }
}
