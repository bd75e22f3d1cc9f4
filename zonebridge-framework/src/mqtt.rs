//! rumqttc-backed bus client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Packet, QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zonebridge_common::MqttConfig;

use crate::bus::{BusClient, InboundMessage};
use crate::error::BusError;

/// Delay before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 64;

/// Smallest keep-alive accepted by the broker options.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

type Subscriptions = Arc<Mutex<Vec<(String, QoS)>>>;

/// Reconnecting MQTT client.
///
/// [`connect`](BusClient::connect) spawns a task on the current tokio runtime
/// that drives the rumqttc event loop. The task tracks the session state,
/// restores subscriptions after every reconnect, and forwards inbound
/// publishes to a channel drained by [`poll_inbound`](BusClient::poll_inbound).
pub struct MqttBus {
    options: Option<MqttOptions>,
    client: Option<AsyncClient>,
    task: Option<JoinHandle<()>>,
    inbound: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    sessions: Arc<AtomicU64>,
    subscriptions: Subscriptions,
}

impl MqttBus {
    /// Create a client for the configured broker.
    ///
    /// `will_topic` receives the configured will payload if the bridge drops
    /// off without a clean disconnect.
    pub fn new(config: &MqttConfig, client_id: &str, will_topic: &str) -> Self {
        let id = config.client_id.as_deref().unwrap_or(client_id);
        let mut options = MqttOptions::new(id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(
            config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        if config.has_credentials() {
            options.set_credentials(config.user.clone(), config.password.clone());
        }
        options.set_last_will(LastWill::new(
            will_topic,
            config.will.clone().into_bytes(),
            QoS::AtLeastOnce,
            false,
        ));

        Self {
            options: Some(options),
            client: None,
            task: None,
            inbound: None,
            connected: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            sessions: Arc::new(AtomicU64::new(0)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn client(&self) -> Result<&AsyncClient, BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.client.as_ref().ok_or(BusError::NotStarted)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<(String, QoS)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl BusClient for MqttBus {
    fn connect(&mut self) -> Result<(), BusError> {
        if self.options.is_none() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::Client(format!("no tokio runtime: {}", e)))?;
        let Some(options) = self.options.take() else {
            return Ok(());
        };

        tracing::info!(
            broker = %options.broker_address().0,
            port = options.broker_address().1,
            client_id = %options.client_id(),
            "Connecting to MQTT broker"
        );

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = EventLoopDriver {
            client: client.clone(),
            connected: self.connected.clone(),
            stopping: self.stopping.clone(),
            sessions: self.sessions.clone(),
            subscriptions: self.subscriptions.clone(),
            inbound: tx,
        };

        self.task = Some(runtime.spawn(driver.run(eventloop)));
        self.client = Some(client);
        self.inbound = Some(rx);

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        self.client()?
            .try_publish(topic, qos, retain, payload.to_vec())
            .map_err(|e| BusError::Client(e.to_string()))
    }

    fn subscribe(&mut self, pattern: &str, qos: QoS) -> Result<(), BusError> {
        self.client()?
            .try_subscribe(pattern, qos)
            .map_err(|e| BusError::Client(e.to_string()))?;

        let mut subscriptions = self.lock_subscriptions();
        if !subscriptions.iter().any(|(p, _)| p == pattern) {
            subscriptions.push((pattern.to_string(), qos));
        }
        Ok(())
    }

    fn unsubscribe(&mut self, pattern: &str) -> Result<(), BusError> {
        self.lock_subscriptions().retain(|(p, _)| p != pattern);

        self.client()?
            .try_unsubscribe(pattern)
            .map_err(|e| BusError::Client(e.to_string()))
    }

    fn poll_inbound(&mut self) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        if let Some(rx) = self.inbound.as_mut() {
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }
        messages
    }

    fn disconnect(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.as_ref() {
            if let Err(e) = client.try_disconnect() {
                tracing::debug!(error = %e, "MQTT disconnect request failed");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct EventLoopDriver {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    sessions: Arc<AtomicU64>,
    subscriptions: Subscriptions,
    inbound: mpsc::UnboundedSender<InboundMessage>,
}

impl EventLoopDriver {
    async fn run(self, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.on_connected();
                    } else {
                        tracing::warn!(code = ?ack.code, "MQTT broker refused connection");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                    if self.inbound.send(message).is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::warn!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        tracing::debug!("MQTT event loop stopped");
    }

    fn on_connected(&self) {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(session, "Connected to MQTT broker");

        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (pattern, qos) in subscriptions {
            if let Err(e) = self.client.try_subscribe(pattern.as_str(), qos) {
                tracing::warn!(pattern = %pattern, error = %e, "Failed to restore subscription");
            }
        }

        self.connected.store(true, Ordering::SeqCst);
    }
}
