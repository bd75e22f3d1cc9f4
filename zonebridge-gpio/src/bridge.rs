//! Bridge orchestration: connects the zones to the bus.
//!
//! # Topics
//!
//! ```text
//! <name>/version                       version info, on connect
//! <discovery>/device/<name>/config     discovery manifest, retained
//! <discovery>/status                   "online" triggers rediscovery
//! <name>/system/status                 birth payload / "offline"
//! <name>/system/command                "shutdown"
//! <name>/state/<unique_id>             zone level
//! <name>/set/<unique_id>               requested zone level
//! ```

use std::fmt;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};
use zonebridge_common::{Topics, unique_id_from_topic};
use zonebridge_framework::{
    BridgeError, BusClient, QoS, Result, ShutdownHandle, TopicRouter, VersionInfo,
};

use crate::config::{BridgeSection, GpioBridgeConfig};
use crate::discovery::{DeviceIdentity, DiscoveryManifest};
use crate::host::HostInfo;
use crate::manager::ZoneManager;
use crate::zone::Level;

/// Accepted zone command payload.
static LEVEL_PAYLOAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{1,3}$").unwrap());

/// Command on the system command topic that stops the bridge.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

/// Hub status payload that asks for rediscovery.
pub const HUB_ONLINE: &str = "online";

/// Payload published to the system status topic on teardown.
pub const OFFLINE_PAYLOAD: &str = "offline";

/// Connection state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Online,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Disconnected => write!(f, "disconnected"),
            BridgeState::Connecting => write!(f, "connecting"),
            BridgeState::Online => write!(f, "online"),
        }
    }
}

/// State the subscription handlers act on.
pub struct BridgeCore<B> {
    bus: B,
    zones: ZoneManager,
    topics: Topics,
    identity: DeviceIdentity,
    birth: String,
    shutdown: ShutdownHandle,
}

impl<B: BusClient> BridgeCore<B> {
    /// Publish the discovery manifest and the birth payload, then mark every
    /// stale zone for republishing.
    fn autodiscover(&mut self) {
        let manifest = DiscoveryManifest::build(&self.identity, &self.topics, &self.zones);
        let topic = self.topics.device_discovery();

        match self.bus.publish_json(&topic, &manifest, QoS::AtLeastOnce, true) {
            Ok(()) => info!(
                topic = %topic,
                zones = manifest.components.len(),
                "Published discovery manifest"
            ),
            Err(e) => warn!(topic = %topic, error = %e, "Failed to publish discovery manifest"),
        }

        let status = self.topics.system_status();
        if let Err(e) = self.bus.publish_str(&status, &self.birth, QoS::AtLeastOnce, false) {
            warn!(topic = %status, error = %e, "Failed to publish birth message");
        }

        self.zones.refresh(Instant::now());
    }

    fn handle_hub_status(&mut self, payload: &str) {
        if payload == HUB_ONLINE {
            info!("Hub came online, rediscovering");
            self.autodiscover();
        }
    }

    fn handle_system_command(&mut self, command: &str) {
        match command {
            SHUTDOWN_COMMAND => {
                if self.shutdown.request() {
                    info!("Shutdown requested over MQTT");
                }
            }
            other => debug!(command = %other, "Ignoring unknown system command"),
        }
    }

    fn handle_zone_command(&mut self, unique_id: &str, payload: &str) {
        if !LEVEL_PAYLOAD.is_match(payload) {
            debug!(zone = %unique_id, payload = %payload, "Ignoring malformed zone command");
            return;
        }
        let Ok(level) = payload.parse::<Level>() else {
            return;
        };

        match self.zones.get_mut(unique_id) {
            Some(zone) => {
                info!(zone = %unique_id, level, "Zone command");
                zone.set(level);
            }
            None => debug!(zone = %unique_id, "Command for unknown zone"),
        }
    }

    fn publish_changes(&mut self, now: Instant) -> usize {
        let bus = &mut self.bus;
        let topics = &self.topics;
        self.zones.scan_and_publish(now, |unique_id, level| {
            info!(zone = %unique_id, level, "Zone state changed");
            let topic = topics.entity_state(unique_id);
            if let Err(e) = bus.publish_str(&topic, &level.to_string(), QoS::AtLeastOnce, false) {
                warn!(topic = %topic, error = %e, "Failed to publish zone state");
            }
        })
    }
}

/// The zone bridge.
///
/// Lifecycle: [`start`](Self::start) connects and announces the device,
/// [`run`](Self::run) loops until shutdown is requested, then tears down.
pub struct SecuritySystem<B: BusClient + 'static> {
    core: BridgeCore<B>,
    router: TopicRouter<BridgeCore<B>>,
    state: BridgeState,
    settings: BridgeSection,
    version_info: VersionInfo,
    last_session: u64,
    last_refresh: Instant,
    torn_down: bool,
}

impl<B: BusClient + 'static> SecuritySystem<B> {
    pub fn new(
        config: &GpioBridgeConfig,
        bus: B,
        zones: ZoneManager,
        host: &HostInfo,
        driver: &str,
    ) -> Self {
        let settings = config.bridge.clone();
        let version = env!("CARGO_PKG_VERSION");

        let version_info = VersionInfo::new(&settings.name, version)
            .with_metadata("driver", driver)
            .with_metadata("serial", host.serial())
            .with_metadata("zones", zones.len());

        let identity = DeviceIdentity {
            display_name: settings.display_name().to_string(),
            version: version.to_string(),
            hardware_revision: host.hardware_revision().to_string(),
            serial: host.serial().to_string(),
            origin_url: settings.origin_url.clone(),
        };

        Self {
            core: BridgeCore {
                bus,
                zones,
                topics: Topics::with_discovery_prefix(&settings.name, &settings.discovery_prefix),
                identity,
                birth: config.mqtt.birth.clone(),
                shutdown: ShutdownHandle::new(),
            },
            router: TopicRouter::new(),
            state: BridgeState::Disconnected,
            settings,
            version_info,
            last_session: 0,
            last_refresh: Instant::now(),
            torn_down: false,
        }
    }

    /// Use an externally owned shutdown flag (e.g. one a signal listener sets).
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.core.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.core.shutdown.clone()
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn topics(&self) -> &Topics {
        &self.core.topics
    }

    pub fn zones(&self) -> &ZoneManager {
        &self.core.zones
    }

    pub fn version_info(&self) -> &VersionInfo {
        &self.version_info
    }

    /// Connect to the broker and announce the device.
    ///
    /// Waits up to the configured connect timeout. On timeout the bridge
    /// stays disconnected and [`run`](Self::run) refuses to start.
    pub async fn start(&mut self) -> Result<()> {
        if self.state == BridgeState::Online {
            return Ok(());
        }
        self.state = BridgeState::Connecting;
        info!(bridge = %self.settings.name, "Connecting");

        if let Err(e) = self.connect().await {
            self.state = BridgeState::Disconnected;
            error!(error = %e, "Failed to connect to MQTT broker");
            return Err(e);
        }

        if let Err(e) = self.subscribe_all() {
            self.state = BridgeState::Disconnected;
            error!(error = %e, "Failed to subscribe to bridge topics");
            return Err(e);
        }

        let version_topic = self.core.topics.version();
        if let Err(e) =
            self.core.bus.publish_json(&version_topic, &self.version_info, QoS::AtMostOnce, false)
        {
            warn!(topic = %version_topic, error = %e, "Failed to publish version info");
        }

        self.last_session = self.core.bus.sessions();
        self.state = BridgeState::Online;
        info!(bridge = %self.settings.name, zones = self.core.zones.len(), "Bridge online");

        self.core.autodiscover();
        self.last_refresh = Instant::now();
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        self.core.bus.connect()?;

        let timeout = self.settings.connect_timeout();
        let deadline = Instant::now() + timeout;
        while !self.core.bus.is_connected() {
            if Instant::now() >= deadline {
                return Err(BridgeError::ConnectTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.settings.connect_poll()).await;
        }
        Ok(())
    }

    fn subscribe_all(&mut self) -> Result<()> {
        let topics = self.core.topics.clone();

        self.router.subscribe(
            &mut self.core.bus,
            &topics.hub_status(),
            QoS::AtLeastOnce,
            |core: &mut BridgeCore<B>, _topic: &str, payload: &str| core.handle_hub_status(payload),
        )?;

        self.router.subscribe(
            &mut self.core.bus,
            &topics.system_command(),
            QoS::AtLeastOnce,
            |core: &mut BridgeCore<B>, _topic: &str, payload: &str| {
                core.handle_system_command(payload)
            },
        )?;

        self.router.subscribe(
            &mut self.core.bus,
            &topics.entity_command_wildcard(),
            QoS::AtLeastOnce,
            |core: &mut BridgeCore<B>, topic: &str, payload: &str| {
                core.handle_zone_command(unique_id_from_topic(topic), payload)
            },
        )?;

        Ok(())
    }

    /// One run loop iteration: handle inbound messages, rediscover after a
    /// reconnect, publish debounced zone changes and run the periodic refresh.
    ///
    /// Returns the number of zone states published.
    pub fn tick(&mut self, now: Instant) -> usize {
        for message in self.core.bus.poll_inbound() {
            let payload = message.payload_str();
            self.router.dispatch(&mut self.core, &message.topic, &payload);
        }

        let sessions = self.core.bus.sessions();
        if sessions != self.last_session {
            self.last_session = sessions;
            info!(session = sessions, "Reconnected to MQTT broker, rediscovering");
            self.core.autodiscover();
        }

        let published = self.core.publish_changes(now);

        if now.saturating_duration_since(self.last_refresh) > self.settings.auto_refresh() {
            debug!("Periodic state refresh");
            self.core.zones.refresh(now);
            self.last_refresh = now;
        }

        published
    }

    /// Run until shutdown is requested, then tear down.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != BridgeState::Online {
            error!(state = %self.state, "Failed to start bridge runtime");
            return Err(BridgeError::NotOnline);
        }

        let interval = self.settings.loop_interval();
        info!(bridge = %self.settings.name, "Bridge running");

        while !self.core.shutdown.is_requested() {
            self.tick(Instant::now());
            tokio::time::sleep(interval).await;
        }

        info!(bridge = %self.settings.name, "Bridge shutting down");
        self.shutdown();
        Ok(())
    }

    /// Stop the bridge: publish "offline", drop every subscription and
    /// disconnect. Only the first call has any effect.
    pub fn shutdown(&mut self) {
        self.core.shutdown.request();
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.core.bus.is_connected() {
            let status = self.core.topics.system_status();
            if let Err(e) =
                self.core.bus.publish_str(&status, OFFLINE_PAYLOAD, QoS::AtMostOnce, false)
            {
                warn!(topic = %status, error = %e, "Failed to publish offline status");
            }

            for pattern in self.router.patterns() {
                if let Err(e) = self.core.bus.unsubscribe(pattern) {
                    debug!(pattern = %pattern, error = %e, "Failed to unsubscribe");
                }
            }
        }

        self.core.bus.disconnect();
        self.state = BridgeState::Disconnected;
    }
}

impl<B: BusClient + 'static> Drop for SecuritySystem<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
