//! Configuration for the GPIO zone bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zonebridge_common::{DISCOVERY_PREFIX, LoggingConfig, MqttConfig};
use zonebridge_framework::{BridgeConfig, BridgeError, validate_common};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioBridgeConfig {
    /// MQTT broker settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Bridge identity and timing
    pub bridge: BridgeSection,

    /// Zones to expose, in order. Entries stay raw until the zones load, so a
    /// mistyped entry only fails itself.
    #[serde(default)]
    pub zones: Vec<serde_json::Value>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bridge identity and timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    /// Name every topic is rooted at (e.g. "adtcs")
    pub name: String,

    /// Display name of the device shown by the hub
    #[serde(default)]
    pub runtime_name: String,

    /// Interval between forced full-state republishes
    #[serde(default = "default_auto_refresh_secs")]
    pub auto_refresh_secs: u64,

    /// Pin driver backing hardware zones
    #[serde(default)]
    pub driver: DriverKind,

    /// Root of the sysfs GPIO interface
    #[serde(default = "default_gpio_base")]
    pub gpio_base: String,

    /// Discovery prefix the hub listens on
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// How long to wait for the broker on startup
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Poll interval while waiting for the broker
    #[serde(default = "default_connect_poll_ms")]
    pub connect_poll_ms: u64,

    /// Sleep between run loop iterations
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,

    /// Reference URL advertised in the discovery origin block
    #[serde(default)]
    pub origin_url: String,
}

fn default_auto_refresh_secs() -> u64 {
    300
}

fn default_gpio_base() -> String {
    "/sys/class/gpio".to_string()
}

fn default_discovery_prefix() -> String {
    DISCOVERY_PREFIX.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_connect_poll_ms() -> u64 {
    100
}

fn default_loop_interval_ms() -> u64 {
    80
}

impl BridgeSection {
    /// Section with the given name and every other field defaulted.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime_name: String::new(),
            auto_refresh_secs: default_auto_refresh_secs(),
            driver: DriverKind::default(),
            gpio_base: default_gpio_base(),
            discovery_prefix: default_discovery_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_poll_ms: default_connect_poll_ms(),
            loop_interval_ms: default_loop_interval_ms(),
            origin_url: String::new(),
        }
    }

    /// Device display name, falling back to the bridge name.
    pub fn display_name(&self) -> &str {
        if self.runtime_name.is_empty() {
            &self.name
        } else {
            &self.runtime_name
        }
    }

    pub fn auto_refresh(&self) -> Duration {
        Duration::from_secs(self.auto_refresh_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_poll(&self) -> Duration {
        Duration::from_millis(self.connect_poll_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

/// Pin driver selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Linux sysfs GPIO interface
    #[default]
    Sysfs,
    /// In-memory lines, for development without hardware
    Simulated,
}

/// One configured zone.
///
/// Missing fields are reported by the zone loader, not by deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneEntry {
    /// Display name, source of the unique id
    pub name: Option<String>,

    /// Zone kind: "gpio_digital" or "virtual"
    pub zone_type: Option<String>,

    /// "input" (default) or "output"
    pub io: Option<String>,

    /// Line number, required for "gpio_digital"
    pub pin: Option<i64>,

    /// "pullup", "pulldown" or "off" (default)
    pub pullmode: Option<String>,

    /// Swap the on/off payloads
    pub invert: Option<bool>,

    pub device_class: Option<String>,

    pub icon: Option<String>,
}

impl ZoneEntry {
    /// Decode one raw `zones` element.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

impl BridgeConfig for GpioBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn bridge_name(&self) -> &str {
        &self.bridge.name
    }

    fn validate(&self) -> zonebridge_framework::Result<()> {
        validate_common(self)?;

        if self.bridge.auto_refresh_secs == 0 {
            return Err(BridgeError::validation(
                "bridge.auto_refresh_secs must be greater than 0",
            ));
        }

        if self.bridge.connect_poll_ms == 0 {
            return Err(BridgeError::validation(
                "bridge.connect_poll_ms must be greater than 0",
            ));
        }

        if self.zones.is_empty() {
            tracing::warn!("No zones are configured");
        }

        Ok(())
    }
}
