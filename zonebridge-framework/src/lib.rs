//! zonebridge Bridge Framework
//!
//! Common abstractions for building bridges that expose local devices over MQTT.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BusClient`] trait over the message bus, with [`MqttBus`] (rumqttc) and
//!   [`MemoryBus`] (in-process, for tests) implementations
//! - [`TopicRouter`] for dispatching inbound messages to subscription handlers
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`ShutdownHandle`] and [`spawn_signal_listener`] for cooperative shutdown
//! - [`VersionInfo`] for the version/capability document published on connect
//!
//! # Example
//!
//! ```ignore
//! use zonebridge_framework::{BridgeArgs, BridgeConfig, MqttBus, TopicRouter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut bus = MqttBus::new(config.mqtt(), config.bridge_name(), "mybridge/status");
//!     bus.connect()?;
//!
//!     let mut router = TopicRouter::new();
//!     router.subscribe(&mut bus, "mybridge/set/+", QoS::AtLeastOnce, |ctx, topic, payload| {
//!         // handle command
//!     })?;
//!     Ok(())
//! }
//! ```

mod args;
mod bus;
mod config;
mod error;
mod mqtt;
mod router;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use bus::{BusClient, InboundMessage, MemoryBus, PublishedMessage, QoS};
pub use config::{BridgeConfig, validate_common};
pub use error::{BridgeError, BusError, Result};
pub use mqtt::MqttBus;
pub use router::{Handler, TopicRouter};
pub use runner::{ShutdownHandle, init_logging, spawn_signal_listener};
pub use status::VersionInfo;

// Re-export commonly used types from zonebridge-common
pub use zonebridge_common::{LogFormat, LoggingConfig, MqttConfig, Topics};
