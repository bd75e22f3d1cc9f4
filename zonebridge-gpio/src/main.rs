//! MQTT bridge for GPIO alarm zones.
//!
//! Watches the configured zones, publishes their debounced state over MQTT and
//! announces them to Home Assistant through device discovery.

use anyhow::{Context, Result};
use tracing::info;
use zonebridge_framework::{
    BridgeArgs, BridgeConfig, BridgeError, MqttBus, ShutdownHandle, Topics, init_logging,
    spawn_signal_listener,
};
use zonebridge_gpio::config::{DriverKind, GpioBridgeConfig};
use zonebridge_gpio::host::HostInfo;
use zonebridge_gpio::pin::{PinDriver, SimulatedPinDriver, SysfsPinDriver};
use zonebridge_gpio::{SecuritySystem, ZoneManager};

const DEFAULT_CONFIG: &str = "zonebridge.json5";

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default(DEFAULT_CONFIG);

    let config = GpioBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    init_logging(config.logging(), Some(&args)).context("Failed to init tracing")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting zonebridge-gpio");
    info!(config = ?args.config, "Loaded configuration");

    let driver = build_driver(&config)?;
    let zones = ZoneManager::load(&config.zones, driver.as_ref());

    let host = HostInfo::detect();
    let will_topic = Topics::new(&config.bridge.name).system_status();
    let bus = MqttBus::new(&config.mqtt, &config.bridge.name, &will_topic);

    let shutdown = ShutdownHandle::new();
    spawn_signal_listener(shutdown.clone());

    let mut system =
        SecuritySystem::new(&config, bus, zones, &host, driver.name()).with_shutdown(shutdown);

    if let Err(e) = system.start().await {
        let reason = match &e {
            BridgeError::ConnectTimeout { .. } => format!(
                "Could not reach the MQTT broker at {}:{}",
                config.mqtt.host, config.mqtt.port
            ),
            _ => "Bridge failed to come online".to_string(),
        };
        return Err(anyhow::Error::new(e).context(reason));
    }

    system.run().await.context("Bridge run loop failed")?;
    info!("zonebridge-gpio stopped");
    Ok(())
}

fn build_driver(config: &GpioBridgeConfig) -> Result<Box<dyn PinDriver>> {
    let driver: Box<dyn PinDriver> = match config.bridge.driver {
        DriverKind::Sysfs => Box::new(
            SysfsPinDriver::new(&config.bridge.gpio_base)
                .map_err(|e| BridgeError::hardware(e.to_string()))
                .context("Failed to initialize GPIO")?,
        ),
        DriverKind::Simulated => Box::new(SimulatedPinDriver::new()),
    };
    info!(driver = driver.name(), "GPIO driver ready");
    Ok(driver)
}
