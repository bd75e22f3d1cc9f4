//! End-to-end bridge tests against an in-memory bus and simulated GPIO.

use std::time::{Duration, Instant};

use zonebridge_framework::{BridgeConfig, BridgeError, MemoryBus, QoS};
use zonebridge_gpio::config::GpioBridgeConfig;
use zonebridge_gpio::host::HostInfo;
use zonebridge_gpio::pin::SimulatedPinDriver;
use zonebridge_gpio::{BridgeState, SecuritySystem, ZoneManager};

const ZONES: &str = r#"[
    { name: "Front Door", zone_type: "gpio_digital", io: "input", pin: 17, device_class: "door" },
    { name: "Garage Relay", zone_type: "gpio_digital", io: "output", pin: 22 },
    { name: "Siren", zone_type: "virtual", io: "output", icon: "mdi:alarm-bell" },
]"#;

fn config(zones: &str, auto_refresh_secs: u64) -> GpioBridgeConfig {
    let json = format!(
        r#"{{
            mqtt: {{ host: "localhost", birth: "online" }},
            bridge: {{
                name: "adtcs",
                runtime_name: "ADT Security",
                driver: "simulated",
                auto_refresh_secs: {},
                connect_timeout_ms: 50,
                connect_poll_ms: 10,
                loop_interval_ms: 5,
            }},
            zones: {},
        }}"#,
        auto_refresh_secs, zones
    );
    GpioBridgeConfig::parse(&json).unwrap()
}

struct Harness {
    system: SecuritySystem<MemoryBus>,
    bus: MemoryBus,
    driver: SimulatedPinDriver,
}

fn harness_with(bus: MemoryBus, zones: &str, auto_refresh_secs: u64) -> Harness {
    let config = config(zones, auto_refresh_secs);
    let driver = SimulatedPinDriver::new();
    let manager = ZoneManager::load(&config.zones, &driver);
    let host = HostInfo::from_cpuinfo("CPU revision\t: 4\nSerial\t\t: 00000000deadbeef\n");

    let system = SecuritySystem::new(&config, bus.clone(), manager, &host, "simulated");
    Harness {
        system,
        bus,
        driver,
    }
}

fn harness() -> Harness {
    harness_with(MemoryBus::new(), ZONES, 300)
}

/// Start the bridge and flush the initial state snapshot.
async fn online(h: &mut Harness) -> Instant {
    h.system.start().await.unwrap();
    let t0 = Instant::now();
    assert_eq!(h.system.tick(t0), 3);
    h.bus.clear_published();
    t0
}

fn state_payloads(bus: &MemoryBus, unique_id: &str) -> Vec<String> {
    bus.published_to(&format!("adtcs/state/{}", unique_id))
        .iter()
        .map(|m| m.payload_str().into_owned())
        .collect()
}

#[tokio::test]
async fn test_start_announces_bridge() {
    let mut h = harness();
    h.system.start().await.unwrap();

    assert_eq!(h.system.state(), BridgeState::Online);

    let published = h.bus.published();
    let topics: Vec<_> = published.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "adtcs/version",
            "homeassistant/device/adtcs/config",
            "adtcs/system/status",
        ]
    );

    let version: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(version["bridge"], "adtcs");
    assert_eq!(version["zones"], 3);
    assert_eq!(version["driver"], "simulated");
    assert_eq!(published[0].qos, QoS::AtMostOnce);

    assert!(published[1].retain);
    assert_eq!(published[1].qos, QoS::AtLeastOnce);
    assert_eq!(published[2].payload_str(), "online");

    assert_eq!(
        h.bus.subscriptions(),
        vec![
            "homeassistant/status".to_string(),
            "adtcs/system/command".to_string(),
            "adtcs/set/+".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_initial_snapshot_published() {
    let mut h = harness();
    h.system.start().await.unwrap();
    h.system.tick(Instant::now());

    assert_eq!(state_payloads(&h.bus, "FrontDoor"), vec!["0"]);
    assert_eq!(state_payloads(&h.bus, "GarageRelay"), vec!["0"]);
    assert_eq!(state_payloads(&h.bus, "Siren"), vec!["0"]);

    let state = &h.bus.published_to("adtcs/state/FrontDoor")[0];
    assert_eq!(state.qos, QoS::AtLeastOnce);
    assert!(!state.retain);
}

#[tokio::test]
async fn test_manifest_lists_every_loaded_zone() {
    let zones = r#"[
        { name: "Front Door", zone_type: "gpio_digital", pin: 17 },
        { name: "", zone_type: "gpio_digital", pin: 18 },
        { name: "Laser", zone_type: "laser", pin: 19 },
        { name: "Typo", zone_type: 5 },
        { name: "Porch", zone_type: "gpio_digital", pin: "4" },
        { name: "No Pin", zone_type: "gpio_digital" },
        { name: "Back Door", zone_type: "gpio_digital", pin: 27 },
        { name: "Siren", zone_type: "virtual", io: "output" },
    ]"#;
    let mut h = harness_with(MemoryBus::new(), zones, 300);
    h.system.start().await.unwrap();

    let manifest = &h.bus.published_to("homeassistant/device/adtcs/config")[0];
    let json: serde_json::Value = serde_json::from_slice(&manifest.payload).unwrap();

    assert_eq!(json["dev"]["name"], "ADT Security");
    assert_eq!(json["dev"]["hw"], "4");
    assert_eq!(json["dev"]["ids"][0].as_str().unwrap().len(), 64);
    assert_eq!(json["availability_topic"], "adtcs/system/status");

    let cmps = json["cmps"].as_object().unwrap();
    let mut ids: Vec<_> = cmps.keys().cloned().collect();
    ids.sort();
    assert_eq!(ids, vec!["BackDoor", "FrontDoor", "Siren"]);

    for (id, cmp) in cmps {
        assert_eq!(cmp["state_topic"], format!("adtcs/state/{}", id));
        assert_eq!(cmp["command_topic"], format!("adtcs/set/{}", id));
    }
    assert_eq!(cmps["Siren"]["p"], "switch");
    assert_eq!(cmps["FrontDoor"]["p"], "binary_sensor");
}

#[tokio::test]
async fn test_debounce_burst_publishes_once() {
    let mut h = harness();
    online(&mut h).await;

    for level in [1, 0, 1, 0, 1] {
        h.driver.drive(17, level);
    }
    let burst_end = Instant::now();

    assert_eq!(h.system.tick(burst_end), 0);
    assert_eq!(h.system.tick(burst_end + Duration::from_millis(50)), 0);
    assert_eq!(h.system.tick(burst_end + Duration::from_millis(150)), 1);
    assert_eq!(h.system.tick(burst_end + Duration::from_millis(300)), 0);

    assert_eq!(state_payloads(&h.bus, "FrontDoor"), vec!["1"]);
}

#[tokio::test]
async fn test_periodic_refresh_republishes_unchanged_state() {
    let mut h = harness_with(MemoryBus::new(), ZONES, 1);
    let t0 = online(&mut h).await;

    assert_eq!(h.system.tick(t0 + Duration::from_millis(500)), 0);

    // the refresh runs after the scan, the republish happens on the next pass
    let later = t0 + Duration::from_millis(1500);
    assert_eq!(h.system.tick(later), 0);
    assert_eq!(h.system.tick(later), 3);

    assert_eq!(state_payloads(&h.bus, "FrontDoor"), vec!["0"]);
}

#[tokio::test]
async fn test_command_round_trip() {
    let mut h = harness();
    let t0 = online(&mut h).await;

    h.bus.inject("adtcs/set/GarageRelay", "1");
    h.system.tick(t0);
    assert_eq!(h.driver.level(22), Some(1));

    h.system.tick(Instant::now() + Duration::from_millis(150));
    h.system.tick(Instant::now() + Duration::from_millis(300));

    assert_eq!(state_payloads(&h.bus, "GarageRelay"), vec!["1"]);
    assert!(state_payloads(&h.bus, "FrontDoor").is_empty());
}

#[tokio::test]
async fn test_out_of_range_level_leaves_hardware_output() {
    let mut h = harness();
    online(&mut h).await;

    h.bus.inject("adtcs/set/GarageRelay", "5");
    h.system.tick(Instant::now());
    h.system.tick(Instant::now() + Duration::from_millis(150));

    let relay = h.system.zones().get("GarageRelay").unwrap();
    assert_eq!(relay.level(), 0);
    assert_eq!(relay.get(), 0);
    assert_eq!(h.driver.level(22), Some(0));
    assert!(state_payloads(&h.bus, "GarageRelay").is_empty());
}

#[tokio::test]
async fn test_virtual_zone_command() {
    let mut h = harness();
    online(&mut h).await;

    h.bus.inject("adtcs/set/Siren", "1");
    h.system.tick(Instant::now());
    h.system.tick(Instant::now() + Duration::from_millis(150));

    assert_eq!(state_payloads(&h.bus, "Siren"), vec!["1"]);
    assert_eq!(h.system.zones().get("Siren").unwrap().level(), 1);
}

#[tokio::test]
async fn test_failed_write_keeps_state() {
    let mut h = harness();
    online(&mut h).await;
    h.driver.fail_writes(22, true);

    h.bus.inject("adtcs/set/GarageRelay", "1");
    h.system.tick(Instant::now());
    h.system.tick(Instant::now() + Duration::from_millis(150));

    assert_eq!(h.driver.level(22), Some(0));
    assert_eq!(h.system.zones().get("GarageRelay").unwrap().level(), 0);
    assert!(state_payloads(&h.bus, "GarageRelay").is_empty());
}

#[tokio::test]
async fn test_malformed_commands_ignored() {
    let mut h = harness();
    online(&mut h).await;

    for payload in ["abc", "1000", "-1", "", "1.0"] {
        h.bus.inject("adtcs/set/GarageRelay", payload);
    }
    h.bus.inject("adtcs/set/FrontDoor", "1");
    h.bus.inject("adtcs/set/Unknown", "1");
    h.system.tick(Instant::now());
    h.system.tick(Instant::now() + Duration::from_millis(150));

    assert_eq!(h.driver.level(22), Some(0));
    assert_eq!(h.system.zones().get("FrontDoor").unwrap().level(), 0);
    assert!(h.bus.published().is_empty());
}

#[tokio::test]
async fn test_hub_online_triggers_rediscovery() {
    let mut h = harness();
    online(&mut h).await;

    h.bus.inject("homeassistant/status", "offline");
    h.system.tick(Instant::now());
    assert!(h.bus.published().is_empty());

    h.bus.inject("homeassistant/status", "online");
    h.system.tick(Instant::now());

    assert_eq!(
        h.bus.published_to("homeassistant/device/adtcs/config").len(),
        1
    );
    assert_eq!(h.bus.published_to("adtcs/system/status").len(), 1);
}

#[tokio::test]
async fn test_reconnect_triggers_rediscovery() {
    let mut h = harness();
    online(&mut h).await;

    h.bus.drop_connection();
    h.bus.reconnect();
    h.system.tick(Instant::now());

    assert_eq!(
        h.bus.published_to("homeassistant/device/adtcs/config").len(),
        1
    );
}

#[tokio::test]
async fn test_shutdown_command_stops_run_loop() {
    let mut h = harness();
    online(&mut h).await;

    h.bus.inject("adtcs/system/command", "reboot");
    h.system.tick(Instant::now());
    assert!(!h.system.shutdown_handle().is_requested());

    h.bus.inject("adtcs/system/command", "shutdown");
    h.system.tick(Instant::now());
    assert!(h.system.shutdown_handle().is_requested());

    tokio::time::timeout(Duration::from_secs(1), h.system.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.system.state(), BridgeState::Disconnected);
    assert!(h.bus.subscriptions().is_empty());
    assert!(!zonebridge_framework::BusClient::is_connected(&h.bus));
}

#[tokio::test]
async fn test_external_shutdown_ends_running_loop() {
    let mut h = harness();
    h.system.start().await.unwrap();
    let handle = h.system.shutdown_handle();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.request();
    });

    tokio::time::timeout(Duration::from_secs(1), h.system.run())
        .await
        .unwrap()
        .unwrap();
    stopper.await.unwrap();

    // the loop ran long enough to publish the initial snapshot
    assert_eq!(state_payloads(&h.bus, "FrontDoor"), vec!["0"]);
    assert_eq!(h.bus.published_to("adtcs/system/status").len(), 2);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let mut h = harness();
    online(&mut h).await;

    h.system.shutdown();
    h.system.shutdown();
    let bus = h.bus.clone();
    drop(h);

    let offline: Vec<_> = bus
        .published_to("adtcs/system/status")
        .into_iter()
        .filter(|m| m.payload_str() == "offline")
        .collect();
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].qos, QoS::AtMostOnce);
}

#[tokio::test]
async fn test_connect_timeout_keeps_bridge_offline() {
    let mut h = harness_with(MemoryBus::unreachable(), ZONES, 300);

    let result = h.system.start().await;
    assert!(matches!(
        result,
        Err(BridgeError::ConnectTimeout { timeout_ms: 50 })
    ));
    assert_eq!(h.system.state(), BridgeState::Disconnected);

    assert!(matches!(h.system.run().await, Err(BridgeError::NotOnline)));
    assert!(h.bus.published().is_empty());
    assert!(h.bus.subscriptions().is_empty());
}
