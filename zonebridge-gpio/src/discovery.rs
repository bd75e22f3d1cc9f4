//! Home Assistant device discovery manifest.
//!
//! One retained document describes the bridge device and every zone as a
//! component, so the hub can create all entities without manual setup.

use std::collections::BTreeMap;

use serde::Serialize;
use zonebridge_common::Topics;

use crate::manager::ZoneManager;
use crate::zone::ZoneMetadata;

/// Software name advertised in the origin block.
pub const ORIGIN_NAME: &str = "zonebridge";

/// Device identity block (`dev`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(rename = "mf")]
    pub manufacturer: String,
    #[serde(rename = "mdl")]
    pub model: String,
    #[serde(rename = "sw")]
    pub sw_version: String,
    #[serde(rename = "hw")]
    pub hw_version: String,
    #[serde(rename = "ids")]
    pub identifiers: Vec<String>,
}

/// Origin block (`o`) naming the bridge software.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginInfo {
    pub name: String,
    #[serde(rename = "sw")]
    pub sw_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// One zone entity: its metadata plus the topics it is reached on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    #[serde(flatten)]
    pub metadata: ZoneMetadata,
    pub state_topic: String,
    pub command_topic: String,
}

/// The full discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryManifest {
    #[serde(rename = "dev")]
    pub device: DeviceInfo,
    #[serde(rename = "o")]
    pub origin: OriginInfo,
    pub availability_topic: String,
    pub qos: u8,
    #[serde(rename = "cmps")]
    pub components: BTreeMap<String, Component>,
}

/// Bridge identity fields that go into the manifest.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    pub display_name: String,
    pub version: String,
    pub hardware_revision: String,
    pub serial: String,
    pub origin_url: String,
}

impl DiscoveryManifest {
    /// Build the manifest from the current zones.
    pub fn build(identity: &DeviceIdentity, topics: &Topics, zones: &ZoneManager) -> Self {
        let components = zones
            .zones()
            .iter()
            .map(|zone| {
                let id = zone.unique_id();
                let component = Component {
                    metadata: zone.metadata().clone(),
                    state_topic: topics.entity_state(id),
                    command_topic: topics.entity_command(id),
                };
                (id.to_string(), component)
            })
            .collect();

        Self {
            device: DeviceInfo {
                name: identity.display_name.clone(),
                manufacturer: String::new(),
                model: String::new(),
                sw_version: identity.version.clone(),
                hw_version: identity.hardware_revision.clone(),
                identifiers: vec![identity.serial.clone()],
            },
            origin: OriginInfo {
                name: ORIGIN_NAME.to_string(),
                sw_version: identity.version.clone(),
                url: identity.origin_url.clone(),
            },
            availability_topic: topics.system_status(),
            qos: 1,
            components,
        }
    }
}
