//! Bridge version/capability document.

use serde::{Deserialize, Serialize};

/// Version information published once per connection to `<name>/version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Bridge name.
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// MQTT protocol spoken to the broker.
    pub mqtt_protocol: String,
    /// Additional bridge-specific fields.
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl VersionInfo {
    pub fn new(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            mqtt_protocol: "3.1.1".to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Add a bridge-specific field.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
