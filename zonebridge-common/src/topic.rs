//! Topic builders and wildcard matching.
//!
//! Bridge topics follow the pattern `<name>/<area>/...`, discovery topics live
//! under the hub's discovery prefix (`homeassistant` by default).

use crate::error::{Error, Result};

/// Default discovery prefix used by the consuming hub.
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// MQTT single-level wildcard.
pub const SINGLE_LEVEL_WILDCARD: char = '+';

/// MQTT multi-level wildcard.
pub const MULTI_LEVEL_WILDCARD: char = '#';

/// Builder for every topic a bridge publishes to or subscribes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    name: String,
    discovery_prefix: String,
}

impl Topics {
    /// Create the topic set for a bridge name with the default discovery prefix.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_discovery_prefix(name, DISCOVERY_PREFIX)
    }

    /// Create the topic set with a custom discovery prefix.
    pub fn with_discovery_prefix(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovery_prefix: prefix.into(),
        }
    }

    /// The bridge name every bridge topic is rooted at.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic the version/capability document is published to.
    ///
    /// # Example
    /// ```
    /// use zonebridge_common::topic::Topics;
    ///
    /// assert_eq!(Topics::new("adtcs").version(), "adtcs/version");
    /// ```
    pub fn version(&self) -> String {
        format!("{}/version", self.name)
    }

    /// Topic the device discovery manifest is published to.
    ///
    /// # Example
    /// ```
    /// use zonebridge_common::topic::Topics;
    ///
    /// assert_eq!(
    ///     Topics::new("adtcs").device_discovery(),
    ///     "homeassistant/device/adtcs/config"
    /// );
    /// ```
    pub fn device_discovery(&self) -> String {
        format!("{}/device/{}/config", self.discovery_prefix, self.name)
    }

    /// Hub birth/will topic. An `online` payload here asks for rediscovery.
    pub fn hub_status(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    /// Bridge availability topic.
    pub fn system_status(&self) -> String {
        format!("{}/system/status", self.name)
    }

    /// Bridge command topic.
    pub fn system_command(&self) -> String {
        format!("{}/system/command", self.name)
    }

    /// State topic for a single zone.
    ///
    /// # Example
    /// ```
    /// use zonebridge_common::topic::Topics;
    ///
    /// assert_eq!(Topics::new("adtcs").entity_state("FrontDoor"), "adtcs/state/FrontDoor");
    /// ```
    pub fn entity_state(&self, unique_id: &str) -> String {
        format!("{}/state/{}", self.name, unique_id)
    }

    /// Command topic for a single zone.
    pub fn entity_command(&self, unique_id: &str) -> String {
        format!("{}/set/{}", self.name, unique_id)
    }

    /// Wildcard pattern matching every zone command topic.
    ///
    /// # Example
    /// ```
    /// use zonebridge_common::topic::Topics;
    ///
    /// assert_eq!(Topics::new("adtcs").entity_command_wildcard(), "adtcs/set/+");
    /// ```
    pub fn entity_command_wildcard(&self) -> String {
        format!("{}/set/{}", self.name, SINGLE_LEVEL_WILDCARD)
    }
}

/// Whether a subscription pattern ends in a wildcard marker.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.ends_with(SINGLE_LEVEL_WILDCARD) || pattern.ends_with(MULTI_LEVEL_WILDCARD)
}

/// The literal prefix of a wildcard pattern (the marker stripped).
///
/// Returns `None` for exact patterns.
pub fn wildcard_prefix(pattern: &str) -> Option<&str> {
    pattern
        .strip_suffix(SINGLE_LEVEL_WILDCARD)
        .or_else(|| pattern.strip_suffix(MULTI_LEVEL_WILDCARD))
}

/// Match a concrete topic against a subscription pattern.
///
/// A wildcard pattern matches any topic sharing its literal prefix; any other
/// pattern only matches itself.
///
/// # Example
/// ```
/// use zonebridge_common::topic::topic_matches;
///
/// assert!(topic_matches("adtcs/set/+", "adtcs/set/frontdoor"));
/// assert!(!topic_matches("adtcs/set/+", "adtcs/state/frontdoor"));
/// assert!(topic_matches("adtcs/version", "adtcs/version"));
/// ```
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match wildcard_prefix(pattern) {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// The last level of a topic, which carries the zone unique id on command topics.
pub fn unique_id_from_topic(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Check that a bridge name can be used as a topic root.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Topic("bridge name cannot be empty".to_string()));
    }

    if let Some(c) = name
        .chars()
        .find(|&c| matches!(c, '/' | SINGLE_LEVEL_WILDCARD | MULTI_LEVEL_WILDCARD))
    {
        return Err(Error::Topic(format!(
            "bridge name '{}' contains reserved character '{}'",
            name, c
        )));
    }

    Ok(())
}
