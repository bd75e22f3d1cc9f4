//! Zone registry and debounce scheduling.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::config::ZoneEntry;
use crate::pin::{PinDriver, PinMode};
use crate::zone::{
    IoDirection, KIND_GPIO_DIGITAL, KIND_VIRTUAL, Level, Zone, ZoneLoadError, ZoneSpec,
};

/// A zone whose state has not changed for this long is republished on refresh.
pub const REFRESH_AGE: Duration = Duration::from_secs(1);

/// A change must be this old before it is published.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Owns every zone and decides when their state gets published.
#[derive(Default)]
pub struct ZoneManager {
    zones: Vec<Zone>,
}

impl ZoneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build zones from the raw `zones` configuration entries.
    ///
    /// Invalid or mistyped entries are logged and skipped; the rest still load.
    pub fn load(entries: &[Value], driver: &dyn PinDriver) -> Self {
        let mut manager = Self::new();

        for (index, raw) in entries.iter().enumerate() {
            let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
            let loaded = ZoneEntry::from_value(raw)
                .map_err(ZoneLoadError::from)
                .and_then(|entry| build_zone(&entry, driver))
                .and_then(|zone| manager.push(zone));

            if let Err(e) = loaded {
                warn!(index, zone = %name, error = %e, "Skipping zone");
            }
        }

        if manager.is_empty() {
            warn!("No zones loaded");
        }
        info!(zones = manager.len(), "ZoneManager is ready");

        manager
    }

    /// Add a zone. Fails if its unique id is already registered.
    pub fn push(&mut self, zone: Zone) -> Result<(), ZoneLoadError> {
        if self.get(zone.unique_id()).is_some() {
            return Err(ZoneLoadError::DuplicateId(zone.unique_id().to_string()));
        }
        info!(zone = %zone, "Loaded zone");
        self.zones.push(zone);
        Ok(())
    }

    /// Mark every zone unchanged for over a second as dirty, so the next scan
    /// republishes it.
    pub fn refresh(&self, now: Instant) {
        for zone in &self.zones {
            zone.refresh(now, REFRESH_AGE);
        }
    }

    /// Publish every dirty zone that has been quiet for the debounce window.
    ///
    /// Returns the number of zones published.
    pub fn scan_and_publish<F>(&self, now: Instant, mut publish: F) -> usize
    where
        F: FnMut(&str, Level),
    {
        let mut published = 0;
        for zone in &self.zones {
            if let Some(level) = zone.take_change(now, DEBOUNCE_WINDOW) {
                publish(zone.unique_id(), level);
                published += 1;
            }
        }
        published
    }

    pub fn get(&self, unique_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.unique_id() == unique_id)
    }

    pub fn get_mut(&mut self, unique_id: &str) -> Option<&mut Zone> {
        self.zones.iter_mut().find(|z| z.unique_id() == unique_id)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

fn build_zone(entry: &ZoneEntry, driver: &dyn PinDriver) -> Result<Zone, ZoneLoadError> {
    let name = entry
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or(ZoneLoadError::EmptyName)?;
    let kind = entry.zone_type.as_deref().ok_or(ZoneLoadError::MissingKind)?;

    let mut spec = ZoneSpec::new(name, IoDirection::parse(entry.io.as_deref().unwrap_or("")))
        .inverted(entry.invert.unwrap_or(false));
    spec.device_class = entry.device_class.clone();
    spec.icon = entry.icon.clone();

    match kind {
        KIND_GPIO_DIGITAL => {
            let pin = entry
                .pin
                .and_then(|p| u32::try_from(p).ok())
                .ok_or(ZoneLoadError::InvalidPin)?;
            let pull = PinMode::from_pull(entry.pullmode.as_deref().unwrap_or("off"));
            Zone::hardware(&spec, pin, pull, driver)
        }
        KIND_VIRTUAL => Zone::virtual_zone(&spec, None),
        other => Err(ZoneLoadError::UnknownKind(other.to_string())),
    }
}
