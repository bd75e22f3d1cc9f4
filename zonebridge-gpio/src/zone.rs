//! Zones: debounced binary sensors and switches.
//!
//! A zone is backed either by a hardware line or by software. Either way its
//! tracked state (level, dirty flag, time of last change) sits behind a single
//! mutex, so an edge arriving from a driver task updates all three at once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::pin::{EdgeCallback, Pin, PinDriver, PinError, PinMode};

/// Digital level of a zone.
pub type Level = i32;

/// Accepts or rejects a requested level for a software zone.
pub type VirtualCallback = Box<dyn Fn(Level) -> bool + Send + Sync>;

/// Zone kind backed by a hardware line.
pub const KIND_GPIO_DIGITAL: &str = "gpio_digital";

/// Zone kind driven in software.
pub const KIND_VIRTUAL: &str = "virtual";

/// Derive a zone unique id from its display name.
///
/// Keeps ASCII letters and digits only.
///
/// # Example
/// ```
/// use zonebridge_gpio::zone::unique_id_from;
///
/// assert_eq!(unique_id_from("Front Door #1"), "FrontDoor1");
/// ```
pub fn unique_id_from(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Direction of a zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoDirection {
    Output,
    #[default]
    Input,
}

impl IoDirection {
    /// Parse a configured direction. Unknown strings mean input.
    pub fn parse(io: &str) -> Self {
        match io {
            "output" => IoDirection::Output,
            _ => IoDirection::Input,
        }
    }
}

/// Per-zone zone load failures. The entry is skipped, the load goes on.
#[derive(Debug, Error)]
pub enum ZoneLoadError {
    #[error("malformed zone entry: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("zone has no name")]
    EmptyName,

    #[error("zone name '{0}' has no alphanumeric characters")]
    EmptyUniqueId(String),

    #[error("zone has no zone_type")]
    MissingKind,

    #[error("unknown zone_type '{0}'")]
    UnknownKind(String),

    #[error("zone needs a valid pin number")]
    InvalidPin,

    #[error("unique id '{0}' is already used by another zone")]
    DuplicateId(String),

    #[error(transparent)]
    Pin(#[from] PinError),
}

/// Static description of a zone, published in the discovery manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMetadata {
    pub name: String,
    pub unique_id: String,
    /// Entity platform: `switch` or `binary_sensor`.
    #[serde(rename = "p")]
    pub platform: String,
    pub payload_on: String,
    pub payload_off: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Common settings of every zone kind.
#[derive(Debug, Clone, Default)]
pub struct ZoneSpec {
    pub name: String,
    pub io: IoDirection,
    pub inverted: bool,
    pub device_class: Option<String>,
    pub icon: Option<String>,
}

impl ZoneSpec {
    pub fn new(name: impl Into<String>, io: IoDirection) -> Self {
        Self {
            name: name.into(),
            io,
            ..Default::default()
        }
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn device_class(mut self, device_class: impl Into<String>) -> Self {
        self.device_class = Some(device_class.into());
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    fn metadata(&self, unique_id: &str) -> ZoneMetadata {
        let (on, off) = if self.inverted { ("0", "1") } else { ("1", "0") };
        let platform = match self.io {
            IoDirection::Output => "switch",
            IoDirection::Input => "binary_sensor",
        };

        ZoneMetadata {
            name: self.name.clone(),
            unique_id: unique_id.to_string(),
            platform: platform.to_string(),
            payload_on: on.to_string(),
            payload_off: off.to_string(),
            device_class: self.device_class.clone().filter(|s| !s.is_empty()),
            icon: self.icon.clone().filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug)]
struct ZoneState {
    level: Level,
    dirty: bool,
    /// `None` means the state has never changed, which counts as infinitely old.
    last_change: Option<Instant>,
}

impl ZoneState {
    fn initial(level: Level) -> Self {
        Self {
            level,
            dirty: true,
            last_change: None,
        }
    }

    fn age(&self, now: Instant) -> Duration {
        match self.last_change {
            Some(at) => now.saturating_duration_since(at),
            None => Duration::MAX,
        }
    }
}

type SharedState = Arc<Mutex<ZoneState>>;

fn lock_state(state: &SharedState) -> MutexGuard<'_, ZoneState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Setter handed to edge sources.
///
/// Records a new level, marks the zone dirty and stamps the change time in one
/// critical section. It cannot read or clear the state.
#[derive(Clone)]
pub struct EdgeHandle {
    state: SharedState,
}

impl EdgeHandle {
    pub fn set_level(&self, level: Level) {
        let mut state = lock_state(&self.state);
        state.level = level;
        state.dirty = true;
        state.last_change = Some(Instant::now());
    }

    fn into_callback(self) -> EdgeCallback {
        Box::new(move |level| self.set_level(level))
    }
}

enum ZoneKind {
    Hardware(Box<dyn Pin>),
    Virtual(Option<VirtualCallback>),
}

/// A monitored or controlled binary point.
pub struct Zone {
    unique_id: String,
    io: IoDirection,
    inverted: bool,
    metadata: ZoneMetadata,
    state: SharedState,
    kind: ZoneKind,
}

impl Zone {
    fn validate(spec: &ZoneSpec) -> Result<String, ZoneLoadError> {
        if spec.name.trim().is_empty() {
            return Err(ZoneLoadError::EmptyName);
        }
        let unique_id = unique_id_from(&spec.name);
        if unique_id.is_empty() {
            return Err(ZoneLoadError::EmptyUniqueId(spec.name.clone()));
        }
        Ok(unique_id)
    }

    fn build(spec: &ZoneSpec, unique_id: String, state: SharedState, kind: ZoneKind) -> Self {
        Self {
            metadata: spec.metadata(&unique_id),
            unique_id,
            io: spec.io,
            inverted: spec.inverted,
            state,
            kind,
        }
    }

    /// Zone backed by a hardware line.
    ///
    /// Inputs are opened with `pull`; outputs ignore it. The tracked level
    /// starts at the live line value.
    pub fn hardware(
        spec: &ZoneSpec,
        pin: u32,
        pull: PinMode,
        driver: &dyn PinDriver,
    ) -> Result<Self, ZoneLoadError> {
        let unique_id = Self::validate(spec)?;
        let mode = match spec.io {
            IoDirection::Output => PinMode::Output,
            IoDirection::Input => pull,
        };

        let state = Arc::new(Mutex::new(ZoneState::initial(0)));
        let edge = EdgeHandle {
            state: state.clone(),
        };
        let line = driver.open(pin, mode, edge.into_callback())?;
        lock_state(&state).level = line.read()?;

        debug!(zone = %unique_id, pin, mode = %mode, "Opened hardware zone");
        Ok(Self::build(spec, unique_id, state, ZoneKind::Hardware(line)))
    }

    /// Zone driven in software.
    ///
    /// `callback` decides whether a requested level is accepted; without one
    /// every request is.
    pub fn virtual_zone(
        spec: &ZoneSpec,
        callback: Option<VirtualCallback>,
    ) -> Result<Self, ZoneLoadError> {
        let unique_id = Self::validate(spec)?;
        let state = Arc::new(Mutex::new(ZoneState::initial(0)));
        Ok(Self::build(
            spec,
            unique_id,
            state,
            ZoneKind::Virtual(callback),
        ))
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn io(&self) -> IoDirection {
        self.io
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn metadata(&self) -> &ZoneMetadata {
        &self.metadata
    }

    /// Handle through which software can report edges on this zone.
    pub fn edge_handle(&self) -> EdgeHandle {
        EdgeHandle {
            state: self.state.clone(),
        }
    }

    /// Tracked level.
    pub fn level(&self) -> Level {
        lock_state(&self.state).level
    }

    /// Whether a change is waiting to be published.
    pub fn is_dirty(&self) -> bool {
        lock_state(&self.state).dirty
    }

    /// Drive the zone to `level`.
    ///
    /// Input zones ignore the request. The tracked state only changes once
    /// the line write or the software callback accepts the level.
    pub fn set(&mut self, level: Level) {
        if self.io == IoDirection::Input {
            debug!(zone = %self.unique_id, level, "Ignoring set on input zone");
            return;
        }

        let accepted = match &mut self.kind {
            ZoneKind::Hardware(line) => match line.write(level) {
                Ok(()) => true,
                Err(e) => {
                    warn!(zone = %self.unique_id, level, error = %e, "GPIO state change failed");
                    false
                }
            },
            ZoneKind::Virtual(callback) => {
                let accepted = callback.as_ref().is_none_or(|accept| accept(level));
                if !accepted {
                    warn!(zone = %self.unique_id, level, "Virtual zone rejected state change");
                }
                accepted
            }
        };

        if accepted {
            self.edge_handle().set_level(level);
        }
    }

    /// Live level: the line value for hardware zones, 0 for software zones.
    pub fn get(&self) -> Level {
        match &self.kind {
            ZoneKind::Hardware(line) => match line.read() {
                Ok(level) => level,
                Err(e) => {
                    warn!(zone = %self.unique_id, error = %e, "GPIO read failed");
                    self.level()
                }
            },
            ZoneKind::Virtual(_) => 0,
        }
    }

    /// Mark dirty if the last change is older than `max_age`.
    pub(crate) fn refresh(&self, now: Instant, max_age: Duration) {
        let mut state = lock_state(&self.state);
        if state.age(now) > max_age {
            state.dirty = true;
        }
    }

    /// Take the level for publishing if the zone is dirty and has been quiet
    /// for longer than `quiet`. Clears the dirty flag and restarts the clock.
    pub(crate) fn take_change(&self, now: Instant, quiet: Duration) -> Option<Level> {
        let mut state = lock_state(&self.state);
        if !state.dirty || state.age(now) <= quiet {
            return None;
        }
        state.dirty = false;
        state.last_change = Some(now);
        Some(state.level)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let platform = &self.metadata.platform;
        match &self.kind {
            ZoneKind::Hardware(line) => write!(
                f,
                "{} ({}, {}, gpio {},{})",
                self.metadata.name,
                self.unique_id,
                platform,
                line.number(),
                line.mode()
            ),
            ZoneKind::Virtual(_) => write!(
                f,
                "{} ({}, {}, virtual)",
                self.metadata.name, self.unique_id, platform
            ),
        }
    }
}
