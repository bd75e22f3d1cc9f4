//! MQTT bridge for alarm-panel style zones.
//!
//! Each configured zone is a binary sensor or switch backed by a GPIO line or
//! by software. Zone changes are debounced and published to MQTT, commands
//! received over MQTT drive output zones, and a discovery manifest lets Home
//! Assistant create every entity automatically.
//!
//! # Topics
//!
//! ```text
//! <name>/state/<unique_id>   zone level ("0", "1", ...)
//! <name>/set/<unique_id>     requested zone level
//! ```
//!
//! Where `<unique_id>` is the zone display name with every non-alphanumeric
//! character removed.

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod host;
pub mod manager;
pub mod pin;
pub mod zone;

pub use bridge::{BridgeState, SecuritySystem};
pub use config::GpioBridgeConfig;
pub use manager::ZoneManager;
pub use zone::{Level, Zone};
