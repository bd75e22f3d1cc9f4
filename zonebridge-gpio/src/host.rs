//! Host identity from `/proc/cpuinfo`.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Serial reported when the host has no usable identifier.
pub const UNKNOWN_SERIAL: &str = "unknown";

const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Hardware identity of the host running the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    cpuinfo: HashMap<String, String>,
    serial: String,
}

impl HostInfo {
    /// Read `/proc/cpuinfo`. A missing file yields an unknown serial.
    pub fn detect() -> Self {
        Self::detect_path(CPUINFO_PATH)
    }

    pub fn detect_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_cpuinfo(&text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cpuinfo");
                Self::from_cpuinfo("")
            }
        }
    }

    /// Parse cpuinfo text: `key : value` lines, later keys override earlier ones.
    pub fn from_cpuinfo(text: &str) -> Self {
        let mut cpuinfo = HashMap::new();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            cpuinfo.insert(key.trim_end().to_string(), value.trim_start().to_string());
        }

        let serial = match cpuinfo.get("Serial") {
            Some(raw) => hex::encode(Sha256::digest(raw.as_bytes())),
            None => {
                debug!("cpuinfo has no Serial field");
                UNKNOWN_SERIAL.to_string()
            }
        };

        Self { cpuinfo, serial }
    }

    /// Stable device serial: hex SHA-256 of the cpuinfo serial.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn hardware_revision(&self) -> &str {
        self.get("CPU revision").unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.cpuinfo.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PI_CPUINFO: &str = "processor\t: 0\n\
        model name\t: ARMv7 Processor rev 4 (v7l)\n\
        CPU revision\t: 4\n\
        \n\
        processor\t: 1\n\
        CPU revision\t: 5\n\
        \n\
        Hardware\t: BCM2835\n\
        Serial\t\t: 00000000a1b2c3d4\n";

    #[test]
    fn test_parse_cpuinfo() {
        let host = HostInfo::from_cpuinfo(PI_CPUINFO);

        assert_eq!(host.get("Hardware"), Some("BCM2835"));
        assert_eq!(host.get("model name"), Some("ARMv7 Processor rev 4 (v7l)"));
        // later entries win
        assert_eq!(host.hardware_revision(), "5");
    }

    #[test]
    fn test_serial_is_hashed() {
        let host = HostInfo::from_cpuinfo(PI_CPUINFO);
        let expected = hex::encode(Sha256::digest(b"00000000a1b2c3d4"));

        assert_eq!(host.serial(), expected);
        assert_eq!(host.serial().len(), 64);
        assert!(!host.serial().contains("a1b2c3d4"));
    }

    #[test]
    fn test_missing_serial() {
        let host = HostInfo::from_cpuinfo("processor\t: 0\n");
        assert_eq!(host.serial(), UNKNOWN_SERIAL);
        assert_eq!(host.hardware_revision(), "");
    }

    #[test]
    fn test_missing_file() {
        let host = HostInfo::detect_path("/nonexistent/cpuinfo");
        assert_eq!(host.serial(), UNKNOWN_SERIAL);
    }
}
