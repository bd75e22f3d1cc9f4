//! Digital I/O lines.
//!
//! A [`PinDriver`] opens lines; each opened [`Pin`] can be read and written,
//! and reports level changes on input lines through the callback given at
//! open time. Callbacks may run on a driver task, so they must only record the
//! new level.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::zone::Level;

/// Callback invoked with the new level when an input line changes.
pub type EdgeCallback = Box<dyn Fn(Level) + Send + Sync>;

/// Line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
    Input,
    InputPullUp,
    InputPullDown,
}

impl PinMode {
    /// Input mode for a configured pull mode string.
    ///
    /// Unknown strings fall back to a plain input.
    pub fn from_pull(pull: &str) -> Self {
        match pull {
            "pullup" => PinMode::InputPullUp,
            "pulldown" => PinMode::InputPullDown,
            _ => PinMode::Input,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, PinMode::Output)
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::Output => write!(f, "OUTPUT"),
            PinMode::Input => write!(f, "INPUT"),
            PinMode::InputPullUp => write!(f, "INPUT_PU"),
            PinMode::InputPullDown => write!(f, "INPUT_PD"),
        }
    }
}

/// Pin driver errors.
#[derive(Debug, Error)]
pub enum PinError {
    /// The driver itself could not be initialized.
    #[error("GPIO driver initialization failed: {0}")]
    Init(String),

    #[error("GPIO {0} is unavailable: {1}")]
    Unavailable(u32, String),

    #[error("GPIO {0} is not configured as an output")]
    NotOutput(u32),

    #[error("GPIO {pin} I/O error: {source}")]
    Io {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("GPIO {0} write rejected")]
    Write(u32),

    #[error("GPIO {pin} cannot be driven to level {level}")]
    InvalidLevel { pin: u32, level: Level },
}

/// Only 0 and 1 can be written to a digital line.
fn check_level(pin: u32, level: Level) -> Result<(), PinError> {
    match level {
        0 | 1 => Ok(()),
        _ => Err(PinError::InvalidLevel { pin, level }),
    }
}

/// An opened line.
pub trait Pin: Send {
    fn number(&self) -> u32;

    fn mode(&self) -> PinMode;

    /// Read the live level.
    fn read(&self) -> Result<Level, PinError>;

    /// Drive an output line. Levels other than 0 and 1 are rejected.
    fn write(&mut self, level: Level) -> Result<(), PinError>;
}

/// Opens lines on some GPIO backend.
pub trait PinDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open `pin` in `mode`. Input lines report changes through `on_edge`.
    fn open(&self, pin: u32, mode: PinMode, on_edge: EdgeCallback)
    -> Result<Box<dyn Pin>, PinError>;
}

// ---------------------------------------------------------------------------
// Simulated driver
// ---------------------------------------------------------------------------

struct SimulatedLine {
    level: Level,
    fail_writes: bool,
    on_edge: Arc<EdgeCallback>,
}

type Lines = Arc<Mutex<HashMap<u32, SimulatedLine>>>;

/// In-memory driver.
///
/// Clones share their lines, so a test can drive edges on a handle while the
/// bridge owns the opened pins.
#[derive(Clone, Default)]
pub struct SimulatedPinDriver {
    lines: Lines,
}

impl SimulatedPinDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, SimulatedLine>> {
        lock_lines(&self.lines)
    }

    /// Simulate an external level change on an opened line.
    ///
    /// The edge callback fires only when the level actually changes. Returns
    /// `false` if the line is not open.
    pub fn drive(&self, pin: u32, level: Level) -> bool {
        let callback = {
            let mut lines = self.lock();
            let Some(line) = lines.get_mut(&pin) else {
                return false;
            };
            if line.level == level {
                return true;
            }
            line.level = level;
            line.on_edge.clone()
        };
        // outside the lock so the callback may read the line
        callback(level);
        true
    }

    /// Make writes to `pin` fail.
    pub fn fail_writes(&self, pin: u32, fail: bool) {
        if let Some(line) = self.lock().get_mut(&pin) {
            line.fail_writes = fail;
        }
    }

    /// Current level of an opened line.
    pub fn level(&self, pin: u32) -> Option<Level> {
        self.lock().get(&pin).map(|line| line.level)
    }

    pub fn is_open(&self, pin: u32) -> bool {
        self.lock().contains_key(&pin)
    }
}

impl PinDriver for SimulatedPinDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open(
        &self,
        pin: u32,
        mode: PinMode,
        on_edge: EdgeCallback,
    ) -> Result<Box<dyn Pin>, PinError> {
        let mut lines = self.lock();
        if lines.contains_key(&pin) {
            return Err(PinError::Unavailable(pin, "already open".to_string()));
        }

        let level = match mode {
            PinMode::InputPullUp => 1,
            _ => 0,
        };
        lines.insert(
            pin,
            SimulatedLine {
                level,
                fail_writes: false,
                on_edge: Arc::new(on_edge),
            },
        );

        Ok(Box::new(SimulatedPin {
            pin,
            mode,
            lines: self.lines.clone(),
        }))
    }
}

struct SimulatedPin {
    pin: u32,
    mode: PinMode,
    lines: Lines,
}

impl Pin for SimulatedPin {
    fn number(&self) -> u32 {
        self.pin
    }

    fn mode(&self) -> PinMode {
        self.mode
    }

    fn read(&self) -> Result<Level, PinError> {
        lock_lines(&self.lines)
            .get(&self.pin)
            .map(|line| line.level)
            .ok_or_else(|| PinError::Unavailable(self.pin, "line closed".to_string()))
    }

    fn write(&mut self, level: Level) -> Result<(), PinError> {
        if !self.mode.is_output() {
            return Err(PinError::NotOutput(self.pin));
        }
        check_level(self.pin, level)?;

        let mut lines = lock_lines(&self.lines);
        let line = lines
            .get_mut(&self.pin)
            .ok_or_else(|| PinError::Unavailable(self.pin, "line closed".to_string()))?;
        if line.fail_writes {
            return Err(PinError::Write(self.pin));
        }
        line.level = level;
        Ok(())
    }
}

impl Drop for SimulatedPin {
    fn drop(&mut self) {
        lock_lines(&self.lines).remove(&self.pin);
    }
}

fn lock_lines(lines: &Lines) -> MutexGuard<'_, HashMap<u32, SimulatedLine>> {
    lines.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// sysfs driver
// ---------------------------------------------------------------------------

/// Interval at which input lines are sampled for changes.
const EDGE_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Linux `/sys/class/gpio` driver.
///
/// Input changes are detected by a watcher task sampling the value file, so
/// opening an input line requires a tokio runtime.
#[derive(Debug, Clone)]
pub struct SysfsPinDriver {
    base: PathBuf,
}

impl SysfsPinDriver {
    /// Driver rooted at `base`. Fails if the directory does not exist.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, PinError> {
        let base = base.into();
        if !base.join("export").exists() {
            return Err(PinError::Init(format!(
                "{} is not a sysfs GPIO directory",
                base.display()
            )));
        }
        Ok(Self { base })
    }

    fn line_dir(&self, pin: u32) -> PathBuf {
        self.base.join(format!("gpio{}", pin))
    }

    /// Set the direction of an exported line and start its watcher.
    fn configure(
        &self,
        dir: &Path,
        pin: u32,
        mode: PinMode,
        on_edge: EdgeCallback,
    ) -> Result<Box<dyn Pin>, PinError> {
        let direction = if mode.is_output() { "out" } else { "in" };
        std::fs::write(dir.join("direction"), direction)
            .map_err(|source| PinError::Io { pin, source })?;

        if matches!(mode, PinMode::InputPullUp | PinMode::InputPullDown) {
            warn!(
                pin,
                mode = %mode,
                "Pull resistors cannot be set through sysfs, configure them in the device tree"
            );
        }

        let value = dir.join("value");
        let watcher = if mode.is_output() {
            None
        } else {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|e| PinError::Init(format!("no tokio runtime: {}", e)))?;
            let initial = read_level(&value, pin)?;
            Some(runtime.spawn(watch_line(value.clone(), pin, initial, on_edge)))
        };

        debug!(pin, mode = %mode, "Opened sysfs GPIO");

        Ok(Box::new(SysfsPin {
            pin,
            mode,
            base: self.base.clone(),
            value,
            watcher,
        }))
    }
}

impl PinDriver for SysfsPinDriver {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn open(
        &self,
        pin: u32,
        mode: PinMode,
        on_edge: EdgeCallback,
    ) -> Result<Box<dyn Pin>, PinError> {
        let dir = self.line_dir(pin);

        let exported = !dir.exists();
        if exported {
            std::fs::write(self.base.join("export"), pin.to_string())
                .map_err(|source| PinError::Io { pin, source })?;
        }

        self.configure(&dir, pin, mode, on_edge).inspect_err(|_| {
            if exported {
                unexport(&self.base, pin);
            }
        })
    }
}

fn unexport(base: &Path, pin: u32) {
    if let Err(e) = std::fs::write(base.join("unexport"), pin.to_string()) {
        debug!(pin, error = %e, "Failed to unexport GPIO");
    }
}

async fn watch_line(value: PathBuf, pin: u32, mut last: Level, on_edge: EdgeCallback) {
    let mut interval = tokio::time::interval(EDGE_SAMPLE_INTERVAL);
    loop {
        interval.tick().await;
        match read_level(&value, pin) {
            Ok(level) if level != last => {
                last = level;
                on_edge(level);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(pin, error = %e, "Failed to sample GPIO, stopping watcher");
                break;
            }
        }
    }
}

fn read_level(value: &Path, pin: u32) -> Result<Level, PinError> {
    let raw = std::fs::read_to_string(value).map_err(|source| PinError::Io { pin, source })?;
    Ok(if raw.trim() == "0" { 0 } else { 1 })
}

struct SysfsPin {
    pin: u32,
    mode: PinMode,
    base: PathBuf,
    value: PathBuf,
    watcher: Option<JoinHandle<()>>,
}

impl Pin for SysfsPin {
    fn number(&self) -> u32 {
        self.pin
    }

    fn mode(&self) -> PinMode {
        self.mode
    }

    fn read(&self) -> Result<Level, PinError> {
        read_level(&self.value, self.pin)
    }

    fn write(&mut self, level: Level) -> Result<(), PinError> {
        if !self.mode.is_output() {
            return Err(PinError::NotOutput(self.pin));
        }
        check_level(self.pin, level)?;
        let raw = if level == 0 { "0" } else { "1" };
        std::fs::write(&self.value, raw).map_err(|source| PinError::Io {
            pin: self.pin,
            source,
        })
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        // return the line to a safe state
        let dir = self.base.join(format!("gpio{}", self.pin));
        if let Err(e) = std::fs::write(dir.join("direction"), "in") {
            debug!(pin = self.pin, error = %e, "Failed to reset GPIO direction");
        }
        unexport(&self.base, self.pin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    fn recording_callback() -> (EdgeCallback, Arc<AtomicI32>, Arc<AtomicUsize>) {
        let last = Arc::new(AtomicI32::new(-1));
        let count = Arc::new(AtomicUsize::new(0));
        let (l, c) = (last.clone(), count.clone());
        let callback: EdgeCallback = Box::new(move |level| {
            l.store(level, Ordering::SeqCst);
            c.fetch_add(1, Ordering::SeqCst);
        });
        (callback, last, count)
    }

    #[test]
    fn test_pin_mode_from_pull() {
        assert_eq!(PinMode::from_pull("pullup"), PinMode::InputPullUp);
        assert_eq!(PinMode::from_pull("pulldown"), PinMode::InputPullDown);
        assert_eq!(PinMode::from_pull("off"), PinMode::Input);
        assert_eq!(PinMode::from_pull("sideways"), PinMode::Input);
        assert_eq!(PinMode::InputPullUp.to_string(), "INPUT_PU");
    }

    #[test]
    fn test_simulated_drive_fires_on_change() {
        let driver = SimulatedPinDriver::new();
        let (callback, last, count) = recording_callback();
        let pin = driver.open(17, PinMode::Input, callback).unwrap();

        assert!(driver.drive(17, 1));
        assert!(driver.drive(17, 1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 1);
        assert_eq!(pin.read().unwrap(), 1);

        assert!(!driver.drive(18, 1));
    }

    #[test]
    fn test_simulated_pull_up_reads_high() {
        let driver = SimulatedPinDriver::new();
        let (callback, _, _) = recording_callback();
        let pin = driver.open(4, PinMode::InputPullUp, callback).unwrap();
        assert_eq!(pin.read().unwrap(), 1);
    }

    #[test]
    fn test_simulated_write() {
        let driver = SimulatedPinDriver::new();
        let (callback, _, count) = recording_callback();
        let mut output = driver.open(22, PinMode::Output, callback).unwrap();

        output.write(1).unwrap();
        assert_eq!(driver.level(22), Some(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        driver.fail_writes(22, true);
        assert!(matches!(output.write(0), Err(PinError::Write(22))));
        assert_eq!(driver.level(22), Some(1));
    }

    #[test]
    fn test_simulated_write_rejects_non_binary_level() {
        let driver = SimulatedPinDriver::new();
        let (callback, _, _) = recording_callback();
        let mut output = driver.open(22, PinMode::Output, callback).unwrap();

        assert!(matches!(
            output.write(5),
            Err(PinError::InvalidLevel { pin: 22, level: 5 })
        ));
        assert!(output.write(-1).is_err());
        assert_eq!(driver.level(22), Some(0));
    }

    #[test]
    fn test_simulated_write_to_input_fails() {
        let driver = SimulatedPinDriver::new();
        let (callback, _, _) = recording_callback();
        let mut input = driver.open(5, PinMode::Input, callback).unwrap();
        assert!(matches!(input.write(1), Err(PinError::NotOutput(5))));
    }

    #[test]
    fn test_simulated_pin_closes_on_drop() {
        let driver = SimulatedPinDriver::new();
        let (callback, _, _) = recording_callback();
        let pin = driver.open(6, PinMode::Input, callback).unwrap();

        let (again, _, _) = recording_callback();
        assert!(matches!(
            driver.open(6, PinMode::Input, again),
            Err(PinError::Unavailable(6, _))
        ));

        drop(pin);
        assert!(!driver.is_open(6));
    }

    #[test]
    fn test_sysfs_missing_base() {
        assert!(matches!(
            SysfsPinDriver::new("/nonexistent/gpio"),
            Err(PinError::Init(_))
        ));
    }

    fn fake_sysfs(pin: u32, value: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("export"), "").unwrap();
        std::fs::write(dir.path().join("unexport"), "").unwrap();
        let line = dir.path().join(format!("gpio{}", pin));
        std::fs::create_dir(&line).unwrap();
        std::fs::write(line.join("direction"), "in").unwrap();
        std::fs::write(line.join("value"), value).unwrap();
        dir
    }

    #[test]
    fn test_sysfs_output_write() {
        let dir = fake_sysfs(23, "0\n");
        let driver = SysfsPinDriver::new(dir.path()).unwrap();
        let (callback, _, _) = recording_callback();

        let mut pin = driver.open(23, PinMode::Output, callback).unwrap();
        let line = dir.path().join("gpio23");
        assert_eq!(std::fs::read_to_string(line.join("direction")).unwrap(), "out");

        pin.write(1).unwrap();
        assert_eq!(pin.read().unwrap(), 1);

        drop(pin);
        assert_eq!(std::fs::read_to_string(line.join("direction")).unwrap(), "in");
        assert_eq!(std::fs::read_to_string(dir.path().join("unexport")).unwrap(), "23");
    }

    #[test]
    fn test_sysfs_write_rejects_non_binary_level() {
        let dir = fake_sysfs(25, "0\n");
        let driver = SysfsPinDriver::new(dir.path()).unwrap();
        let (callback, _, _) = recording_callback();

        let mut pin = driver.open(25, PinMode::Output, callback).unwrap();
        assert!(matches!(
            pin.write(5),
            Err(PinError::InvalidLevel { pin: 25, level: 5 })
        ));
        assert_eq!(pin.read().unwrap(), 0);
    }

    #[test]
    fn test_sysfs_failed_open_unexports_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("export"), "").unwrap();
        std::fs::write(dir.path().join("unexport"), "").unwrap();
        let driver = SysfsPinDriver::new(dir.path()).unwrap();
        let (callback, _, _) = recording_callback();

        // export succeeds but the line directory never shows up
        let result = driver.open(9, PinMode::Output, callback);

        assert!(matches!(result, Err(PinError::Io { pin: 9, .. })));
        assert_eq!(std::fs::read_to_string(dir.path().join("export")).unwrap(), "9");
        assert_eq!(std::fs::read_to_string(dir.path().join("unexport")).unwrap(), "9");
    }

    #[tokio::test]
    async fn test_sysfs_input_watcher_reports_changes() {
        let dir = fake_sysfs(24, "0\n");
        let driver = SysfsPinDriver::new(dir.path()).unwrap();
        let (callback, last, count) = recording_callback();

        let pin = driver.open(24, PinMode::Input, callback).unwrap();
        assert_eq!(pin.read().unwrap(), 0);

        std::fs::write(dir.path().join("gpio24/value"), "1\n").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 1);
    }
}
