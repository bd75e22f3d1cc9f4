//! Bridge lifecycle helpers: logging setup and cooperative shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::task::JoinHandle;

use zonebridge_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::error::{BridgeError, Result};

/// Shared shutdown flag.
///
/// Clones observe the same flag. The run loop checks it at the top of every
/// iteration, so shutdown never interrupts in-flight bus I/O.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the first request.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Initialize logging from the config, letting `--log-level` override the level.
pub fn init_logging(config: &LoggingConfig, args: Option<&BridgeArgs>) -> Result<()> {
    let mut log_config = config.clone();
    if let Some(level) = args.and_then(|a| a.log_level.as_ref()) {
        log_config.level = level.clone();
    }

    init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))
}

/// Spawn a task that requests shutdown on Ctrl+C or SIGTERM.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if wait_for_signal().await {
            tracing::info!("Received shutdown signal");
            handle.request();
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal as unix_signal};

    let mut term = match unix_signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for SIGTERM");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        received = ctrl_c() => received,
        _ = term.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    ctrl_c().await
}

async fn ctrl_c() -> bool {
    match signal::ctrl_c().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_first_request_wins() {
        let handle = ShutdownHandle::new();
        let observer = handle.clone();

        assert!(!observer.is_requested());
        assert!(handle.request());
        assert!(!handle.request());
        assert!(observer.is_requested());
    }
}
