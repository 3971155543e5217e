//! Diagnostics sink and logger setup.
//!
//! Arrays carry an `Arc<dyn Diagnostics>` that receives the warn-and-repair
//! notices (coordinate descriptors whose recorded length disagrees with the
//! data). Derived arrays inherit the sink of their parent, so a test can hand
//! a [`CaptureDiagnostics`] to a constructor and inspect every notice raised
//! by the operations that follow.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::config::LogLevel;

/// Receiver for notices raised while manipulating arrays.
pub trait Diagnostics: Send + Sync + fmt::Debug {
    /// A recoverable inconsistency was found and repaired.
    fn warn(&self, message: &str);

    /// Informational message (component descriptions, progress).
    fn info(&self, message: &str) {
        log::info!("{}", message);
    }
}

/// Forwards notices to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn warn(&self, message: &str) {
        log::warn!("{}", message);
    }
}

/// Records notices in memory.
#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    warnings: Mutex<Vec<String>>,
    infos: Mutex<Vec<String>>,
}

impl CaptureDiagnostics {
    /// Create an empty capture sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    /// Informational messages recorded so far.
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl Diagnostics for CaptureDiagnostics {
    fn warn(&self, message: &str) {
        log::warn!("{}", message);
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
    }

    fn info(&self, message: &str) {
        if let Ok(mut infos) = self.infos.lock() {
            infos.push(message.to_string());
        }
    }
}

/// The sink used when none is supplied.
pub fn default_diagnostics() -> Arc<dyn Diagnostics> {
    Arc::new(LogDiagnostics)
}

/// Initialise `env_logger` at the given level.
///
/// `RUST_LOG` still overrides the level. Returns false when a logger was
/// already installed, which makes repeated calls harmless.
pub fn init_logging(level: LogLevel) -> bool {
    env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}
