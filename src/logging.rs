//! Leveled, per-agent tagged logging.
//!
//! Records are emitted through `tracing`; the installed subscriber owns
//! formatting and retention. The [`Logger`] applies its own level filter
//! before anything is formatted so that the configured `LOG_LEVEL` holds
//! even when `RUST_LOG` is more permissive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Log verbosity, ordered `Debug < Info < Warn < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

/// Install the process-wide `tracing` subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise the configured level is
/// used for this crate and `warn` for dependencies. Calling this more than
/// once is harmless.
pub fn init_tracing(level: LogLevel) {
    let default_directive = format!("warn,carewatch={}", level.as_str());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .try_init();
}

/// Process-wide logger handle. Cheap to clone.
#[derive(Debug, Clone, Copy)]
pub struct Logger {
    level: LogLevel,
}

impl Logger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether a record at `level` passes the configured threshold.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    /// A logger that tags every record with `name`.
    pub fn for_agent(&self, name: impl Into<String>) -> AgentLogger {
        AgentLogger {
            tag: name.into(),
            level: self.level,
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

/// Logger bound to one agent tag.
#[derive(Debug, Clone)]
pub struct AgentLogger {
    tag: String,
    level: LogLevel,
}

impl AgentLogger {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Debug, message.as_ref(), None, false);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Info, message.as_ref(), None, false);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Warn, message.as_ref(), None, false);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Error, message.as_ref(), None, false);
    }

    /// Info-level record marked as a successful outcome.
    pub fn success(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Info, message.as_ref(), None, true);
    }

    pub fn debug_with(&self, message: impl AsRef<str>, data: Value) {
        self.emit(LogLevel::Debug, message.as_ref(), Some(&data), false);
    }

    pub fn info_with(&self, message: impl AsRef<str>, data: Value) {
        self.emit(LogLevel::Info, message.as_ref(), Some(&data), false);
    }

    pub fn warn_with(&self, message: impl AsRef<str>, data: Value) {
        self.emit(LogLevel::Warn, message.as_ref(), Some(&data), false);
    }

    pub fn error_with(&self, message: impl AsRef<str>, data: Value) {
        self.emit(LogLevel::Error, message.as_ref(), Some(&data), false);
    }

    fn emit(&self, level: LogLevel, message: &str, data: Option<&Value>, success: bool) {
        if !self.enabled(level) {
            return;
        }

        let agent = self.tag.as_str();
        let outcome = if success { "success" } else { "" };
        match (level, data) {
            (LogLevel::Debug, Some(d)) => tracing::debug!(agent, data = %d, "{}", message),
            (LogLevel::Debug, None) => tracing::debug!(agent, "{}", message),
            (LogLevel::Info, Some(d)) => tracing::info!(agent, outcome, data = %d, "{}", message),
            (LogLevel::Info, None) => tracing::info!(agent, outcome, "{}", message),
            (LogLevel::Warn, Some(d)) => tracing::warn!(agent, data = %d, "{}", message),
            (LogLevel::Warn, None) => tracing::warn!(agent, "{}", message),
            (LogLevel::Error, Some(d)) => tracing::error!(agent, data = %d, "{}", message),
            (LogLevel::Error, None) => tracing::error!(agent, "{}", message),
        }
    }
}
