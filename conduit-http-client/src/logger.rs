//! Diagnostic logging collaborator.
//!
//! The client writes its own diagnostic lines (retry notices, debug-mode
//! request/response summaries) through a [`Logger`]. The default forwards to
//! `tracing`; [`WriterLogger`] writes plain `LEVEL: message` lines to any
//! `io::Write`.

use parking_lot::Mutex;
use std::io::Write;

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level
    Error,
}

impl Level {
    /// Get level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Line-oriented, leveled log sink.
pub trait Logger: Send + Sync {
    /// Write one message at the given level.
    fn log(&self, level: Level, message: &str);

    /// Log at debug level.
    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    /// Log at info level.
    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    /// Log at warn level.
    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    /// Log at error level.
    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Logger that forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!(target: "conduit_http_client", "{}", message),
            Level::Info => tracing::info!(target: "conduit_http_client", "{}", message),
            Level::Warn => tracing::warn!(target: "conduit_http_client", "{}", message),
            Level::Error => tracing::error!(target: "conduit_http_client", "{}", message),
        }
    }
}

/// Logger that writes `LEVEL: message` lines to a writer.
///
/// Write failures are ignored.
#[derive(Debug)]
pub struct WriterLogger<W> {
    writer: Mutex<W>,
    min_level: Level,
}

impl<W: Write + Send> WriterLogger<W> {
    /// Create a logger writing every level.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            min_level: Level::Debug,
        }
    }

    /// Drop messages below `level`.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// Consume the logger and return the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Logger for WriterLogger<W> {
    fn log(&self, level: Level, message: &str) {
        if level < self.min_level {
            return;
        }
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{}: {}", level, message);
    }
}
