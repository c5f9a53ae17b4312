//! Diagnostics context passed explicitly through the pipeline.
//!
//! Every component reports progress through a [`Context`] rather than writing to
//! the terminal. Front ends pick the [`LogSink`]: the default [`TracingSink`]
//! forwards to `tracing`, while [`MemorySink`] keeps entries for inspection.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Destination for diagnostic messages.
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::Info => tracing::info!("{message}"),
            Level::Success => tracing::info!("✅ {message}"),
            Level::Warning => tracing::warn!("{message}"),
            Level::Error => tracing::error!("{message}"),
        }
    }
}

/// Records diagnostics in memory.
///
/// Clones share the same buffer, so a clone can be handed to a [`Context`]
/// while another is kept for assertions.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded entries, oldest first.
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.lock().clone()
    }

    /// Messages recorded at `level`.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.lock().iter().filter(|(l, _)| *l == level).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Level, String)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for MemorySink {
    fn emit(&self, level: Level, message: &str) {
        self.lock().push((level, message.to_string()));
    }
}

/// Explicit diagnostics handle threaded through scanner, directory, sender and
/// dispatcher calls.
#[derive(Clone)]
pub struct Context {
    sink: Arc<dyn LogSink>,
}

impl Context {
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn emit(&self, level: Level, message: impl AsRef<str>) {
        self.sink.emit(level, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(Level::Info, message);
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.emit(Level::Success, message);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.emit(Level::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(Level::Error, message);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}
