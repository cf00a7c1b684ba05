//! Explicit logging/progress handle threaded through long-running operations.
//!
//! The ancestor this design is drawn from configures a process-wide logger
//! and a global profiler once at startup and has every call site reach for
//! them implicitly. That makes `Flush`, `CompactIndexes`, and GC hard to
//! unit test without capturing stdout. Here, long-running operations accept
//! an `&ObservabilityContext` instead: production code builds one backed by
//! the `log` facade, tests build one backed by a `Vec<String>` buffer.

use std::sync::Mutex;

/// Severity of a single log line emitted through an `ObservabilityContext`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Where log lines produced during a long-running operation go.
///
/// `Global` forwards to the `log` facade (the normal runtime path).
/// `Buffered` collects lines in memory, for tests that want to assert on
/// what was logged without capturing process-wide state.
pub enum ObservabilityContext {
    Global,
    Buffered(Mutex<Vec<(Level, String)>>),
}

impl ObservabilityContext {
    /// The default context used outside of tests.
    pub fn global() -> Self {
        ObservabilityContext::Global
    }

    /// A context that records lines instead of emitting them, for assertions.
    pub fn buffered() -> Self {
        ObservabilityContext::Buffered(Mutex::new(Vec::new()))
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match self {
            ObservabilityContext::Global => match level {
                Level::Debug => log::debug!("{message}"),
                Level::Info => log::info!("{message}"),
                Level::Warn => log::warn!("{message}"),
                Level::Error => log::error!("{message}"),
            },
            ObservabilityContext::Buffered(buf) => {
                buf.lock().unwrap().push((level, message));
            }
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    /// Snapshot of recorded lines. Empty for `Global` contexts.
    pub fn lines(&self) -> Vec<(Level, String)> {
        match self {
            ObservabilityContext::Global => Vec::new(),
            ObservabilityContext::Buffered(buf) => buf.lock().unwrap().clone(),
        }
    }
}

impl Default for ObservabilityContext {
    fn default() -> Self {
        ObservabilityContext::global()
    }
}
