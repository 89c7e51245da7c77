//! Log bridge between the engine and the embedding application.
//!
//! The engine logs through the `log` facade. A host app (Swift, Kotlin, ...)
//! implements [`Logger`] and installs it once with [`set_logger`]; every
//! engine log line is then forwarded to the host's own logging pipeline.

use std::sync::{Arc, OnceLock};

/// Trait representing a logger that can receive messages at various levels.
///
/// # Examples
///
/// ```rust
/// use pointskit_core::logger::{LogLevel, Logger};
///
/// struct PrintLogger;
///
/// impl Logger for PrintLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{level:?}] {message}");
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    fn log(&self, level: LogLevel, message: String);
}

/// Enumeration of possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Very low priority, extremely detailed messages.
    Trace,
    /// Lower priority debugging information.
    Debug,
    /// Informational messages highlighting progress.
    Info,
    /// Potentially harmful situations.
    Warn,
    /// Error events that still allow the engine to continue.
    Error,
}

/// Forwards `log` records to the user-provided [`Logger`] implementation.
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let is_engine_record = record
            .module_path()
            .is_some_and(|module_path| module_path.starts_with("pointskit"));

        let is_debug_or_trace =
            record.level() == log::Level::Debug || record.level() == log::Level::Trace;

        // Skip low-level chatter from other crates.
        if is_debug_or_trace && !is_engine_record {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            let level = log_level(record.level());
            let message = format!("{}", record.args());
            logger.log(level, message);
        }
    }

    fn flush(&self) {}
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

/// The globally installed host logger.
static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Installs the host logger. Call this once, before the engine starts.
///
/// Subsequent calls are ignored, as are calls after another `log` backend
/// has been installed by the host process.
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        log::warn!("pointskit logger was already set; ignoring");
        return;
    }

    // The process may already carry a global `log` backend (e.g. in tests);
    // in that case records simply flow through the existing one.
    let _ = log::set_boxed_logger(Box::new(ForeignLogger));
    log::set_max_level(log::LevelFilter::Trace);
}
