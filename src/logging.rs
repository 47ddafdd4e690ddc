use std::fmt::Display;

use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Log level selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }

    /// Map `-q` and the `-v` count onto a level: quiet is warn, none is
    /// info, one is debug, two or more is trace.
    pub fn from_verbosity(count: u8, quiet: bool) -> Self {
        match (quiet, count) {
            (true, _) => LogLevel::Warn,
            (false, 0) => LogLevel::Info,
            (false, 1) => LogLevel::Debug,
            (false, _) => LogLevel::Trace,
        }
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` takes precedence.
pub fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        eprintln!("Warning: logging system already initialized");
    }
}

/// Result extension for best-effort pipeline steps.
pub trait ResultExt<T> {
    /// Log a failed step as a warning and continue with `None`.
    fn warn_and_continue(self, step: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T> for Result<T, E> {
    fn warn_and_continue(self, step: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(step, %error, "step failed; continuing");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_failed_step_when_warn_and_continue_then_none_is_returned() {
        let result: Result<u32, String> = Err("boom".to_string());
        assert_eq!(result.warn_and_continue("fill_holes"), None);

        let ok: Result<u32, String> = Ok(3);
        assert_eq!(ok.warn_and_continue("fill_holes"), Some(3));
    }

    #[test]
    fn given_verbosity_count_when_mapping_then_each_level_is_reachable() {
        assert_eq!(LogLevel::from_verbosity(0, false), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(2, false), LogLevel::Trace);
        assert_eq!(LogLevel::from_verbosity(5, false).as_str(), "trace");
        assert_eq!(LogLevel::from_verbosity(0, true), LogLevel::Warn);
        assert_eq!(LogLevel::Warn.as_str(), "warn");
    }
}
