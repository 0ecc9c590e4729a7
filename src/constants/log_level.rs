//! Verbosity levels and the log context threaded through the pipeline.
//!
//! Records still go through the `log` facade; the context only decides whether a
//! record is emitted, so two pipelines in one process can run with different
//! verbosity.

use std::str::FromStr;

/// Environment variable consulted by [`LogLevel::from_env`].
pub const LOG_LEVEL_ENV: &str = "SINGBOX_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Verbose,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Trace => "trace",
        }
    }

    /// Reads [`LOG_LEVEL_ENV`], falling back to `Verbose` when unset or unknown.
    pub fn from_env() -> Self {
        std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(LogLevel::Verbose)
    }

    /// Directive understood by `env_logger`.
    pub fn env_filter(self) -> &'static str {
        match self {
            LogLevel::Verbose => "debug",
            other => other.as_str(),
        }
    }

    fn to_log(self) -> Option<log::Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(log::Level::Error),
            LogLevel::Warn => Some(log::Level::Warn),
            LogLevel::Info => Some(log::Level::Info),
            LogLevel::Verbose => Some(log::Level::Debug),
            LogLevel::Trace => Some(log::Level::Trace),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "verbose" | "debug" => Ok(LogLevel::Verbose),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Verbosity plus a prefix identifying the emitting component.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub level: LogLevel,
    pub prefix: String,
}

impl Default for LogContext {
    fn default() -> Self {
        LogContext {
            level: LogLevel::Info,
            prefix: String::new(),
        }
    }
}

impl LogContext {
    pub fn new(level: LogLevel, prefix: impl Into<String>) -> Self {
        LogContext {
            level,
            prefix: prefix.into(),
        }
    }

    /// Silent context, handy in tests.
    pub fn off() -> Self {
        LogContext::new(LogLevel::Off, "")
    }

    /// Same level, nested prefix (`parent/child`).
    pub fn scoped(&self, child: &str) -> Self {
        let prefix = if self.prefix.is_empty() {
            child.to_string()
        } else {
            format!("{}/{}", self.prefix, child)
        };
        LogContext::new(self.level, prefix)
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level <= self.level
    }

    pub fn log(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let Some(lvl) = level.to_log() else {
            return;
        };
        if self.prefix.is_empty() {
            log::log!(lvl, "{}", args);
        } else {
            log::log!(lvl, "[{}] {}", self.prefix, args);
        }
    }

    pub fn error(&self, args: std::fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    pub fn warn(&self, args: std::fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    pub fn info(&self, args: std::fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    pub fn verbose(&self, args: std::fmt::Arguments<'_>) {
        self.log(LogLevel::Verbose, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Verbose);
        assert_eq!(" WARN ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_enabled_respects_context_level() {
        let ctx = LogContext::new(LogLevel::Warn, "test");
        assert!(ctx.enabled(LogLevel::Error));
        assert!(ctx.enabled(LogLevel::Warn));
        assert!(!ctx.enabled(LogLevel::Info));
        assert!(!LogContext::off().enabled(LogLevel::Error));
    }

    #[test]
    fn test_scoped_prefix() {
        let ctx = LogContext::new(LogLevel::Info, "batch");
        assert_eq!(ctx.scoped("source#1").prefix, "batch/source#1");
        assert_eq!(LogContext::off().scoped("x").prefix, "x");
    }
}
