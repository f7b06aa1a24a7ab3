use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Privacy-preserving dispatch log.
///
/// Raw command text never reaches the log: callers pass the command
/// name token only, and the message redaction strips home paths as a
/// second line of defense. Entries are serialized as one JSON object
/// per line.
pub struct DispatchLogger {
    log_file_path: PathBuf,
    writer: Arc<Mutex<Option<std::fs::File>>>,
}

/// One structured log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<LogContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
}

/// Event categories for filtering the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogCategory {
    System,
    Configuration,
    Classification,
    Gate,
    Execution,
    Safety,
}

/// Privacy-safe structured fields attached to an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command_name(mut self, name: &str) -> Self {
        self.command_name = Some(name.to_string());
        self
    }

    pub fn with_tier(mut self, tier: &str) -> Self {
        self.tier = Some(tier.to_string());
        self
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = Some(strategy.to_string());
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_string());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }
}

impl DispatchLogger {
    pub fn new() -> Result<Self> {
        let log_file_path = Self::default_log_path()?;
        if let Some(parent) = log_file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self::at_path(log_file_path))
    }

    pub fn at_path(log_file_path: PathBuf) -> Self {
        Self {
            log_file_path,
            writer: Arc::new(Mutex::new(None)),
        }
    }

    fn default_log_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
        Ok(config_dir.join("tiershell").join("dispatch.log"))
    }

    pub fn log_error(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_entry(LogLevel::Error, category, message, context)
    }

    pub fn log_warning(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_entry(LogLevel::Warning, category, message, context)
    }

    pub fn log_info(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_entry(LogLevel::Info, category, message, context)
    }

    /// Safety events: lockdown refusals and force-execution bypasses.
    /// Always at least Warning so they survive any level filtering.
    pub fn log_safety_event(&self, event: &str, context: Option<LogContext>) -> Result<()> {
        self.write_entry(
            LogLevel::Warning,
            LogCategory::Safety,
            event.to_string(),
            context,
        )
    }

    fn write_entry(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            category,
            message: redact_sensitive_info(&message),
            context,
        };

        let mut writer_guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("Failed to acquire log writer lock"))?;

        if writer_guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file_path)?;
            *writer_guard = Some(file);
        }

        if let Some(ref mut file) = *writer_guard {
            writeln!(file, "{}", serde_json::to_string(&entry)?)?;
            file.flush()?;
        }

        Ok(())
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_file_path
    }
}

/// Strip path fragments that leak usernames.
fn redact_sensitive_info(message: &str) -> String {
    let mut redacted = message.to_string();

    redacted = regex::Regex::new(r"/home/[^/\s]+")
        .unwrap()
        .replace_all(&redacted, "/home/[USER]")
        .to_string();

    redacted = regex::Regex::new(r"/Users/[^/\s]+")
        .unwrap()
        .replace_all(&redacted, "/Users/[USER]")
        .to_string();

    redacted = regex::Regex::new(r"C:\\Users\\[^\\\s]+")
        .unwrap()
        .replace_all(&redacted, "C:\\Users\\[USER]")
        .to_string();

    redacted
}

/// Global logger instance
static GLOBAL_LOGGER: OnceLock<Arc<Mutex<DispatchLogger>>> = OnceLock::new();

/// Initialize the global logger
pub fn init_logger() -> Result<()> {
    let logger = DispatchLogger::new()?;
    let _ = GLOBAL_LOGGER.set(Arc::new(Mutex::new(logger)));
    Ok(())
}

/// Get the global logger instance
pub fn get_logger() -> Result<Arc<Mutex<DispatchLogger>>> {
    GLOBAL_LOGGER
        .get()
        .cloned()
        .ok_or_else(|| anyhow!("Logger not initialized. Call init_logger() first."))
}

#[macro_export]
macro_rules! log_warning {
    ($category:expr, $message:expr) => {
        if let Ok(logger) = $crate::logging::get_logger() {
            if let Ok(logger_guard) = logger.lock() {
                let _ = logger_guard.log_warning($category, $message.to_string(), None);
            }
        }
    };
    ($category:expr, $message:expr, $context:expr) => {
        if let Ok(logger) = $crate::logging::get_logger() {
            if let Ok(logger_guard) = logger.lock() {
                let _ = logger_guard.log_warning($category, $message.to_string(), Some($context));
            }
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($category:expr, $message:expr) => {
        if let Ok(logger) = $crate::logging::get_logger() {
            if let Ok(logger_guard) = logger.lock() {
                let _ = logger_guard.log_info($category, $message.to_string(), None);
            }
        }
    };
    ($category:expr, $message:expr, $context:expr) => {
        if let Ok(logger) = $crate::logging::get_logger() {
            if let Ok(logger_guard) = logger.lock() {
                let _ = logger_guard.log_info($category, $message.to_string(), Some($context));
            }
        }
    };
}

#[macro_export]
macro_rules! log_safety {
    ($message:expr, $context:expr) => {
        if let Ok(logger) = $crate::logging::get_logger() {
            if let Ok(logger_guard) = logger.lock() {
                let _ = logger_guard.log_safety_event($message, Some($context));
            }
        }
    };
}
