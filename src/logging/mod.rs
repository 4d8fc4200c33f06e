//! Structured, level-gated logging.
//!
//! Entries are appended to a configured file destination as one JSON
//! object per line, or as `[<timestamp>] <LEVEL>: <json>` text lines.
//! Values under sensitive keys are masked before serialization. A logger
//! without a destination, or whose destination could not be opened, is a
//! silent no-op.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::config::LoggingConfig;

/// Keys whose values are masked in every log entry.
const MASKED_KEYS: [&str; 4] = ["password", "auth", "token", "key"];

/// Log severity levels, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Everything, including per-command traces.
    Debug,
    /// Normal operational events.
    Info,
    /// Degraded but recoverable conditions.
    Warn,
    /// Failures.
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    /// Returns the level name as it appears in log output.
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Output format for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// `[<timestamp>] <LEVEL>: <json of fields>`.
    Text,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Json
    }
}

/// Level-gated log writer with sensitive-field masking.
///
/// The gate is a floor: a logger configured at `Warn` emits `Warn` and
/// `Error` entries and suppresses the rest.
#[derive(Debug)]
pub struct Logger {
    level: LogLevel,
    format: LogFormat,
    custom_fields: Vec<String>,
    sink: Option<Mutex<File>>,
}

impl Logger {
    /// Builds a logger from configuration.
    ///
    /// Destination setup failures emit a single warning to stderr and
    /// leave the logger as a no-op; they never fail construction.
    pub fn new(config: &LoggingConfig) -> Self {
        let sink = config.destination.as_ref().and_then(|path| {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        eprintln!("relaymail: log destination unavailable ({}): {}", path.display(), e);
                        return None;
                    }
                }
            }
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(Mutex::new(file)),
                Err(e) => {
                    eprintln!("relaymail: log destination unavailable ({}): {}", path.display(), e);
                    None
                }
            }
        });

        Self {
            level: config.level,
            format: config.format,
            custom_fields: config.custom_fields.clone(),
            sink,
        }
    }

    /// Logs at debug level.
    pub fn debug(&self, message: &str, data: Value) {
        self.log(LogLevel::Debug, message, data);
    }

    /// Logs at info level.
    pub fn info(&self, message: &str, data: Value) {
        self.log(LogLevel::Info, message, data);
    }

    /// Logs at warn level.
    pub fn warn(&self, message: &str, data: Value) {
        self.log(LogLevel::Warn, message, data);
    }

    /// Logs at error level.
    pub fn error(&self, message: &str, data: Value) {
        self.log(LogLevel::Error, message, data);
    }

    /// Writes one entry if the level passes the gate.
    pub fn log(&self, level: LogLevel, message: &str, data: Value) {
        if level < self.level {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };

        let entry = self.build_entry(level, message, &data);
        let line = match self.format {
            LogFormat::Json => serde_json::to_string(&entry).unwrap_or_else(|_| message.to_string()),
            LogFormat::Text => {
                let timestamp = entry
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut fields = entry;
                fields.remove("timestamp");
                fields.remove("level");
                format!(
                    "[{}] {}: {}",
                    timestamp,
                    level.name(),
                    serde_json::to_string(&fields).unwrap_or_default()
                )
            }
        };

        // Write failures are swallowed; the destination was reachable at
        // construction and a dead sink must not fail a send.
        if let Ok(mut file) = sink.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }

    fn build_entry(&self, level: LogLevel, message: &str, data: &Value) -> Map<String, Value> {
        let mut entry = Map::new();
        entry.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        entry.insert("level".into(), Value::String(level.name().into()));
        entry.insert("message".into(), Value::String(message.into()));

        if let Value::Object(fields) = data {
            for (key, value) in fields {
                entry.insert(key.clone(), mask_value(key, value));
            }
            // Configured custom fields are copied from the original
            // payload, bypassing the mask.
            for field in &self.custom_fields {
                if let Some(value) = fields.get(field) {
                    entry.insert(field.clone(), value.clone());
                }
            }
        }

        entry
    }
}

fn mask_value(key: &str, value: &Value) -> Value {
    if MASKED_KEYS.contains(&key) {
        Value::String("********".into())
    } else {
        value.clone()
    }
}
