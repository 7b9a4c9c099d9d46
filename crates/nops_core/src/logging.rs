//! Logging context shared by command invocations.
//!
//! A [`LogContext`] owns the verbosity threshold, the table of severity levels
//! and a buffer for records emitted while output is paused. Commands pause it
//! when they are constructed (`begin`) and release the buffered records once
//! the effective verbosity is known (`commit`).
//!
//! Records are handed to a [`LogSink`]. The default [`TracingSink`] forwards
//! them as `tracing` events; [`MemorySink`] keeps them for inspection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CommandResult, ValidationError};

/// Heading printed in front of every record by default.
pub const DEFAULT_HEADING: &str = "nops";

/// Level the context starts at before any command configures it.
pub const DEFAULT_LEVEL: &str = "info";

/// Name of the custom level registered by `configure`.
pub const SUCCESS_LEVEL: &str = "success";

/// Rank of the custom success level, just above `http`.
pub const SUCCESS_RANK: i64 = 3001;

/// Built-in severity levels and their ranks.
pub const DEFAULT_LEVELS: &[(&str, i64)] = &[
    ("silly", i64::MIN),
    ("verbose", 1000),
    ("info", 2000),
    ("timing", 2500),
    ("http", 3000),
    ("notice", 3500),
    ("warn", 4000),
    ("error", 5000),
    ("silent", i64::MAX),
];

/// Terminal colors a level may be displayed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

/// Display style attached to a severity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStyle {
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    pub bold: bool,
    pub inverse: bool,
}

impl LevelStyle {
    pub fn fg(color: Color) -> Self {
        Self {
            fg: Some(color),
            ..Self::default()
        }
    }

    pub fn bg(mut self, color: Color) -> Self {
        self.bg = Some(color);
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn inverse(mut self) -> Self {
        self.inverse = true;
        self
    }
}

/// A registered severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSpec {
    pub name: String,
    pub rank: i64,
    pub style: LevelStyle,
}

fn default_style(name: &str) -> LevelStyle {
    match name {
        "silly" => LevelStyle::fg(Color::Black).inverse(),
        "verbose" => LevelStyle::fg(Color::Blue).bg(Color::Black),
        "info" => LevelStyle::fg(Color::Green),
        "timing" => LevelStyle::fg(Color::Green).bg(Color::Black),
        "http" => LevelStyle::fg(Color::Green).bg(Color::Black),
        "notice" => LevelStyle::fg(Color::Blue).bg(Color::Black),
        "warn" => LevelStyle::fg(Color::Black).bg(Color::Yellow),
        "error" => LevelStyle::fg(Color::Red).bg(Color::Black),
        _ => LevelStyle::default(),
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub heading: String,
    pub level: String,
    pub rank: i64,
    pub style: LevelStyle,
    pub prefix: String,
    pub message: String,
}

impl Record {
    /// `prefix message`, or just the message when there is no prefix.
    pub fn line(&self) -> String {
        if self.prefix.is_empty() {
            self.message.clone()
        } else {
            format!("{} {}", self.prefix, self.message)
        }
    }
}

/// Destination for records that passed the verbosity threshold.
#[cfg_attr(test, mockall::automock)]
pub trait LogSink: Send + Sync {
    fn write(&self, record: &Record);
}

/// Forwards records to `tracing` under the `nops` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: &Record) {
        let line = record.line();
        let severity = record.level.as_str();
        let heading = record.heading.as_str();
        match record.rank {
            r if r < 1000 => tracing::trace!(target: "nops", heading, severity, "{}", line),
            r if r < 2000 => tracing::debug!(target: "nops", heading, severity, "{}", line),
            r if r < 4000 => tracing::info!(target: "nops", heading, severity, "{}", line),
            r if r < 5000 => tracing::warn!(target: "nops", heading, severity, "{}", line),
            _ => tracing::error!(target: "nops", heading, severity, "{}", line),
        }
    }
}

/// Keeps every record it receives.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines (`prefix message`) written at the given level.
    pub fn lines_at(&self, level: &str) -> Vec<String> {
        self.records()
            .iter()
            .filter(|r| r.level == level)
            .map(Record::line)
            .collect()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &Record) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

struct LogState {
    heading: String,
    level: String,
    threshold: i64,
    paused: bool,
    buffer: Vec<Record>,
    levels: HashMap<String, LevelSpec>,
}

impl LogState {
    fn new() -> Self {
        let levels = DEFAULT_LEVELS
            .iter()
            .map(|(name, rank)| {
                let spec = LevelSpec {
                    name: name.to_string(),
                    rank: *rank,
                    style: default_style(name),
                };
                (name.to_string(), spec)
            })
            .collect();

        Self {
            heading: DEFAULT_HEADING.to_string(),
            level: DEFAULT_LEVEL.to_string(),
            threshold: 2000,
            paused: false,
            buffer: Vec::new(),
            levels,
        }
    }
}

/// Shared handle to the logging state of a program run.
///
/// Cloning is cheap; all clones observe the same level, buffer and sink.
#[derive(Clone)]
pub struct LogContext {
    state: Arc<Mutex<LogState>>,
    sink: Arc<dyn LogSink>,
}

impl LogContext {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState::new())),
            sink,
        }
    }

    /// Context writing to [`TracingSink`].
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn with_heading(self, heading: impl Into<String>) -> Self {
        self.lock().heading = heading.into();
        self
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn heading(&self) -> String {
        self.lock().heading.clone()
    }

    /// Name of the current threshold level.
    pub fn level(&self) -> String {
        self.lock().level.clone()
    }

    pub fn has_level(&self, name: &str) -> bool {
        self.lock().levels.contains_key(name)
    }

    /// Set the threshold. Returns `false` and leaves it unchanged when the
    /// level is unknown.
    pub fn set_level(&self, name: &str) -> bool {
        let mut state = self.lock();
        match state.levels.get(name).map(|spec| spec.rank) {
            Some(rank) => {
                state.level = name.to_string();
                state.threshold = rank;
                true
            }
            None => false,
        }
    }

    /// Register a custom level. Returns `false` if it already exists.
    pub fn add_level(&self, name: &str, rank: i64, style: LevelStyle) -> bool {
        let mut state = self.lock();
        if state.levels.contains_key(name) {
            return false;
        }
        state.levels.insert(
            name.to_string(),
            LevelSpec {
                name: name.to_string(),
                rank,
                style,
            },
        );
        true
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Start buffering records instead of writing them.
    pub fn begin(&self) {
        self.lock().paused = true;
    }

    /// Apply `level` (if given and known), stop buffering and write the
    /// buffered records at or above the threshold.
    ///
    /// Returns whether the requested level was applied.
    pub fn commit(&self, level: Option<&str>) -> bool {
        let applied = level.map_or(true, |name| self.set_level(name));

        let flushed: Vec<Record> = {
            let mut state = self.lock();
            state.paused = false;
            let threshold = state.threshold;
            state
                .buffer
                .drain(..)
                .filter(|r| r.rank >= threshold)
                .collect()
        };

        for record in &flushed {
            self.sink.write(record);
        }
        applied
    }

    /// Stop buffering without changing the level.
    pub fn resume(&self) {
        self.commit(None);
    }

    /// Emit a record at `level`. Unknown levels are dropped.
    pub fn log(&self, level: &str, prefix: &str, message: impl fmt::Display) {
        let record = {
            let mut state = self.lock();
            let Some(spec) = state.levels.get(level).cloned() else {
                debug!("Dropping record for unknown log level: {}", level);
                return;
            };

            let record = Record {
                timestamp: Utc::now(),
                heading: state.heading.clone(),
                level: spec.name,
                rank: spec.rank,
                style: spec.style,
                prefix: prefix.to_string(),
                message: message.to_string(),
            };

            if state.paused {
                state.buffer.push(record);
                return;
            }
            if record.rank < state.threshold {
                return;
            }
            record
        };

        self.sink.write(&record);
    }

    pub fn silly(&self, prefix: &str, message: impl fmt::Display) {
        self.log("silly", prefix, message);
    }

    pub fn verbose(&self, prefix: &str, message: impl fmt::Display) {
        self.log("verbose", prefix, message);
    }

    pub fn info(&self, prefix: &str, message: impl fmt::Display) {
        self.log("info", prefix, message);
    }

    pub fn notice(&self, prefix: &str, message: impl fmt::Display) {
        self.log("notice", prefix, message);
    }

    pub fn warn(&self, prefix: &str, message: impl fmt::Display) {
        self.log("warn", prefix, message);
    }

    pub fn error(&self, prefix: &str, message: impl fmt::Display) {
        self.log("error", prefix, message);
    }

    /// A logger whose records are prefixed with `name`.
    pub fn scoped(&self, name: impl Into<String>) -> Logger {
        Logger {
            name: name.into(),
            context: self.clone(),
        }
    }

    /// Apply a command's effective verbosity and hand it its logger.
    ///
    /// Registers the `success` level if missing and releases everything
    /// buffered since `begin`. An unknown level is a validation failure of
    /// the command; the buffer stays paused in that case.
    pub fn configure(&self, name: &str, level: Option<&str>) -> CommandResult<Logger> {
        if let Some(level) = level {
            if !self.has_level(level) {
                return Err(ValidationError::new(
                    name,
                    format!("Unknown log level \"{}\"", level),
                )
                .into());
            }
        }

        self.add_level(
            SUCCESS_LEVEL,
            SUCCESS_RANK,
            LevelStyle::fg(Color::Green).bold(),
        );
        let logger = self.scoped(name);
        self.commit(level);
        Ok(logger)
    }
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("LogContext")
            .field("heading", &state.heading)
            .field("level", &state.level)
            .field("paused", &state.paused)
            .field("buffered", &state.buffer.len())
            .finish()
    }
}

/// Logging handle bound to one command.
#[derive(Clone, Debug)]
pub struct Logger {
    name: String,
    context: LogContext,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &LogContext {
        &self.context
    }

    pub fn log(&self, level: &str, message: impl fmt::Display) {
        self.context.log(level, &self.name, message);
    }

    pub fn silly(&self, message: impl fmt::Display) {
        self.log("silly", message);
    }

    pub fn verbose(&self, message: impl fmt::Display) {
        self.log("verbose", message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log("info", message);
    }

    pub fn notice(&self, message: impl fmt::Display) {
        self.log("notice", message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log("warn", message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log("error", message);
    }

    pub fn success(&self, message: impl fmt::Display) {
        self.log(SUCCESS_LEVEL, message);
    }
}
