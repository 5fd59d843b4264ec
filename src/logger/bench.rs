//! Leveled bench logging: colored console plus optional plain-text file.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use colored::Colorize;
use parking_lot::Mutex;

use crate::core::errors::{Result, SdhError};

// ──────────────────── levels ────────────────────

/// Three-level scheme used across the harness: debug (yellow), info (green),
/// error (red).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Error = 2,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

// ──────────────────── trait ────────────────────

/// Sink for harness log lines. Shared as `Arc<dyn BenchLog>` across the
/// experiment and command threads.
pub trait BenchLog: Send + Sync {
    fn log(&self, message: &str, level: LogLevel);

    fn debug(&self, message: &str) {
        self.log(message, LogLevel::Debug);
    }
    fn info(&self, message: &str) {
        self.log(message, LogLevel::Info);
    }
    fn error(&self, message: &str) {
        self.log(message, LogLevel::Error);
    }

    /// Visual separator between experiment phases.
    fn separator(&self) {
        self.log(&"─".repeat(70), LogLevel::Info);
    }
}

// ──────────────────── console + file logger ────────────────────

/// Standard logger: colored console output, optionally mirrored unstyled to a
/// log file.
pub struct ConsoleLogger {
    min_level: LogLevel,
    file: Mutex<Option<(PathBuf, File)>>,
}

impl ConsoleLogger {
    #[must_use]
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level,
            file: Mutex::new(None),
        }
    }

    /// Mirror all lines to `path`, appending.
    pub fn with_file(min_level: LogLevel, path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SdhError::io(path, e))?;
        Ok(Self {
            min_level,
            file: Mutex::new(Some((path.to_path_buf(), file))),
        })
    }
}

impl BenchLog for ConsoleLogger {
    fn log(&self, message: &str, level: LogLevel) {
        if level < self.min_level {
            return;
        }
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{stamp} [{:>5}] {message}", level.as_str());
        let colored_line = match level {
            LogLevel::Debug => line.yellow(),
            LogLevel::Info => line.green(),
            LogLevel::Error => line.red(),
        };
        println!("{colored_line}");

        let mut guard = self.file.lock();
        if let Some((path, file)) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                eprintln!("[SDH-LOG] write to {} failed: {e}", path.display());
            }
        }
    }
}

// ──────────────────── capture logger ────────────────────

/// In-memory logger for tests and embedders that inspect log output.
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, m)| m.contains(needle))
    }
}

impl BenchLog for MemoryLog {
    fn log(&self, message: &str, level: LogLevel) {
        self.lines.lock().push((level, message.to_string()));
    }
}
