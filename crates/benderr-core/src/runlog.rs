//! Per-run logging.
//!
//! A [`RunLog`] is created by the runner for each `run()` call. Every line
//! goes to the process log via `tracing`, optionally to a timestamped file in
//! the output directory, and onto the event bus as a `Log` event so detached
//! UIs see the same text. The value is owned by the runner; there is no
//! global handler state to reset between runs.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::bus::EventPublisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug)]
pub struct RunLog {
    file: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    publisher: Option<EventPublisher>,
}

impl RunLog {
    /// Log sink without a backing file.
    pub fn new(publisher: Option<EventPublisher>) -> Self {
        Self {
            file: None,
            path: None,
            publisher,
        }
    }

    /// Log sink backed by `<output_dir>/<yyyymmdd_HHMMSS>_run.log`.
    pub fn with_file(
        output_dir: &Path,
        publisher: Option<EventPublisher>,
    ) -> std::io::Result<Self> {
        fs::create_dir_all(output_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = output_dir.join(format!("{timestamp}_run.log"));
        let file = BufWriter::new(File::create(&path)?);
        Ok(Self {
            file: Some(file),
            path: Some(path),
            publisher,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn debug(&mut self, message: &str) {
        self.write(LogLevel::Debug, message);
    }

    pub fn info(&mut self, message: &str) {
        self.write(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.write(LogLevel::Warning, message);
    }

    pub fn error(&mut self, message: &str) {
        self.write(LogLevel::Error, message);
    }

    fn write(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        if let Some(file) = &mut self.file {
            // A failing log write must not take the run down with it.
            let line = format!(
                "{} - {} - {message}\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level.as_str()
            );
            if file.write_all(line.as_bytes()).is_err() || file.flush().is_err() {
                warn!("failed to write run log line");
            }
        }
        if let Some(publisher) = &self.publisher {
            publisher.log(message, level.as_str());
        }
    }
}
