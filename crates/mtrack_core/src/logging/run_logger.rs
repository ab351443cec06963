//! Per-run logger with file output.
//!
//! Each batch or match run gets its own logger that:
//! - Writes to a dedicated log file (when a directory is configured)
//! - Mirrors every message to `tracing`
//! - Filters progress to fixed steps
//! - Maintains a tail buffer for error summaries
//!
//! The logger is shared by the worker threads of a run.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::types::{LogConfig, LogLevel, MessagePrefix};

pub struct RunLogger {
    run_name: String,
    log_path: Option<PathBuf>,
    file_writer: Mutex<Option<BufWriter<File>>>,
    config: LogConfig,
    tail_buffer: Mutex<VecDeque<String>>,
    last_progress: Mutex<u32>,
}

impl RunLogger {
    /// Create a logger writing `<log_dir>/<run_name>_<timestamp>.log`.
    pub fn new(
        run_name: impl Into<String>,
        log_dir: impl AsRef<Path>,
        config: LogConfig,
    ) -> std::io::Result<Self> {
        let run_name = run_name.into();
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("{}_{}.log", sanitize_filename(&run_name), stamp));
        let file = File::create(&log_path)?;

        let mut logger = Self::without_file(run_name, config);
        logger.file_writer = Mutex::new(Some(BufWriter::new(file)));
        logger.log_path = Some(log_path);
        Ok(logger)
    }

    /// Logger that only mirrors to `tracing` and keeps the tail.
    pub fn without_file(run_name: impl Into<String>, config: LogConfig) -> Self {
        let tail = config.error_tail.max(1);
        Self {
            run_name: run_name.into(),
            log_path: None,
            file_writer: Mutex::new(None),
            config,
            tail_buffer: Mutex::new(VecDeque::with_capacity(tail)),
            last_progress: Mutex::new(0),
        }
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Log a message at the specified level.
    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.config.level {
            return;
        }
        mirror(level, message);
        self.remember(message);
        self.write_line(&self.format_message(message));
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, &MessagePrefix::Warning.format(message));
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, &MessagePrefix::Error.format(message));
    }

    pub fn phase(&self, phase_name: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Phase.format(phase_name));
    }

    pub fn section(&self, section_name: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Section.format(section_name));
    }

    pub fn success(&self, message: &str) {
        self.log(LogLevel::Info, &MessagePrefix::Success.format(message));
    }

    /// Log overall progress, only at `progress_step` intervals.
    ///
    /// Returns true if the progress was logged, false if filtered.
    pub fn progress(&self, percent: u32) -> bool {
        let step = self.config.progress_step.max(1);
        {
            let mut last = self.last_progress.lock();
            let current_step = (percent / step) * step;
            let last_step = (*last / step) * step;
            if current_step <= last_step && percent < 100 {
                return false;
            }
            *last = percent;
        }
        self.info(&format!("Progress: {}%", percent));
        true
    }

    /// Write the tail buffer under a header (typically after an error).
    pub fn show_tail(&self, header: &str) {
        let lines = self.get_tail();
        if lines.is_empty() {
            return;
        }
        self.write_line(&self.format_message(&format!("[{}/tail]", header)));
        for line in &lines {
            self.write_line(&self.format_message(line));
        }
    }

    pub fn get_tail(&self) -> Vec<String> {
        self.tail_buffer.lock().iter().cloned().collect()
    }

    pub fn clear_tail(&self) {
        self.tail_buffer.lock().clear();
    }

    pub fn flush(&self) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writer.flush();
        }
    }

    /// Flush and release the log file.
    pub fn close(&self) {
        self.flush();
        *self.file_writer.lock() = None;
    }

    fn format_message(&self, message: &str) -> String {
        if self.config.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S");
            format!("[{}] {}", timestamp, message)
        } else {
            message.to_string()
        }
    }

    fn remember(&self, message: &str) {
        let mut buffer = self.tail_buffer.lock();
        if buffer.len() >= self.config.error_tail.max(1) {
            buffer.pop_front();
        }
        buffer.push_back(message.to_string());
    }

    fn write_line(&self, formatted: &str) {
        if let Some(ref mut writer) = *self.file_writer.lock() {
            let _ = writeln!(writer, "{}", formatted);
        }
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn mirror(level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warn => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
    }
}

/// Sanitize a string to be safe for use as a filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_log_file() {
        let dir = tempdir().unwrap();
        let logger = RunLogger::new("batch", dir.path(), LogConfig::default()).unwrap();

        let path = logger.log_path().unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("batch_"));
    }

    #[test]
    fn writes_to_file() {
        let dir = tempdir().unwrap();
        let logger = RunLogger::new("batch", dir.path(), LogConfig::default()).unwrap();

        logger.info("Test message");
        logger.warn("Careful");
        logger.debug("Hidden at info level");
        logger.flush();

        let content = fs::read_to_string(logger.log_path().unwrap()).unwrap();
        assert!(content.contains("Test message"));
        assert!(content.contains("[WARNING] Careful"));
        assert!(!content.contains("Hidden"));
    }

    #[test]
    fn progress_is_filtered_to_steps() {
        let logger = RunLogger::without_file("run", LogConfig::default());

        assert!(!logger.progress(5));
        assert!(!logger.progress(15));
        assert!(logger.progress(20));
        assert!(!logger.progress(25));
        assert!(logger.progress(40));
        assert!(logger.progress(100));
    }

    #[test]
    fn tail_buffer_maintains_limit() {
        let config = LogConfig {
            error_tail: 5,
            ..LogConfig::default()
        };
        let logger = RunLogger::without_file("run", config);

        for i in 0..10 {
            logger.info(&format!("Line {}", i));
        }

        let tail = logger.get_tail();
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[0], "Line 5");
        assert_eq!(tail[4], "Line 9");
    }

    #[test]
    fn sanitizes_filename() {
        assert_eq!(sanitize_filename("normal_name"), "normal_name");
        assert_eq!(sanitize_filename("has/slash"), "has_slash");
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
    }
}
