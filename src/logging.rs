//! # Logging Module
//!
//! Two pieces live here. [`ColorizedFormatter`] renders user-facing console
//! output with one color per severity level and no extra metadata.
//! [`RunLog`] is the scoped, buffering sink used by concurrent test
//! executions: every record produced during a run is buffered and written to
//! the run's `output.txt`, then replayed to the console at its original
//! severity once the pair has completed, so parallel runs never interleave
//! console output mid-line.

use chrono::{DateTime, Local};
use colored::*;
use std::fmt;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// A custom tracing event formatter for colorizing log output based on level.
///
/// The entire log line is colored according to its severity, without
/// timestamps or level prefixes.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the formatted fields to apply color to the entire line.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// One buffered record of a test run.
#[derive(Debug, Clone)]
struct RunRecord {
    level: Level,
    time: DateTime<Local>,
    message: String,
}

/// Per-run buffering log sink.
///
/// Each test execution owns one `RunLog`. Records accumulate in memory for
/// the lifetime of the run; [`RunLog::write_to`] persists them as the run's
/// `output.txt` during log promotion, and [`RunLog::replay`] emits them
/// through the process-wide tracing subscriber in their original order and
/// severity.
#[derive(Debug, Default)]
pub struct RunLog {
    records: Mutex<Vec<RunRecord>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, level: Level, message: String) {
        self.records.lock().unwrap().push(RunRecord {
            level,
            time: Local::now(),
            message,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(Level::DEBUG, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(Level::INFO, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(Level::WARN, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(Level::ERROR, message.into());
    }

    /// Replay all buffered records through the global subscriber.
    ///
    /// Called from the pair loop after the run has finished, where only one
    /// replay happens at a time.
    pub fn replay(&self) {
        for record in self.records.lock().unwrap().iter() {
            match record.level {
                Level::ERROR => tracing::error!("{}", record.message),
                Level::WARN => tracing::warn!("{}", record.message),
                Level::INFO => tracing::info!("{}", record.message),
                _ => tracing::debug!("{}", record.message),
            }
        }
    }

    /// Write the buffered records to `path` as plain timestamped lines.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        for record in self.records.lock().unwrap().iter() {
            writeln!(
                file,
                "{} {}",
                record.time.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.message
            )?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_buffers_in_order() {
        let log = RunLog::new();
        log.debug("first");
        log.info("second");
        log.warn("third");
        assert_eq!(log.len(), 3);

        let records = log.records.lock().unwrap();
        assert_eq!(records[0].message, "first");
        assert_eq!(records[0].level, Level::DEBUG);
        assert_eq!(records[2].message, "third");
        assert_eq!(records[2].level, Level::WARN);
    }

    #[test]
    fn run_log_writes_timestamped_lines() {
        let log = RunLog::new();
        log.info("hello matrix");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        log.write_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.trim_end().ends_with("hello matrix"));
    }
}
