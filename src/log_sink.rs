//! Human-readable text log, drained by a low-priority task.
//!
//! `emit` never blocks: when the channel is full the line is dropped.

use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::String;

use crate::config::{LOG_LINE_LEN, LOG_QUEUE_DEPTH};

pub type LogLine = String<LOG_LINE_LEN>;

/// Best-effort text sink.
pub trait LogSink {
    fn emit(&self, text: &str);
}

impl<T: LogSink + ?Sized> LogSink for &T {
    fn emit(&self, text: &str) {
        (**self).emit(text)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl LogSink for NullLog {
    fn emit(&self, _text: &str) {}
}

/// Fills a line up to capacity and silently cuts the rest, on a char boundary.
struct LineWriter(LogLine);

impl Write for LineWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn line_from(text: &str) -> LogLine {
    let mut line = LineWriter(LogLine::new());
    let _ = line.write_str(text);
    line.0
}

/// Format straight into a stack line and emit it.
pub fn emit_fmt<L: LogSink + ?Sized>(sink: &L, args: fmt::Arguments<'_>) {
    let mut line = LineWriter(LogLine::new());
    let _ = line.write_fmt(args);
    sink.emit(&line.0);
}

pub struct LogChannel<const DEPTH: usize = LOG_QUEUE_DEPTH> {
    lines: Channel<CriticalSectionRawMutex, LogLine, DEPTH>,
}

impl<const DEPTH: usize> Default for LogChannel<DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DEPTH: usize> LogChannel<DEPTH> {
    pub const fn new() -> Self {
        Self {
            lines: Channel::new(),
        }
    }

    /// Wait for the next line. Only the log task should call this.
    pub async fn next_line(&self) -> LogLine {
        self.lines.receive().await
    }

    pub fn try_next_line(&self) -> Option<LogLine> {
        self.lines.try_receive().ok()
    }
}

impl<const DEPTH: usize> LogSink for LogChannel<DEPTH> {
    fn emit(&self, text: &str) {
        if self.lines.try_send(line_from(text)).is_err() {
            trace!("log channel full, line dropped");
        }
    }
}
