//! Bounded per-invocation log capture.

use std::collections::VecDeque;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

/// Maximum number of records retained per invocation.
pub const MAX_LOG_RECORDS: usize = 1000;

/// Log severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

impl From<tracing::Level> for LogLevel {
	fn from(level: tracing::Level) -> Self {
		match level {
			tracing::Level::ERROR => LogLevel::Error,
			tracing::Level::WARN => LogLevel::Warn,
			tracing::Level::INFO => LogLevel::Info,
			tracing::Level::DEBUG => LogLevel::Debug,
			tracing::Level::TRACE => LogLevel::Trace,
		}
	}
}

/// One captured log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
	pub message: String,
	pub level: LogLevel,
	pub timestamp: DateTime<Utc>,
	/// Source file of the call site.
	pub file: String,
	/// Source line of the call site.
	pub line: u32,
}

/// Fixed-capacity record list that evicts its oldest entry when full.
#[derive(Debug)]
pub struct LogBuffer {
	capacity: usize,
	records: Mutex<VecDeque<LogRecord>>,
}

impl Default for LogBuffer {
	fn default() -> Self {
		Self::new(MAX_LOG_RECORDS)
	}
}

impl LogBuffer {
	/// Creates an empty buffer.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn new(capacity: usize) -> Self {
		assert!(capacity > 0, "log buffer capacity must be > 0");
		Self {
			capacity,
			records: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
		}
	}

	/// Pushes a record, evicting the oldest if at capacity.
	pub fn push(&self, record: LogRecord) {
		let mut records = self.records.lock();
		if records.len() >= self.capacity {
			records.pop_front();
		}
		records.push_back(record);
	}

	/// Returns a snapshot of all retained records, oldest first.
	pub fn records(&self) -> Vec<LogRecord> {
		self.records.lock().iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.records.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.lock().is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}
}

/// Callback publishing an intermediate progress value to observers.
pub(crate) type ProgressSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Log and progress sink handed to an action body.
///
/// Every method records the caller's source location. Appending is a purely
/// in-memory operation and never blocks on I/O. Plain `tracing` events emitted
/// by the body land in the same buffer when
/// [`InvocationLogLayer`](crate::InvocationLogLayer) is installed.
#[derive(Clone)]
pub struct InvocationLogger {
	buffer: Arc<LogBuffer>,
	min_level: LogLevel,
	progress: Option<ProgressSink>,
}

impl fmt::Debug for InvocationLogger {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InvocationLogger")
			.field("records", &self.buffer.len())
			.field("min_level", &self.min_level)
			.field("progress", &self.progress.is_some())
			.finish()
	}
}

impl InvocationLogger {
	/// Creates a logger writing into `buffer`, keeping records at `Info` and above.
	pub fn new(buffer: Arc<LogBuffer>) -> Self {
		Self {
			buffer,
			min_level: LogLevel::Info,
			progress: None,
		}
	}

	pub(crate) fn with_progress(mut self, sink: ProgressSink) -> Self {
		self.progress = Some(sink);
		self
	}

	/// Reports intermediate progress to the action's observers.
	///
	/// Delivered after the running notification and before the terminal one.
	/// A logger not attached to a running invocation drops the value.
	pub fn progress(&self, value: impl Into<Value>) {
		if let Some(sink) = &self.progress {
			sink(value.into());
		}
	}

	/// Changes the minimum level that gets recorded.
	#[must_use]
	pub fn with_level(mut self, min_level: LogLevel) -> Self {
		self.min_level = min_level;
		self
	}

	/// Records one message.
	///
	/// A message whose formatting fails is dropped on its own; the caller is
	/// never interrupted.
	#[track_caller]
	pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
		if level < self.min_level {
			return;
		}
		let location = Location::caller();
		let mut message = String::new();
		if fmt::write(&mut message, args).is_err() {
			return;
		}
		self.buffer.push(LogRecord {
			message,
			level,
			timestamp: Utc::now(),
			file: location.file().to_string(),
			line: location.line(),
		});
	}

	#[track_caller]
	pub fn trace(&self, args: fmt::Arguments<'_>) {
		self.log(LogLevel::Trace, args);
	}

	#[track_caller]
	pub fn debug(&self, args: fmt::Arguments<'_>) {
		self.log(LogLevel::Debug, args);
	}

	#[track_caller]
	pub fn info(&self, args: fmt::Arguments<'_>) {
		self.log(LogLevel::Info, args);
	}

	#[track_caller]
	pub fn warn(&self, args: fmt::Arguments<'_>) {
		self.log(LogLevel::Warn, args);
	}

	#[track_caller]
	pub fn error(&self, args: fmt::Arguments<'_>) {
		self.log(LogLevel::Error, args);
	}
}
