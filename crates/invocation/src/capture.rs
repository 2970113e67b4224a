//! Tracing layer that routes events emitted inside an invocation into its log.
//!
//! [`Invocation`](crate::Invocation) bodies run inside an `invocation` span
//! carrying the invocation id. Any `tracing` event recorded within that span,
//! including events from driver code the body calls into, is copied into the
//! invocation's [`LogBuffer`]. The layer has to be installed on the process
//! subscriber for this to happen; records written through
//! [`InvocationLogger`](crate::InvocationLogger) never depend on it.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use uuid::Uuid;

use crate::log::{LogBuffer, LogLevel, LogRecord};

/// Name of the span every invocation body runs in.
pub const INVOCATION_SPAN: &str = "invocation";

/// Buffers of invocations currently running, by id.
static ACTIVE: LazyLock<Mutex<HashMap<Uuid, Arc<LogBuffer>>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Keeps an invocation's buffer reachable from the layer while it runs.
pub(crate) struct CaptureGuard {
	id: Uuid,
}

pub(crate) fn register(id: Uuid, buffer: Arc<LogBuffer>) -> CaptureGuard {
	ACTIVE.lock().insert(id, buffer);
	CaptureGuard { id }
}

impl Drop for CaptureGuard {
	fn drop(&mut self) {
		ACTIVE.lock().remove(&self.id);
	}
}

/// Span extension pointing at the buffer events should land in.
struct CaptureTarget(Arc<LogBuffer>);

/// A [`tracing_subscriber::Layer`] feeding invocation logs.
#[derive(Debug, Clone)]
pub struct InvocationLogLayer {
	min_level: LogLevel,
}

impl Default for InvocationLogLayer {
	fn default() -> Self {
		Self::new()
	}
}

impl InvocationLogLayer {
	/// Captures events at `Info` and above, matching [`InvocationLogger`](crate::InvocationLogger).
	pub fn new() -> Self {
		Self { min_level: LogLevel::Info }
	}

	#[must_use]
	pub fn with_level(mut self, min_level: LogLevel) -> Self {
		self.min_level = min_level;
		self
	}
}

struct IdVisitor(Option<Uuid>);

impl Visit for IdVisitor {
	fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
		if field.name() == "id" {
			self.0 = Uuid::parse_str(format!("{value:?}").trim_matches('"')).ok();
		}
	}

	fn record_str(&mut self, field: &Field, value: &str) {
		if field.name() == "id" {
			self.0 = Uuid::parse_str(value).ok();
		}
	}
}

/// Flattens an event into `message {key=value ...}`.
#[derive(Default)]
struct MessageVisitor {
	message: String,
	fields: String,
}

impl MessageVisitor {
	fn push_field(&mut self, name: &str, value: impl std::fmt::Display) {
		if !self.fields.is_empty() {
			self.fields.push(' ');
		}
		let _ = write!(self.fields, "{name}={value}");
	}

	fn finish(self, fallback: &str) -> String {
		let message = if self.message.is_empty() { fallback.to_string() } else { self.message };
		if self.fields.is_empty() {
			message
		} else {
			format!("{message} {{{}}}", self.fields)
		}
	}
}

impl Visit for MessageVisitor {
	fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
		if field.name() == "message" {
			self.message = format!("{value:?}");
		} else {
			self.push_field(field.name(), format_args!("{value:?}"));
		}
	}

	fn record_str(&mut self, field: &Field, value: &str) {
		if field.name() == "message" {
			self.message = value.to_string();
		} else {
			self.push_field(field.name(), value);
		}
	}
}

impl<S> tracing_subscriber::Layer<S> for InvocationLogLayer
where
	S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
	fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
		if attrs.metadata().name() != INVOCATION_SPAN {
			return;
		}
		let Some(span) = ctx.span(id) else {
			return;
		};
		let mut visitor = IdVisitor(None);
		attrs.record(&mut visitor);
		let Some(buffer) = visitor.0.and_then(|id| ACTIVE.lock().get(&id).cloned()) else {
			return;
		};
		span.extensions_mut().insert(CaptureTarget(buffer));
	}

	fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
		let metadata = event.metadata();
		let level = LogLevel::from(*metadata.level());
		if level < self.min_level {
			return;
		}

		let Some(buffer) = ctx
			.event_scope(event)
			.and_then(|scope| scope.into_iter().find_map(|span| span.extensions().get::<CaptureTarget>().map(|t| Arc::clone(&t.0))))
		else {
			return;
		};

		let mut visitor = MessageVisitor::default();
		event.record(&mut visitor);
		buffer.push(LogRecord {
			message: visitor.finish(metadata.name()),
			level,
			timestamp: Utc::now(),
			file: metadata.file().unwrap_or("<unknown>").to_string(),
			line: metadata.line().unwrap_or(0),
		});
	}
}

/// Installs a process-wide subscriber with the capture layer, once.
#[cfg(test)]
pub(crate) fn install_for_tests() {
	use std::sync::Once;

	use tracing_subscriber::layer::SubscriberExt;

	static INSTALL: Once = Once::new();
	INSTALL.call_once(|| {
		let subscriber = tracing_subscriber::registry().with(InvocationLogLayer::new());
		let _ = tracing::subscriber::set_global_default(subscriber);
	});
}
