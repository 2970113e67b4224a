use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thingkit_worker::{CancelToken, panic_message};
use tokio::sync::watch;
use uuid::Uuid;

use crate::capture::{self, INVOCATION_SPAN};
use crate::error::ActionError;
use crate::log::{InvocationLogger, LogBuffer, LogRecord};
use crate::status::InvocationStatus;

/// Input handed to an action body.
///
/// `Empty` marks "no input was given", which is distinct from an explicit
/// JSON `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Input {
	#[default]
	Empty,
	Value(Value),
}

impl Input {
	/// Returns the payload, or `None` for [`Input::Empty`].
	pub fn value(&self) -> Option<&Value> {
		match self {
			Self::Empty => None,
			Self::Value(value) => Some(value),
		}
	}

	pub fn is_empty(&self) -> bool {
		matches!(self, Self::Empty)
	}
}

impl From<Value> for Input {
	fn from(value: Value) -> Self {
		Self::Value(value)
	}
}

impl From<Option<Value>> for Input {
	fn from(value: Option<Value>) -> Self {
		value.map_or(Self::Empty, Self::Value)
	}
}

/// Body of an action, invoked on a worker thread with a fixed contract.
pub trait ActionTarget: Send + Sync {
	fn invoke(&self, input: Input, token: &CancelToken, log: &InvocationLogger) -> Result<Value, ActionError>;
}

impl<F> ActionTarget for F
where
	F: Fn(Input, &CancelToken, &InvocationLogger) -> Result<Value, ActionError> + Send + Sync,
{
	fn invoke(&self, input: Input, token: &CancelToken, log: &InvocationLogger) -> Result<Value, ActionError> {
		self(input, token, log)
	}
}

/// A named operation exposed by a thing.
pub struct Action {
	name: String,
	owner: String,
	target: Arc<dyn ActionTarget>,
}

impl std::fmt::Debug for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Action").field("name", &self.name).field("owner", &self.owner).finish_non_exhaustive()
	}
}

impl Action {
	/// Creates an action from a closure.
	pub fn new<F>(name: impl Into<String>, owner: impl Into<String>, f: F) -> Self
	where
		F: Fn(Input, &CancelToken, &InvocationLogger) -> Result<Value, ActionError> + Send + Sync + 'static,
	{
		Self::from_target(name, owner, Arc::new(f))
	}

	/// Creates an action from an existing target object.
	pub fn from_target(name: impl Into<String>, owner: impl Into<String>, target: Arc<dyn ActionTarget>) -> Self {
		Self {
			name: name.into(),
			owner: owner.into(),
			target,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Path of the thing exposing this action.
	pub fn owner(&self) -> &str {
		&self.owner
	}

	/// Owner path joined with the action name, e.g. `/camera/capture`.
	pub fn path(&self) -> String {
		path_join(&self.owner, &self.name)
	}
}

/// Joins two path fragments with exactly one `/` between them.
pub fn path_join(base: &str, tail: &str) -> String {
	format!("{}/{}", base.trim_end_matches('/'), tail.trim_start_matches('/'))
}

/// Something observers of an invocation hear about.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InvocationEvent {
	Status(InvocationStatus),
	Progress(Value),
}

/// Callback fired on every status change and progress report, used to fan
/// events out to observers.
pub(crate) type EventHandle = Arc<dyn Fn(Uuid, InvocationEvent) + Send + Sync>;

#[derive(Debug)]
struct InvocationState {
	status: InvocationStatus,
	started_at: Option<DateTime<Utc>>,
	ended_at: Option<DateTime<Utc>>,
	output: Option<Value>,
	error: Option<String>,
}

/// One tracked execution of an [`Action`].
///
/// Status, output, error and timestamps are only changed under the
/// invocation's own lock, so a reader never sees a terminal status without its
/// end time or output.
pub struct Invocation {
	id: Uuid,
	action: Arc<Action>,
	input: Input,
	requested_at: DateTime<Utc>,
	state: Mutex<InvocationState>,
	status_tx: watch::Sender<InvocationStatus>,
	log: Arc<LogBuffer>,
	token: CancelToken,
}

/// Shared handle returned to submitters.
pub type InvocationHandle = Arc<Invocation>;

impl std::fmt::Debug for Invocation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Invocation")
			.field("id", &self.id)
			.field("action", &self.action.name)
			.field("status", &self.status())
			.finish_non_exhaustive()
	}
}

/// Immutable snapshot of an invocation, shaped for responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSummary {
	pub id: Uuid,
	pub action: String,
	pub href: String,
	pub status: InvocationStatus,
	pub time_requested: DateTime<Utc>,
	pub time_started: Option<DateTime<Utc>>,
	pub time_completed: Option<DateTime<Utc>>,
	pub input: Option<Value>,
	pub output: Option<Value>,
	pub error: Option<String>,
	pub log: Vec<LogRecord>,
}

impl Invocation {
	pub(crate) fn new(id: Uuid, action: Arc<Action>, input: Input) -> Self {
		let (status_tx, _) = watch::channel(InvocationStatus::Pending);
		Self {
			id,
			action,
			input,
			requested_at: Utc::now(),
			state: Mutex::new(InvocationState {
				status: InvocationStatus::Pending,
				started_at: None,
				ended_at: None,
				output: None,
				error: None,
			}),
			status_tx,
			log: Arc::new(LogBuffer::default()),
			token: CancelToken::new(),
		}
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn action(&self) -> &Arc<Action> {
		&self.action
	}

	pub fn input(&self) -> &Input {
		&self.input
	}

	pub fn status(&self) -> InvocationStatus {
		self.state.lock().status
	}

	pub fn output(&self) -> Option<Value> {
		self.state.lock().output.clone()
	}

	/// Failure detail, present only once cancelled or errored.
	pub fn error(&self) -> Option<String> {
		self.state.lock().error.clone()
	}

	pub fn requested_at(&self) -> DateTime<Utc> {
		self.requested_at
	}

	pub fn started_at(&self) -> Option<DateTime<Utc>> {
		self.state.lock().started_at
	}

	pub fn ended_at(&self) -> Option<DateTime<Utc>> {
		self.state.lock().ended_at
	}

	/// Captured log records, oldest first.
	pub fn log(&self) -> Vec<LogRecord> {
		self.log.records()
	}

	/// Requests cooperative cancellation unless already terminal.
	///
	/// Returns whether a request was made.
	pub fn cancel(&self) -> bool {
		let state = self.state.lock();
		if state.status.is_terminal() {
			return false;
		}
		drop(state);
		self.token.request();
		tracing::debug!(invocation = %self.id, "invocation.cancel_requested");
		true
	}

	/// Waits until the invocation reaches a terminal status.
	pub async fn wait(&self) -> InvocationStatus {
		let mut rx = self.status_tx.subscribe();
		match rx.wait_for(|status| status.is_terminal()).await {
			Ok(status) => *status,
			Err(_) => self.status(),
		}
	}

	/// Copies the current state out into a summary.
	pub fn summary(&self) -> InvocationSummary {
		let state = self.state.lock();
		InvocationSummary {
			id: self.id,
			action: self.action.path(),
			href: format!("/invocations/{}", self.id),
			status: state.status,
			time_requested: self.requested_at,
			time_started: state.started_at,
			time_completed: state.ended_at,
			input: self.input.value().cloned(),
			output: state.output.clone(),
			error: state.error.clone(),
			log: self.log.records(),
		}
	}

	fn transition(&self, state: &mut InvocationState, next: InvocationStatus) -> bool {
		if !state.status.can_become(next) {
			tracing::error!(invocation = %self.id, from = %state.status, to = %next, "invocation.illegal_transition");
			return false;
		}
		state.status = next;
		self.status_tx.send_replace(next);
		true
	}

	/// Worker-thread body: runs the target and records the outcome.
	pub(crate) fn run(&self, emit: &EventHandle) {
		let id = self.id;
		let progress = Arc::clone(emit);
		let logger = InvocationLogger::new(Arc::clone(&self.log)).with_progress(Arc::new(move |value: Value| progress(id, InvocationEvent::Progress(value))));

		{
			let mut state = self.state.lock();
			if !self.transition(&mut state, InvocationStatus::Running) {
				return;
			}
			state.started_at = Some(Utc::now());
			emit(self.id, InvocationEvent::Status(InvocationStatus::Running));
		}
		tracing::debug!(invocation = %self.id, action = %self.action.name, "invocation.running");

		let outcome = {
			let _capture = capture::register(self.id, Arc::clone(&self.log));
			let span = tracing::info_span!(INVOCATION_SPAN, id = %self.id, action = %self.action.path());
			span.in_scope(|| catch_unwind(AssertUnwindSafe(|| self.action.target.invoke(self.input.clone(), &self.token, &logger))))
		};

		let (next, output, error) = match outcome {
			Ok(Ok(value)) => (InvocationStatus::Completed, Some(value), None),
			Ok(Err(ActionError::Cancelled)) => (InvocationStatus::Cancelled, None, Some(ActionError::Cancelled.to_string())),
			Ok(Err(ActionError::Failed(detail))) => {
				logger.error(format_args!("invocation error: {detail}"));
				(InvocationStatus::Error, None, Some(detail))
			}
			Err(payload) => {
				let detail = format!("action panicked: {}", panic_message(payload.as_ref()));
				logger.error(format_args!("invocation error: {detail}"));
				(InvocationStatus::Error, None, Some(detail))
			}
		};

		let mut state = self.state.lock();
		if self.transition(&mut state, next) {
			state.output = output;
			state.error = error;
			state.ended_at = Some(Utc::now());
			emit(self.id, InvocationEvent::Status(next));
		}
		drop(state);
		tracing::debug!(invocation = %self.id, action = %self.action.name, status = %next, "invocation.finished");
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn noop_emit() -> EventHandle {
		Arc::new(|_, _| {})
	}

	#[test]
	fn path_join_normalizes_slashes() {
		assert_eq!(path_join("/thing/", "/act"), "/thing/act");
		assert_eq!(path_join("/thing", "act"), "/thing/act");
	}

	#[test]
	fn empty_input_is_not_null() {
		assert_eq!(Input::from(None), Input::Empty);
		assert_eq!(Input::from(Value::Null).value(), Some(&Value::Null));
	}

	#[test]
	fn run_is_taken_once() {
		let action = Arc::new(Action::new("double", "/thing", |input, _, _| {
			let n = input.value().and_then(Value::as_i64).unwrap_or(0);
			Ok(json!(n * 2))
		}));
		let invocation = Invocation::new(Uuid::new_v4(), action, json!(21).into());
		let emit = noop_emit();

		invocation.run(&emit);
		let first = invocation.summary();
		assert_eq!(first.status, InvocationStatus::Completed);
		assert_eq!(first.output, Some(json!(42)));

		invocation.run(&emit);
		assert_eq!(invocation.summary(), first, "a second run must not touch a terminal invocation");
	}

	#[test]
	fn summary_uses_response_field_names() {
		let action = Arc::new(Action::new("noop", "/thing", |_, _, _| Ok(Value::Null)));
		let invocation = Invocation::new(Uuid::nil(), action, Input::Empty);
		let summary = serde_json::to_value(invocation.summary()).unwrap();

		assert_eq!(summary["action"], "/thing/noop");
		assert_eq!(summary["href"], format!("/invocations/{}", Uuid::nil()));
		assert_eq!(summary["status"], "pending");
		assert!(summary["timeStarted"].is_null());
		assert!(summary["input"].is_null());
		assert!(summary.get("timeRequested").is_some());
	}
}
