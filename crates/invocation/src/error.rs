use thiserror::Error;
use thingkit_worker::Cancelled;
use uuid::Uuid;

/// Failures surfaced directly to callers of the [`ActionManager`](crate::ActionManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
	/// No invocation with this id is registered.
	#[error("no action invocation found with id {0}")]
	NotFound(Uuid),

	/// An invocation with this id is already registered.
	#[error("an invocation with id {0} already exists")]
	DuplicateId(Uuid),

	/// The text is not a uuid.
	#[error("invalid invocation id: {0}")]
	InvalidId(String),

	/// No action is registered under this path.
	#[error("no action registered at {0}")]
	UnknownAction(String),
}

/// Failure returned by an action body.
///
/// These never reach the engine's caller: the worker stores them in the
/// invocation record as its terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
	/// The body observed a cancellation request at a checkpoint.
	#[error("the invocation was cancelled")]
	Cancelled,

	/// The body failed for any other reason.
	#[error("{0}")]
	Failed(String),
}

impl ActionError {
	/// Wraps any displayable failure.
	pub fn failed(err: impl std::fmt::Display) -> Self {
		Self::Failed(err.to_string())
	}
}

impl From<Cancelled> for ActionError {
	fn from(_: Cancelled) -> Self {
		Self::Cancelled
	}
}

impl From<serde_json::Error> for ActionError {
	fn from(err: serde_json::Error) -> Self {
		Self::failed(err)
	}
}
