//! Invocation engine for long-running actions.
//!
//! An [`ActionManager`] turns a submitted [`Action`] plus [`Input`] into a
//! tracked [`Invocation`], runs its body on the blocking pool and records the
//! outcome. Status changes fan out to [`ObserverRegistry`] subscribers through
//! the worker bridge. Installing [`InvocationLogLayer`] on the process
//! subscriber also captures `tracing` events emitted while a body runs.

mod capture;
mod engine;
mod error;
mod invocation;
pub mod log;
mod observers;
mod status;

pub use capture::{INVOCATION_SPAN, InvocationLogLayer};
pub use engine::ActionManager;
pub use error::{ActionError, EngineError};
pub use invocation::{Action, ActionTarget, Input, Invocation, InvocationHandle, InvocationSummary, path_join};
pub use log::{InvocationLogger, LogLevel, LogRecord};
pub use observers::{Message, ObserverId, ObserverRegistry, ObserverSender};
pub use status::InvocationStatus;
pub use thingkit_worker::{CancelToken, Cancelled};
