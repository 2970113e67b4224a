//! Worker-side primitives shared by the invocation engine and frame streams.
//!
//! * [`spawn_blocking`] / [`spawn_named_thread`] place blocking work off the
//!   cooperative runtime, tagged with a [`TaskClass`].
//! * [`CancelToken`] is the cooperative cancellation flag checked by action
//!   bodies.
//! * [`Bridge`] lets those threads hand work back to the runtime.

mod bridge;
mod class;
mod panic;
mod spawn;
mod token;

pub use bridge::{Bridge, BridgeLoop, BridgeTask, bridge};
pub use class::TaskClass;
pub use panic::panic_message;
pub use spawn::{spawn, spawn_blocking, spawn_named_thread};
pub use token::{CancelToken, Cancelled};
