use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned by [`CancelToken::checkpoint`] once cancellation has been requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the invocation was cancelled")]
pub struct Cancelled;

struct TokenState {
	requested: Mutex<bool>,
	wake: Condvar,
}

/// One-shot cooperative cancellation flag owned by a single invocation.
///
/// Cancellation is only observed where the running code calls
/// [`checkpoint`](Self::checkpoint). Requesting never interrupts a blocking
/// call made elsewhere in the target.
#[derive(Clone)]
pub struct CancelToken {
	state: Arc<TokenState>,
}

impl std::fmt::Debug for CancelToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CancelToken").field("requested", &self.is_requested()).finish()
	}
}

impl Default for CancelToken {
	fn default() -> Self {
		Self::new()
	}
}

impl CancelToken {
	/// Creates an unset token.
	pub fn new() -> Self {
		Self {
			state: Arc::new(TokenState {
				requested: Mutex::new(false),
				wake: Condvar::new(),
			}),
		}
	}

	/// Requests cancellation. Idempotent and callable from any thread.
	pub fn request(&self) {
		let mut requested = self.state.requested.lock();
		if *requested {
			return;
		}
		*requested = true;
		drop(requested);
		self.state.wake.notify_all();
		tracing::trace!("token.request");
	}

	/// Returns true once cancellation has been requested.
	pub fn is_requested(&self) -> bool {
		*self.state.requested.lock()
	}

	/// Blocks for up to `timeout` and fails as soon as cancellation is observed.
	///
	/// A zero timeout checks the flag and returns immediately. This blocks the
	/// calling thread; only call it from worker threads.
	pub fn checkpoint(&self, timeout: Duration) -> Result<(), Cancelled> {
		let mut requested = self.state.requested.lock();
		if timeout.is_zero() || *requested {
			return if *requested { Err(Cancelled) } else { Ok(()) };
		}

		let deadline = Instant::now() + timeout;
		while !*requested {
			if self.state.wake.wait_until(&mut requested, deadline).timed_out() {
				break;
			}
		}
		if *requested { Err(Cancelled) } else { Ok(()) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_timeout_checkpoint_returns_immediately() {
		let token = CancelToken::new();
		let start = Instant::now();
		assert_eq!(token.checkpoint(Duration::ZERO), Ok(()));
		assert!(start.elapsed() < Duration::from_millis(50));

		token.request();
		assert_eq!(token.checkpoint(Duration::ZERO), Err(Cancelled));
	}

	#[test]
	fn request_is_idempotent() {
		let token = CancelToken::new();
		token.request();
		token.request();
		assert!(token.is_requested());
		assert_eq!(token.checkpoint(Duration::from_secs(5)), Err(Cancelled));
	}

	#[test]
	fn checkpoint_times_out_when_not_requested() {
		let token = CancelToken::new();
		let start = Instant::now();
		assert_eq!(token.checkpoint(Duration::from_millis(20)), Ok(()));
		assert!(start.elapsed() >= Duration::from_millis(20));
	}

	#[test]
	fn checkpoint_wakes_on_request_from_another_thread() {
		let token = CancelToken::new();
		let remote = token.clone();
		let requester = std::thread::spawn(move || {
			std::thread::sleep(Duration::from_millis(10));
			remote.request();
		});

		let start = Instant::now();
		assert_eq!(token.checkpoint(Duration::from_secs(10)), Err(Cancelled));
		assert!(start.elapsed() < Duration::from_secs(5), "checkpoint should wake early");
		requester.join().unwrap();
	}
}
