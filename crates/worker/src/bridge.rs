//! Cross-thread bridge onto the cooperative runtime.
//!
//! Worker threads (invocation bodies, capture loops) cannot touch state owned
//! by the single-threaded runtime directly, and the runtime must never block on
//! a thread primitive. A [`Bridge`] enqueues work from any thread; the
//! [`BridgeLoop`] dequeues and runs it on the runtime's own thread.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::panic::panic_message;

/// Unit of work delivered across the bridge.
pub type BridgeTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Submitting side of the bridge. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct Bridge {
	tx: mpsc::UnboundedSender<BridgeTask>,
}

impl std::fmt::Debug for Bridge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Bridge").field("closed", &self.tx.is_closed()).finish()
	}
}

/// Runtime side of the bridge.
pub struct BridgeLoop {
	rx: mpsc::UnboundedReceiver<BridgeTask>,
}

/// Creates a connected bridge and its loop.
pub fn bridge() -> (Bridge, BridgeLoop) {
	let (tx, rx) = mpsc::unbounded_channel();
	(Bridge { tx }, BridgeLoop { rx })
}

impl Bridge {
	/// Enqueues a future to run on the loop's runtime. Never blocks.
	///
	/// Returns `false` when the loop has been dropped; the task is discarded.
	pub fn submit<F>(&self, fut: F) -> bool
	where
		F: Future<Output = ()> + Send + 'static,
	{
		if self.tx.send(Box::pin(fut)).is_err() {
			tracing::debug!("bridge.closed");
			return false;
		}
		true
	}

	/// Enqueues a plain closure.
	pub fn call<F>(&self, f: F) -> bool
	where
		F: FnOnce() + Send + 'static,
	{
		self.submit(async move { f() })
	}

	/// Returns true once the loop side is gone.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

impl BridgeLoop {
	/// Runs submitted tasks in order until every [`Bridge`] handle is dropped.
	///
	/// Returns the number of tasks executed.
	pub async fn run(self) -> usize {
		self.run_until(CancellationToken::new()).await
	}

	/// Like [`run`](Self::run), but also stops when `shutdown` is cancelled.
	pub async fn run_until(mut self, shutdown: CancellationToken) -> usize {
		let mut executed = 0usize;
		loop {
			let task = tokio::select! {
				biased;
				_ = shutdown.cancelled() => break,
				task = self.rx.recv() => match task {
					Some(task) => task,
					None => break,
				},
			};
			execute(task).await;
			executed = executed.wrapping_add(1);
		}
		tracing::debug!(executed, "bridge.loop_exit");
		executed
	}

	/// Runs every task already queued without waiting for more.
	pub async fn drain(&mut self) -> usize {
		let mut executed = 0usize;
		while let Ok(task) = self.rx.try_recv() {
			execute(task).await;
			executed = executed.wrapping_add(1);
		}
		executed
	}
}

async fn execute(task: BridgeTask) {
	if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
		tracing::warn!(error = %panic_message(payload.as_ref()), "bridge.task_panicked");
	}
}
