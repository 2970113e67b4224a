use std::fmt::Display;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Instant;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::TaskClass;

/// Runtime used when a spawn happens off any tokio runtime, e.g. from a
/// producer thread.
fn fallback_runtime() -> &'static Runtime {
	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		tracing::debug!("worker.fallback_runtime");
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("thingkit-fallback")
			.build()
			.expect("building the thingkit fallback runtime")
	})
}

fn runtime_handle() -> Handle {
	Handle::try_current().unwrap_or_else(|_| fallback_runtime().handle().clone())
}

/// Spawns an async task on the current runtime.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}

/// Runs `f` on the blocking pool inside a `blocking` span labelled `task`.
///
/// Invocation bodies run here, labelled with their invocation id, so they may
/// sleep, wait on a cancellation checkpoint, or do device I/O without stalling
/// the cooperative runtime. Queue and run times are traced per task.
///
/// # Panics
///
/// Panics if called off a runtime and the fallback runtime cannot be built.
pub fn spawn_blocking<F, R>(class: TaskClass, task: impl Display, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let span = tracing::debug_span!("blocking", worker_class = class.as_str(), task = %task);
	let queued = Instant::now();
	tracing::trace!(parent: &span, "worker.spawn_blocking");
	runtime_handle().spawn_blocking(move || {
		let _entered = span.enter();
		let started = Instant::now();
		let output = f();
		tracing::trace!(
			queued_us = started.duration_since(queued).as_micros() as u64,
			ran_us = started.elapsed().as_micros() as u64,
			"worker.blocking_done"
		);
		output
	})
}

/// Spawns a dedicated named OS thread, used for long-lived producers.
pub fn spawn_named_thread<F, R>(class: TaskClass, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(worker_class = class.as_str(), thread = %name, "worker.spawn_named_thread");
	std::thread::Builder::new().name(name).spawn(f)
}
