//! Thingkit demo binary.
//!
//! Runs a synthetic camera thing on a single-threaded cooperative runtime:
//! - action invocations on worker threads, reported to a logging observer
//! - a capture thread feeding the frame ring buffer
//! - a multipart consumer following the live frame sequence

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use futures::StreamExt;
use serde_json::json;
use thingkit_invocation::{Input, InvocationStatus};
use thingkit_stream::multipart;
use thingkit_worker::{TaskClass, bridge, panic_message, spawn, spawn_blocking};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod config;
mod demo;
mod logging;

use config::Config;
use demo::{ACTIONS, CAPTURING, DemoThing};

/// Thingkit command line arguments.
#[derive(Parser, Debug)]
#[command(name = "thingkit")]
#[command(about = "Run a demo thing with actions and a live frame stream")]
struct Args {
	/// Path to a thingkit.toml
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	/// Frames to capture before stopping
	#[arg(short, long, default_value_t = 60)]
	frames: usize,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => Config::default(),
	};

	let level = if args.verbose { tracing::Level::DEBUG } else { config.log_level()? };
	logging::init(level)?;

	info!(path = %config.thing.path, capacity = config.stream.capacity, "Starting thingkit");

	let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
	runtime.block_on(run(config, args.frames))
}

async fn run(config: Config, frames: usize) -> anyhow::Result<()> {
	let (bridge, bridge_loop) = bridge();
	let shutdown = CancellationToken::new();
	let loop_task = spawn(TaskClass::Notify, bridge_loop.run_until(shutdown.clone()));

	let thing = DemoThing::new(&config, bridge)?;

	let (tx, mut rx) = mpsc::unbounded_channel();
	let observers = thing.manager().observers();
	let observer = observers.connect();
	for key in ACTIONS.map(|name| thing.action_path(name)).into_iter().chain([CAPTURING.to_string()]) {
		observers.subscribe(observer, key, tx.clone());
	}
	drop(tx);
	let observer_task = spawn(TaskClass::Notify, async move {
		while let Some(message) = rx.recv().await {
			match serde_json::to_string(&message) {
				Ok(text) => info!(message = %text, "observer"),
				Err(err) => tracing::warn!(error = %err, "observer.encode_failed"),
			}
		}
	});

	let count = thing
		.manager()
		.invoke(&thing.action_path("count"), json!({ "to": 1000, "interval_ms": 10 }).into())?;
	let fail = thing.manager().invoke(&thing.action_path("fail"), Input::Empty)?;

	let start = thing.manager().invoke(&thing.action_path("start_capture"), Input::Empty)?;
	if start.wait().await != InvocationStatus::Completed {
		return Err(anyhow!("start_capture ended as {}: {:?}", start.status(), start.error()));
	}

	let stream = thing.stream().clone();
	let consumer = spawn(TaskClass::Notify, async move {
		let mut body = Box::pin(multipart::frames(stream.frame_sequence(), stream.content_type()));
		let (mut chunks, mut bytes) = (0usize, 0usize);
		while let Some(chunk) = body.next().await {
			chunks += 1;
			bytes += chunk.len();
		}
		(chunks / 3, bytes)
	});

	let capture = thing.spawn_capture(frames)?;
	let stored = spawn_blocking(TaskClass::Capture, "capture-join", move || capture.join())
		.await?
		.map_err(|payload| anyhow!("capture thread panicked: {}", panic_message(payload.as_ref())))?;

	let stop = thing.manager().invoke(&thing.action_path("stop_capture"), Input::Empty)?;
	stop.wait().await;
	let (parts, bytes) = consumer.await?;
	info!(stored, parts, bytes, content_type = multipart::MULTIPART_CONTENT_TYPE, "stream finished");

	thing.manager().cancel(count.id())?;
	count.wait().await;
	fail.wait().await;

	for summary in thing.manager().list(None, Some(thing.path())) {
		info!(
			id = %summary.id,
			action = %summary.action,
			status = %summary.status,
			error = summary.error.as_deref().unwrap_or(""),
			log_records = summary.log.len(),
			"invocation"
		);
	}

	// let queued status events drain before the observer goes away
	tokio::time::sleep(Duration::from_millis(50)).await;
	thing.manager().observers().disconnect(observer);
	observer_task.await?;

	shutdown.cancel();
	let delivered = loop_task.await?;
	info!(delivered, "bridge stopped");
	Ok(())
}
