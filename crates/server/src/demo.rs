//! A synthetic camera thing exercising actions and the frame stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use thingkit_invocation::{Action, ActionError, ActionManager, CancelToken, Input, InvocationLogger, Message, ObserverRegistry, path_join};
use thingkit_stream::{EncodeError, FrameEncoder, FrameStream, StreamError};
use thingkit_worker::{Bridge, TaskClass, spawn_named_thread};

use crate::config::Config;

/// Names of the actions registered by [`DemoThing`].
pub const ACTIONS: [&str; 4] = ["count", "fail", "start_capture", "stop_capture"];

/// Property key announcing capture state changes.
pub const CAPTURING: &str = "capturing";

/// Uncompressed RGB frame.
#[derive(Debug, Clone)]
pub struct RgbFrame {
	pub width: u32,
	pub height: u32,
	pub pixels: Vec<u8>,
}

impl RgbFrame {
	/// Diagonal gradient shifted by `phase`, so consecutive frames differ.
	pub fn gradient(width: u32, height: u32, phase: u64) -> Self {
		let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
		for y in 0..height {
			for x in 0..width {
				let v = (u64::from(x) + u64::from(y) + phase) % 256;
				pixels.extend_from_slice(&[v as u8, (255 - v) as u8, (phase % 256) as u8]);
			}
		}
		Self { width, height, pixels }
	}
}

/// Encodes [`RgbFrame`]s as binary PPM images.
#[derive(Debug, Clone, Copy, Default)]
pub struct PpmEncoder;

impl FrameEncoder for PpmEncoder {
	type Frame = RgbFrame;

	fn encode(&self, frame: &RgbFrame) -> Result<Bytes, EncodeError> {
		let expected = frame.width as usize * frame.height as usize * 3;
		if frame.pixels.len() != expected {
			return Err(EncodeError(format!(
				"{}x{} frame needs {expected} bytes, got {}",
				frame.width,
				frame.height,
				frame.pixels.len()
			)));
		}
		let header = format!("P6\n{} {}\n255\n", frame.width, frame.height);
		let mut out = Vec::with_capacity(header.len() + expected);
		out.extend_from_slice(header.as_bytes());
		out.extend_from_slice(&frame.pixels);
		Ok(Bytes::from(out))
	}

	fn content_type(&self) -> &str {
		"image/x-portable-pixmap"
	}
}

/// Demo thing: a counter, a failing action and a capture switch over a frame stream.
pub struct DemoThing {
	path: String,
	manager: Arc<ActionManager>,
	stream: FrameStream<PpmEncoder>,
	capturing: Arc<AtomicBool>,
	bridge: Bridge,
	config: Config,
}

impl DemoThing {
	pub fn new(config: &Config, bridge: Bridge) -> Result<Self, StreamError> {
		let stream = FrameStream::new(config.stream.capacity, PpmEncoder, bridge.clone())?;
		let thing = Self {
			path: config.thing.path.clone(),
			manager: Arc::new(ActionManager::new(bridge.clone())),
			stream,
			capturing: Arc::new(AtomicBool::new(false)),
			bridge,
			config: config.clone(),
		};
		thing.register_actions();
		Ok(thing)
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn manager(&self) -> &Arc<ActionManager> {
		&self.manager
	}

	pub fn stream(&self) -> &FrameStream<PpmEncoder> {
		&self.stream
	}

	/// Full path of one of this thing's actions.
	pub fn action_path(&self, name: &str) -> String {
		path_join(&self.path, name)
	}

	fn register_actions(&self) {
		self.manager.register(Action::new("count", self.path.clone(), count));

		self.manager.register(Action::new("fail", self.path.clone(), |_input: Input, _token: &CancelToken, log: &InvocationLogger| {
			log.info(format_args!("about to fail on request"));
			Err(ActionError::failed("failure requested by caller"))
		}));

		let capturing = Arc::clone(&self.capturing);
		let stream = self.stream.clone();
		let announce = self.property_announcer();
		self.manager.register(Action::new(
			"start_capture",
			self.path.clone(),
			move |_input: Input, _token: &CancelToken, log: &InvocationLogger| {
				if !stream.is_streaming() {
					stream.reset(None).map_err(ActionError::failed)?;
					log.info(format_args!("stream restarted with {} slots", stream.capacity()));
				}
				let was = capturing.swap(true, Ordering::SeqCst);
				announce(json!(true));
				Ok(json!({ "capturing": true, "alreadyCapturing": was }))
			},
		));

		let capturing = Arc::clone(&self.capturing);
		let stream = self.stream.clone();
		let announce = self.property_announcer();
		self.manager.register(Action::new(
			"stop_capture",
			self.path.clone(),
			move |_input: Input, _token: &CancelToken, log: &InvocationLogger| {
				capturing.store(false, Ordering::SeqCst);
				stream.stop();
				announce(json!(false));
				log.info(format_args!("capture stopped at frame {}", stream.last_index()));
				Ok(json!({ "capturing": false, "lastIndex": stream.last_index() }))
			},
		));
	}

	/// Returns a callback publishing the capture state to observers of
	/// [`CAPTURING`], delivered on the cooperative runtime.
	fn property_announcer(&self) -> impl Fn(Value) + Send + Sync + 'static {
		let bridge = self.bridge.clone();
		let observers: Arc<ObserverRegistry> = Arc::clone(self.manager.observers());
		move |value| {
			let observers = Arc::clone(&observers);
			let message = Message::PropertyStatus {
				property: CAPTURING.to_string(),
				value,
			};
			bridge.call(move || {
				observers.publish(CAPTURING, message);
			});
		}
	}

	/// Starts the producer thread. It writes `frames` frames while capture is
	/// switched on, then returns how many were stored.
	///
	/// The producer never waits on readers: a slot still being read is skipped
	/// and the frame retried on the next tick.
	pub fn spawn_capture(&self, frames: usize) -> std::io::Result<JoinHandle<usize>> {
		let stream = self.stream.clone();
		let capturing = Arc::clone(&self.capturing);
		let (width, height) = (self.config.stream.width, self.config.stream.height);
		let interval = self.config.stream.frame_interval();
		let name = format!("capture{}", self.path.replace('/', "-"));

		spawn_named_thread(TaskClass::Capture, name, move || {
			let mut stored = 0;
			let mut phase = 0u64;
			while stored < frames {
				if capturing.load(Ordering::SeqCst) {
					match stream.add_frame(&RgbFrame::gradient(width, height, phase)) {
						Ok(true) => {
							stored += 1;
							phase += 1;
						}
						Ok(false) => tracing::warn!(phase, "capture.frame_dropped"),
						Err(err @ StreamError::Conflict { .. }) => tracing::debug!(error = %err, "capture.slot_busy"),
						Err(err) => {
							tracing::warn!(error = %err, "capture.failed");
							break;
						}
					}
				} else if !stream.is_streaming() {
					break;
				}
				std::thread::sleep(interval);
			}
			tracing::info!(stored, "capture.finished");
			stored
		})
	}
}

/// Counts up to `to` (default 10), pausing `interval_ms` (default 100) between steps
/// and reporting progress roughly every tenth of the way.
fn count(input: Input, token: &CancelToken, log: &InvocationLogger) -> Result<Value, ActionError> {
	let to = input.value().and_then(|v| v.get("to")).and_then(Value::as_u64).unwrap_or(10);
	let interval = input.value().and_then(|v| v.get("interval_ms")).and_then(Value::as_u64).unwrap_or(100);

	let report_every = (to / 10).max(1);
	for step in 1..=to {
		token.checkpoint(Duration::from_millis(interval))?;
		log.debug(format_args!("step {step} of {to}"));
		if step % report_every == 0 || step == to {
			log.progress(json!({ "step": step, "of": to }));
		}
	}
	log.info(format_args!("counted to {to}"));
	Ok(json!(to))
}
