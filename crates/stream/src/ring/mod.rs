//! Fixed-capacity frame ring buffer with one producer and many async readers.
//!
//! The producer runs on its own thread and must never stall, so a write into
//! a slot that still has readers fails with [`StreamError::Conflict`] instead
//! of waiting. Reader counts and write-slot selection share one critical
//! section. New-frame notifications cross to the cooperative runtime through
//! the worker [`Bridge`].

use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use thingkit_worker::Bridge;
use tokio::sync::watch;

use crate::encoder::FrameEncoder;
use crate::error::{InvalidIndex, StreamError};

#[cfg(test)]
mod tests;

/// Slot index meaning "never written".
pub const UNWRITTEN: i64 = -1;

#[derive(Debug, Clone)]
struct Slot {
	frame: Bytes,
	timestamp: DateTime<Utc>,
	index: i64,
	readers: usize,
}

impl Slot {
	fn empty() -> Self {
		Self {
			frame: Bytes::new(),
			timestamp: DateTime::<Utc>::MIN_UTC,
			index: UNWRITTEN,
			readers: 0,
		}
	}
}

#[derive(Debug)]
struct RingState {
	slots: Vec<Slot>,
	last_index: i64,
	streaming: bool,
	/// Bumped by every reset so guards taken earlier leave new slots alone.
	epoch: u64,
}

impl RingState {
	fn capacity(&self) -> usize {
		self.slots.len()
	}

	fn oldest_readable(&self) -> i64 {
		self.last_index - self.capacity() as i64 + 2
	}
}

/// Write and stop notifications, tagged with the epoch they were raised in.
///
/// Delivery through the bridge is deferred, so a signal may land after a
/// reset; waiters drop signals from any epoch but the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameSignal {
	Idle,
	Frame { epoch: u64, index: i64 },
	Stopped { epoch: u64 },
}

struct Shared<E> {
	state: Arc<Mutex<RingState>>,
	writer: Mutex<()>,
	signal: Arc<watch::Sender<FrameSignal>>,
	encoder: E,
	bridge: Bridge,
}

/// A live stream of encoded frames.
pub struct FrameStream<E: FrameEncoder> {
	shared: Arc<Shared<E>>,
}

impl<E: FrameEncoder> Clone for FrameStream<E> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<E: FrameEncoder> std::fmt::Debug for FrameStream<E> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.shared.state.lock();
		f.debug_struct("FrameStream")
			.field("capacity", &state.capacity())
			.field("last_index", &state.last_index)
			.field("streaming", &state.streaming)
			.finish()
	}
}

fn check_capacity(capacity: usize) -> Result<(), StreamError> {
	if capacity < 2 {
		return Err(StreamError::InvalidCapacity(capacity));
	}
	Ok(())
}

impl<E: FrameEncoder> FrameStream<E> {
	/// Creates a streaming buffer of `capacity` empty slots.
	///
	/// Capacity must be at least 2: the slot about to be written is never
	/// readable, so a single slot could never serve a reader.
	pub fn new(capacity: usize, encoder: E, bridge: Bridge) -> Result<Self, StreamError> {
		check_capacity(capacity)?;
		let (signal, _) = watch::channel(FrameSignal::Idle);
		Ok(Self {
			shared: Arc::new(Shared {
				state: Arc::new(Mutex::new(RingState {
					slots: vec![Slot::empty(); capacity],
					last_index: UNWRITTEN,
					streaming: true,
					epoch: 0,
				})),
				writer: Mutex::new(()),
				signal: Arc::new(signal),
				encoder,
				bridge,
			}),
		})
	}

	/// Clears every slot and restarts streaming, optionally resizing.
	pub fn reset(&self, capacity: Option<usize>) -> Result<(), StreamError> {
		let mut state = self.shared.state.lock();
		let capacity = capacity.unwrap_or(state.capacity());
		check_capacity(capacity)?;
		state.slots = vec![Slot::empty(); capacity];
		state.last_index = UNWRITTEN;
		state.streaming = true;
		state.epoch = state.epoch.wrapping_add(1);
		tracing::debug!(capacity, epoch = state.epoch, "stream.reset");
		Ok(())
	}

	/// Stops streaming. Readers holding a frame keep it; waiting sequences end.
	pub fn stop(&self) {
		let epoch = {
			let mut state = self.shared.state.lock();
			state.streaming = false;
			state.epoch
		};
		tracing::debug!(epoch, "stream.stop");
		self.notify(FrameSignal::Stopped { epoch });
	}

	pub fn is_streaming(&self) -> bool {
		self.shared.state.lock().streaming
	}

	/// Highest index written so far, or [`UNWRITTEN`].
	pub fn last_index(&self) -> i64 {
		self.shared.state.lock().last_index
	}

	pub fn capacity(&self) -> usize {
		self.shared.state.lock().capacity()
	}

	pub fn content_type(&self) -> &str {
		self.shared.encoder.content_type()
	}

	/// Encodes and stores one frame. Single writer; called from the producer thread.
	///
	/// Fails with [`StreamError::Conflict`] when the target slot still has
	/// readers. Returns `Ok(false)` when the encoder rejects the frame, in which
	/// case nothing is stored and `last_index` does not move.
	pub fn add_frame(&self, frame: &E::Frame) -> Result<bool, StreamError> {
		let _writer = self.shared.writer.lock();

		let (slot, index, epoch) = {
			let state = self.shared.state.lock();
			let index = state.last_index + 1;
			let slot = index as usize % state.capacity();
			let readers = state.slots[slot].readers;
			if readers > 0 {
				tracing::debug!(index, slot, readers, "stream.write_conflict");
				return Err(StreamError::Conflict { index, slot, readers });
			}
			(slot, index, state.epoch)
		};

		let encoded = match self.shared.encoder.encode(frame) {
			Ok(encoded) => encoded,
			Err(err) => {
				tracing::debug!(index, error = %err, "stream.encode_failed");
				return Ok(false);
			}
		};

		{
			let mut state = self.shared.state.lock();
			if state.epoch != epoch {
				tracing::debug!(index, "stream.reset_during_write");
				return Ok(false);
			}
			let entry = &mut state.slots[slot];
			debug_assert_eq!(entry.readers, 0, "slot {slot} acquired a reader while being written");
			entry.frame = encoded;
			entry.timestamp = Utc::now();
			entry.index = index;
			state.last_index = index;
		}

		tracing::trace!(index, slot, "stream.add_frame");
		self.notify(FrameSignal::Frame { epoch, index });
		Ok(true)
	}

	/// Acquires frame `index` for reading.
	///
	/// The returned guard keeps the slot from being overwritten until dropped.
	/// An index that is not produced yet fails immediately; use
	/// [`wait_for_next_frame`](Self::wait_for_next_frame) to wait.
	pub fn read_entry(&self, index: i64) -> Result<FrameGuard, StreamError> {
		let mut state = self.shared.state.lock();
		if index < 0 {
			return Err(InvalidIndex::Negative(index).into());
		}
		let oldest = state.oldest_readable();
		if index < oldest {
			return Err(InvalidIndex::Expired { index, oldest }.into());
		}
		if index > state.last_index {
			return Err(InvalidIndex::NotProduced {
				index,
				last: state.last_index,
			}
			.into());
		}

		let epoch = state.epoch;
		let slot = index as usize % state.capacity();
		let entry = &mut state.slots[slot];
		if entry.index != index {
			return Err(InvalidIndex::Overwritten(index).into());
		}
		entry.readers += 1;

		Ok(FrameGuard {
			state: Arc::clone(&self.shared.state),
			slot,
			epoch,
			index,
			timestamp: entry.timestamp,
			frame: entry.frame.clone(),
		})
	}

	/// Suspends until the next frame is written and returns its index.
	///
	/// Woken only by the bridge delivering a write notification; fails with
	/// [`StreamError::Stopped`] once the stream stops. Notifications raised
	/// before the last [`reset`](Self::reset) are ignored.
	pub async fn wait_for_next_frame(&self) -> Result<i64, StreamError> {
		let mut rx = self.shared.signal.subscribe();
		if !self.is_streaming() {
			return Err(StreamError::Stopped);
		}
		loop {
			rx.changed().await.map_err(|_| StreamError::Stopped)?;
			let signal = *rx.borrow_and_update();
			let current = self.shared.state.lock().epoch;
			match signal {
				FrameSignal::Frame { epoch, index } if epoch == current => return Ok(index),
				FrameSignal::Stopped { epoch } if epoch == current => return Err(StreamError::Stopped),
				FrameSignal::Frame { epoch, .. } | FrameSignal::Stopped { epoch } => {
					tracing::trace!(epoch, current, "stream.stale_signal");
				}
				FrameSignal::Idle => {}
			}
		}
	}

	/// Lazy sequence of frames for as long as the stream keeps streaming.
	///
	/// Each item holds its slot until dropped. The sequence ends without error
	/// when the stream stops or a read fails, and cannot be restarted.
	pub fn frame_sequence(&self) -> impl Stream<Item = FrameGuard> + Send + use<E> {
		futures::stream::unfold(self.clone(), |stream| async move {
			if !stream.is_streaming() {
				return None;
			}
			let index = stream.wait_for_next_frame().await.ok()?;
			match stream.read_entry(index) {
				Ok(guard) => Some((guard, stream)),
				Err(err) => {
					tracing::debug!(error = %err, "stream.sequence_end");
					None
				}
			}
		})
		.fuse()
	}

	fn notify(&self, signal: FrameSignal) {
		let sender = Arc::clone(&self.shared.signal);
		let delivered = self.shared.bridge.call(move || {
			sender.send_replace(signal);
		});
		if !delivered {
			self.shared.signal.send_replace(signal);
		}
	}
}

/// Scoped read access to one frame.
///
/// Dropping the guard releases the slot on every path, including a reader task
/// being cancelled mid-read.
pub struct FrameGuard {
	state: Arc<Mutex<RingState>>,
	slot: usize,
	epoch: u64,
	index: i64,
	timestamp: DateTime<Utc>,
	frame: Bytes,
}

impl FrameGuard {
	pub fn index(&self) -> i64 {
		self.index
	}

	/// When the producer stored this frame.
	pub fn timestamp(&self) -> DateTime<Utc> {
		self.timestamp
	}

	/// Encoded bytes, cheap to clone.
	pub fn bytes(&self) -> &Bytes {
		&self.frame
	}
}

impl Deref for FrameGuard {
	type Target = [u8];

	fn deref(&self) -> &[u8] {
		&self.frame
	}
}

impl std::fmt::Debug for FrameGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameGuard")
			.field("index", &self.index)
			.field("slot", &self.slot)
			.field("len", &self.frame.len())
			.finish()
	}
}

impl Drop for FrameGuard {
	fn drop(&mut self) {
		let mut state = self.state.lock();
		if state.epoch != self.epoch {
			return;
		}
		if let Some(entry) = state.slots.get_mut(self.slot) {
			entry.readers = entry.readers.saturating_sub(1);
		}
	}
}
