use thiserror::Error;

/// Why a frame index cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidIndex {
	#[error("frame index must be >= 0, got {0}")]
	Negative(i64),

	#[error("frame {index} has been overwritten (oldest readable is {oldest})")]
	Expired { index: i64, oldest: i64 },

	#[error("frame {index} has not been produced yet (latest is {last})")]
	NotProduced { index: i64, last: i64 },

	/// The slot no longer holds this index.
	#[error("frame {0} was overwritten")]
	Overwritten(i64),
}

/// Errors raised by [`FrameStream`](crate::FrameStream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
	#[error("invalid frame index: {0}")]
	InvalidIndex(#[from] InvalidIndex),

	/// The producer tried to overwrite a slot that still has readers.
	#[error("cannot write frame {index}: slot {slot} is being read by {readers} reader(s)")]
	Conflict { index: i64, slot: usize, readers: usize },

	#[error("ring buffer capacity must be at least 2, got {0}")]
	InvalidCapacity(usize),

	#[error("the stream has stopped")]
	Stopped,
}

/// Failure reported by a [`FrameEncoder`](crate::FrameEncoder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("frame encoding failed: {0}")]
pub struct EncodeError(pub String);
