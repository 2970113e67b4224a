use std::marker::PhantomData;

use bytes::Bytes;

use crate::error::EncodeError;

/// Turns a raw frame from the producer into its wire representation.
pub trait FrameEncoder: Send + Sync + 'static {
	/// Raw frame type handed to [`FrameStream::add_frame`](crate::FrameStream::add_frame).
	type Frame: ?Sized;

	fn encode(&self, frame: &Self::Frame) -> Result<Bytes, EncodeError>;

	/// MIME type of the encoded bytes, used when framing a multipart response.
	fn content_type(&self) -> &str;
}

/// Stores frames as given.
#[derive(Debug, Clone)]
pub struct RawEncoder {
	content_type: String,
}

impl RawEncoder {
	pub fn new(content_type: impl Into<String>) -> Self {
		Self {
			content_type: content_type.into(),
		}
	}
}

impl FrameEncoder for RawEncoder {
	type Frame = [u8];

	fn encode(&self, frame: &[u8]) -> Result<Bytes, EncodeError> {
		Ok(Bytes::copy_from_slice(frame))
	}

	fn content_type(&self) -> &str {
		&self.content_type
	}
}

/// Encoder backed by a closure, for caller-supplied codecs.
pub struct FnEncoder<T: ?Sized, F> {
	content_type: String,
	encode: F,
	_frame: PhantomData<fn(&T)>,
}

impl<T: ?Sized, F> FnEncoder<T, F>
where
	F: Fn(&T) -> Result<Bytes, EncodeError>,
{
	pub fn new(content_type: impl Into<String>, encode: F) -> Self {
		Self {
			content_type: content_type.into(),
			encode,
			_frame: PhantomData,
		}
	}
}

impl<T, F> FrameEncoder for FnEncoder<T, F>
where
	T: ?Sized + 'static,
	F: Fn(&T) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
{
	type Frame = T;

	fn encode(&self, frame: &T) -> Result<Bytes, EncodeError> {
		(self.encode)(frame)
	}

	fn content_type(&self) -> &str {
		&self.content_type
	}
}
