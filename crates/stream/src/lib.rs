//! Live frame streams backed by a bounded ring buffer.
//!
//! A producer thread pushes raw frames through [`FrameStream::add_frame`];
//! async consumers follow along with [`FrameStream::frame_sequence`] or read a
//! specific index with [`FrameStream::read_entry`].

mod encoder;
mod error;
pub mod multipart;
mod ring;

pub use encoder::{FnEncoder, FrameEncoder, RawEncoder};
pub use error::{EncodeError, InvalidIndex, StreamError};
pub use ring::{FrameGuard, FrameStream, UNWRITTEN};
