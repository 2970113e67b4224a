//! `multipart/x-mixed-replace` framing for streaming frames over one response.

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};

use crate::ring::FrameGuard;

/// Boundary token separating parts.
pub const BOUNDARY: &str = "frame";

/// Content type of the whole response.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Header emitted before every part.
pub fn part_header(content_type: &str) -> Bytes {
	Bytes::from(format!("--{BOUNDARY}\r\nContent-Type: {content_type}\r\n\r\n"))
}

/// Turns a frame sequence into the byte chunks of a multipart body.
///
/// Each frame becomes three chunks: part header, frame bytes, trailing CRLF.
/// The frame's slot is released as soon as its bytes are handed on.
pub fn frames<S>(frames: S, content_type: &str) -> impl Stream<Item = Bytes> + use<S>
where
	S: Stream<Item = FrameGuard>,
{
	let header = part_header(content_type);
	frames.flat_map(move |frame| stream::iter([header.clone(), frame.bytes().clone(), Bytes::from_static(b"\r\n")]))
}

#[cfg(test)]
mod tests {
	use futures::StreamExt;
	use thingkit_worker::bridge;

	use super::*;
	use crate::{FrameStream, RawEncoder};

	#[test]
	fn header_names_boundary_and_type() {
		assert_eq!(&part_header("image/png")[..], b"--frame\r\nContent-Type: image/png\r\n\r\n");
	}

	#[tokio::test]
	async fn wraps_each_frame_in_a_part() {
		let (bridge, _) = bridge();
		let stream = FrameStream::new(4, RawEncoder::new("image/png"), bridge).unwrap();
		stream.add_frame(b"one").unwrap();
		stream.add_frame(b"two").unwrap();

		let guards = vec![stream.read_entry(0).unwrap(), stream.read_entry(1).unwrap()];
		let body: Vec<Bytes> = frames(futures::stream::iter(guards), stream.content_type()).collect().await;

		let joined: Vec<u8> = body.iter().flat_map(|chunk| chunk.iter().copied()).collect();
		let expected = b"--frame\r\nContent-Type: image/png\r\n\r\none\r\n--frame\r\nContent-Type: image/png\r\n\r\ntwo\r\n";
		assert_eq!(joined, expected.to_vec());
		assert_eq!(body.len(), 6);

		stream.add_frame(b"three").unwrap();
		stream.add_frame(b"four").unwrap();
		assert_eq!(stream.add_frame(b"five"), Ok(true), "parts must not keep slots held");
	}
}
