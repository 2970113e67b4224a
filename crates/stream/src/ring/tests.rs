use std::time::Duration;

use futures::StreamExt;
use thingkit_worker::bridge;

use super::*;
use crate::encoder::{FnEncoder, RawEncoder};
use crate::error::EncodeError;

/// Stream whose bridge has no loop; notifications fall back to direct delivery.
fn offline(capacity: usize) -> FrameStream<RawEncoder> {
	let (bridge, _) = bridge();
	FrameStream::new(capacity, RawEncoder::new("application/octet-stream"), bridge).unwrap()
}

/// Stream whose notifications are delivered by a bridge loop on the test runtime.
fn bridged(capacity: usize) -> FrameStream<RawEncoder> {
	let (bridge, run) = bridge();
	tokio::spawn(run.run());
	FrameStream::new(capacity, RawEncoder::new("application/octet-stream"), bridge).unwrap()
}

fn write(stream: &FrameStream<RawEncoder>, n: i64) {
	assert_eq!(stream.add_frame(format!("frame-{n}").as_bytes()), Ok(true));
}

#[test]
fn wraparound_expires_oldest_frame() {
	let stream = offline(3);
	for n in 0..4 {
		write(&stream, n);
	}

	assert_eq!(stream.last_index(), 3);
	assert_eq!(
		stream.read_entry(0).map(|g| g.index()),
		Err(StreamError::InvalidIndex(InvalidIndex::Expired { index: 0, oldest: 2 }))
	);
	let latest = stream.read_entry(3).unwrap();
	assert_eq!(&*latest, b"frame-3");
}

#[test]
fn index_bounds_are_enforced() {
	let stream = offline(4);
	assert_eq!(
		stream.read_entry(0).map(|g| g.index()),
		Err(StreamError::InvalidIndex(InvalidIndex::NotProduced { index: 0, last: -1 }))
	);

	for n in 0..6 {
		write(&stream, n);
	}
	assert_eq!(stream.read_entry(-1).map(|g| g.index()), Err(StreamError::InvalidIndex(InvalidIndex::Negative(-1))));
	assert_eq!(
		stream.read_entry(6).map(|g| g.index()),
		Err(StreamError::InvalidIndex(InvalidIndex::NotProduced { index: 6, last: 5 }))
	);
	assert_eq!(
		stream.read_entry(2).map(|g| g.index()),
		Err(StreamError::InvalidIndex(InvalidIndex::Expired { index: 2, oldest: 3 }))
	);
	assert_eq!(stream.read_entry(3).map(|g| g.index()), Ok(3));
	assert_eq!(stream.read_entry(4).map(|g| g.index()), Ok(4));
	assert_eq!(stream.read_entry(5).map(|g| g.index()), Ok(5));
}

#[test]
fn round_trip_is_byte_identical() {
	let stream = offline(8);
	let payload: Vec<u8> = (0..=255).collect();
	assert_eq!(stream.add_frame(&payload), Ok(true));

	let guard = stream.read_entry(stream.last_index()).unwrap();
	assert_eq!(&*guard, payload.as_slice());
	assert_eq!(guard.bytes().len(), 256);
}

#[test]
fn writing_over_a_held_slot_conflicts() {
	let stream = offline(3);
	write(&stream, 0);
	let held = stream.read_entry(0).unwrap();
	write(&stream, 1);
	write(&stream, 2);

	assert_eq!(
		stream.add_frame(b"frame-3"),
		Err(StreamError::Conflict {
			index: 3,
			slot: 0,
			readers: 1
		})
	);
	assert_eq!(stream.last_index(), 2, "a conflicting write must not advance");

	drop(held);
	write(&stream, 3);
	assert_eq!(stream.last_index(), 3);
}

#[test]
fn failed_encode_stores_nothing() {
	let (bridge, _) = bridge();
	let encoder = FnEncoder::new("image/test", |frame: &[u8]| {
		if frame.is_empty() {
			Err(EncodeError("empty frame".into()))
		} else {
			Ok(Bytes::copy_from_slice(frame))
		}
	});
	let stream = FrameStream::new(2, encoder, bridge).unwrap();

	assert_eq!(stream.add_frame(b""), Ok(false));
	assert_eq!(stream.last_index(), UNWRITTEN);
	assert_eq!(stream.add_frame(b"ok"), Ok(true));
	assert_eq!(stream.last_index(), 0);
	assert_eq!(stream.content_type(), "image/test");
}

#[test]
fn capacity_below_two_is_rejected() {
	let (bridge, _) = bridge();
	assert_eq!(
		FrameStream::new(1, RawEncoder::new("x"), bridge).map(|s| s.capacity()),
		Err(StreamError::InvalidCapacity(1))
	);
	let stream = offline(2);
	assert_eq!(stream.reset(Some(0)), Err(StreamError::InvalidCapacity(0)));
	assert_eq!(stream.capacity(), 2);
}

#[test]
fn reset_clears_and_ignores_stale_guards() {
	let stream = offline(3);
	write(&stream, 0);
	let stale = stream.read_entry(0).unwrap();

	stream.reset(Some(2)).unwrap();
	assert_eq!(stream.last_index(), UNWRITTEN);
	assert_eq!(stream.capacity(), 2);
	assert!(stream.is_streaming());

	write(&stream, 0);
	let fresh = stream.read_entry(0).unwrap();
	drop(stale);
	write(&stream, 1);
	assert!(
		matches!(stream.add_frame(b"frame-2"), Err(StreamError::Conflict { slot: 0, readers: 1, .. })),
		"dropping a pre-reset guard must not release the new reader"
	);
	drop(fresh);
	write(&stream, 2);
}

#[tokio::test]
async fn cancelled_reader_releases_its_slot() {
	let stream = bridged(2);
	write(&stream, 0);

	let reader = stream.clone();
	let task = tokio::spawn(async move {
		let _guard = reader.read_entry(0).unwrap();
		std::future::pending::<()>().await;
	});
	tokio::task::yield_now().await;
	task.abort();
	let _ = task.await;

	write(&stream, 1);
	write(&stream, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn producer_thread_wakes_waiting_reader() {
	let stream = bridged(10);
	let waiter = {
		let stream = stream.clone();
		tokio::spawn(async move { stream.wait_for_next_frame().await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;

	let producer = stream.clone();
	std::thread::spawn(move || producer.add_frame(b"frame-0")).join().unwrap().unwrap();

	let index = tokio::time::timeout(Duration::from_secs(2), waiter).await.expect("reader should wake").unwrap();
	assert_eq!(index, Ok(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_wakes_waiting_reader() {
	let stream = bridged(4);
	let waiter = {
		let stream = stream.clone();
		tokio::spawn(async move { stream.wait_for_next_frame().await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;
	stream.stop();

	let result = tokio::time::timeout(Duration::from_secs(2), waiter).await.expect("stop should wake").unwrap();
	assert_eq!(result, Err(StreamError::Stopped));
	assert_eq!(stream.wait_for_next_frame().await, Err(StreamError::Stopped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frame_sequence_follows_producer_until_stopped() {
	let stream = bridged(16);
	let mut frames = Box::pin(stream.frame_sequence());

	let producer = stream.clone();
	let capture = std::thread::spawn(move || {
		for _ in 0..200 {
			let next = producer.last_index() + 1;
			let _ = producer.add_frame(format!("frame-{next}").as_bytes());
			std::thread::sleep(Duration::from_millis(2));
		}
		producer.stop();
	});

	let mut seen = Vec::new();
	while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), frames.next()).await.expect("sequence should progress") {
		assert_eq!(&*frame, format!("frame-{}", frame.index()).as_bytes());
		seen.push(frame.index());
	}
	capture.join().unwrap();

	assert!(!seen.is_empty(), "reader should observe some frames");
	assert!(seen.windows(2).all(|w| w[0] < w[1]), "indices must increase: {seen:?}");
	assert!(frames.next().await.is_none(), "sequence cannot restart");
}

#[tokio::test]
async fn stop_signal_from_before_reset_does_not_end_new_waiters() {
	let (bridge, mut run) = bridge();
	let stream = FrameStream::new(4, RawEncoder::new("application/octet-stream"), bridge).unwrap();
	stream.stop();
	stream.reset(None).unwrap();

	let waiter = {
		let stream = stream.clone();
		tokio::spawn(async move { stream.wait_for_next_frame().await })
	};
	tokio::task::yield_now().await;
	assert_eq!(run.drain().await, 1, "the stop notification was still queued");
	tokio::task::yield_now().await;
	assert!(!waiter.is_finished(), "a pre-reset stop must not wake the new session");

	write(&stream, 0);
	run.drain().await;
	let index = tokio::time::timeout(Duration::from_secs(2), waiter).await.expect("reader should wake").unwrap();
	assert_eq!(index, Ok(0));
}

#[tokio::test]
async fn frame_sequence_ends_when_its_frame_expires_before_the_read() {
	let (bridge, mut run) = bridge();
	let stream = FrameStream::new(2, RawEncoder::new("application/octet-stream"), bridge).unwrap();
	let mut frames = Box::pin(stream.frame_sequence());
	assert!(futures::poll!(frames.next()).is_pending());

	write(&stream, 0);
	run.drain().await;
	// frame 1 overtakes 0 before the reader gets to run; its own signal stays queued
	write(&stream, 1);

	assert!(frames.next().await.is_none());
	assert!(stream.is_streaming(), "the stream itself keeps going");
	assert!(frames.next().await.is_none(), "sequence cannot restart");
}
