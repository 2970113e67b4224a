//! Keyed fan-out of status and progress messages to connected observers.
//!
//! A connection owns its [`ObserverId`] and the receiving half of its channel.
//! Publishers only hold senders; a sender whose receiver has gone away is
//! pruned the next time something is published to its key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::status::InvocationStatus;

/// Message delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "messageType", content = "data", rename_all = "camelCase")]
pub enum Message {
	/// An invocation of `action` changed status.
	ActionStatus { action: String, id: Uuid, status: InvocationStatus },
	/// A running invocation of `action` reported intermediate progress.
	ActionProgress { action: String, id: Uuid, progress: Value },
	/// A property took a new value.
	PropertyStatus { property: String, value: Value },
}

/// Sending half registered by an observer connection.
pub type ObserverSender = mpsc::UnboundedSender<Message>;

/// Identity of one observer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Registry of observer channels keyed by action path (`/camera/capture`) or
/// property name.
#[derive(Debug, Default)]
pub struct ObserverRegistry {
	next_id: AtomicU64,
	keys: Mutex<HashMap<String, Vec<(ObserverId, ObserverSender)>>>,
}

impl ObserverRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocates an id for a new connection.
	pub fn connect(&self) -> ObserverId {
		ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed))
	}

	/// Registers `tx` for messages published under `key`.
	///
	/// Subscribing the same connection twice to one key replaces its sender.
	pub fn subscribe(&self, observer: ObserverId, key: impl Into<String>, tx: ObserverSender) {
		let key = key.into();
		tracing::debug!(key = %key, observer = observer.0, "observers.subscribe");
		let mut keys = self.keys.lock();
		let entries = keys.entry(key).or_default();
		entries.retain(|(id, _)| *id != observer);
		entries.push((observer, tx));
	}

	/// Removes one subscription. Returns whether it existed.
	pub fn unsubscribe(&self, observer: ObserverId, key: &str) -> bool {
		let mut keys = self.keys.lock();
		let Some(entries) = keys.get_mut(key) else {
			return false;
		};
		let before = entries.len();
		entries.retain(|(id, _)| *id != observer);
		let removed = entries.len() != before;
		if entries.is_empty() {
			keys.remove(key);
		}
		removed
	}

	/// Drops every subscription of a closing connection.
	pub fn disconnect(&self, observer: ObserverId) -> usize {
		let mut keys = self.keys.lock();
		let mut removed = 0usize;
		keys.retain(|_, entries| {
			let before = entries.len();
			entries.retain(|(id, _)| *id != observer);
			removed += before - entries.len();
			!entries.is_empty()
		});
		tracing::debug!(observer = observer.0, removed, "observers.disconnect");
		removed
	}

	/// Sends `message` to every observer of `key`, returning how many received it.
	///
	/// Delivery failures are swallowed per observer and the dead channel is
	/// pruned; the remaining observers still receive the message.
	pub fn publish(&self, key: &str, message: Message) -> usize {
		let targets: Vec<(ObserverId, ObserverSender)> = match self.keys.lock().get(key) {
			Some(entries) => entries.clone(),
			None => return 0,
		};

		let mut delivered = 0usize;
		let mut dead = Vec::new();
		for (id, tx) in targets {
			if tx.send(message.clone()).is_ok() {
				delivered += 1;
			} else {
				dead.push(id);
			}
		}

		if !dead.is_empty() {
			tracing::debug!(key, dropped = dead.len(), "observers.prune");
			let mut keys = self.keys.lock();
			if let Some(entries) = keys.get_mut(key) {
				entries.retain(|(id, tx)| !(dead.contains(id) && tx.is_closed()));
				if entries.is_empty() {
					keys.remove(key);
				}
			}
		}
		delivered
	}

	/// Number of observers currently registered under `key`.
	pub fn observer_count(&self, key: &str) -> usize {
		self.keys.lock().get(key).map_or(0, Vec::len)
	}
}
