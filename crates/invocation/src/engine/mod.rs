use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use thingkit_worker::{Bridge, TaskClass, spawn_blocking};
use uuid::Uuid;

use crate::error::EngineError;
use crate::invocation::{Action, EventHandle, Input, Invocation, InvocationEvent, InvocationHandle, InvocationSummary};
use crate::observers::{Message, ObserverRegistry};
use crate::status::InvocationStatus;


/// Creates, tracks, lists and cancels invocations.
///
/// Both registries are guarded by short synchronous critical sections that
/// never span an await point. Status changes reach observers through the
/// [`Bridge`], so the cooperative runtime is the only place they are delivered.
pub struct ActionManager {
	actions: Mutex<IndexMap<String, Arc<Action>>>,
	invocations: Mutex<IndexMap<Uuid, InvocationHandle>>,
	observers: Arc<ObserverRegistry>,
	bridge: Bridge,
}

impl std::fmt::Debug for ActionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ActionManager")
			.field("actions", &self.actions.lock().len())
			.field("invocations", &self.invocations.lock().len())
			.finish_non_exhaustive()
	}
}

impl ActionManager {
	/// Creates a manager with its own observer registry.
	pub fn new(bridge: Bridge) -> Self {
		Self::with_observers(bridge, Arc::new(ObserverRegistry::new()))
	}

	/// Creates a manager sharing an existing observer registry.
	pub fn with_observers(bridge: Bridge, observers: Arc<ObserverRegistry>) -> Self {
		Self {
			actions: Mutex::new(IndexMap::new()),
			invocations: Mutex::new(IndexMap::new()),
			observers,
			bridge,
		}
	}

	pub fn observers(&self) -> &Arc<ObserverRegistry> {
		&self.observers
	}

	/// Registers an action under its path, replacing any previous one.
	pub fn register(&self, action: Action) -> Arc<Action> {
		let action = Arc::new(action);
		tracing::debug!(path = %action.path(), "action.register");
		self.actions.lock().insert(action.path(), Arc::clone(&action));
		action
	}

	/// Registered actions in registration order.
	pub fn actions(&self) -> Vec<Arc<Action>> {
		self.actions.lock().values().cloned().collect()
	}

	/// Looks up a registered action by path and submits it with a fresh id.
	pub fn invoke(&self, path: &str, input: Input) -> Result<InvocationHandle, EngineError> {
		let action = self
			.actions
			.lock()
			.get(path)
			.cloned()
			.ok_or_else(|| EngineError::UnknownAction(path.to_string()))?;
		self.submit(&action, input, None)
	}

	/// Creates a pending invocation, registers it and schedules it on a worker.
	///
	/// Returns as soon as the invocation is registered; the body runs on the
	/// blocking pool. `id` defaults to a random v4 uuid.
	pub fn submit(&self, action: &Arc<Action>, input: Input, id: Option<Uuid>) -> Result<InvocationHandle, EngineError> {
		let id = id.unwrap_or_else(Uuid::new_v4);
		let invocation = Arc::new(Invocation::new(id, Arc::clone(action), input));

		{
			let mut invocations = self.invocations.lock();
			if invocations.contains_key(&id) {
				return Err(EngineError::DuplicateId(id));
			}
			invocations.insert(id, Arc::clone(&invocation));
		}

		let emit = self.event_handle(action);
		emit(id, InvocationEvent::Status(InvocationStatus::Pending));
		tracing::debug!(invocation = %id, action = %action.path(), "invocation.submit");

		let worker = Arc::clone(&invocation);
		spawn_blocking(TaskClass::Action, id, move || worker.run(&emit));
		Ok(invocation)
	}

	/// Snapshots of invocations matching the optional action name and owner path.
	pub fn list(&self, action: Option<&str>, owner: Option<&str>) -> Vec<InvocationSummary> {
		let matching: Vec<InvocationHandle> = self
			.invocations
			.lock()
			.values()
			.filter(|inv| action.is_none_or(|name| inv.action().name() == name))
			.filter(|inv| owner.is_none_or(|owner| inv.action().owner() == owner))
			.cloned()
			.collect();
		matching.iter().map(|inv| inv.summary()).collect()
	}

	/// Snapshot of one invocation.
	pub fn get(&self, id: Uuid) -> Result<InvocationSummary, EngineError> {
		self.handle(id).map(|inv| inv.summary())
	}

	/// Live handle to one invocation.
	pub fn handle(&self, id: Uuid) -> Result<InvocationHandle, EngineError> {
		self.invocations.lock().get(&id).cloned().ok_or(EngineError::NotFound(id))
	}

	/// Live handle looked up by textual id, as it arrives in a request path.
	///
	/// Any uuid spelling is accepted, so lookups are case-insensitive.
	pub fn lookup(&self, id: &str) -> Result<InvocationHandle, EngineError> {
		let id = Uuid::parse_str(id.trim()).map_err(|_| EngineError::InvalidId(id.to_string()))?;
		self.handle(id)
	}

	/// Requests cancellation. A terminal invocation is left untouched.
	pub fn cancel(&self, id: Uuid) -> Result<(), EngineError> {
		self.handle(id)?.cancel();
		Ok(())
	}

	/// Removes an invocation from the registry, requesting cancellation if it
	/// is still running. Returns its last snapshot.
	pub fn delete(&self, id: Uuid) -> Result<InvocationSummary, EngineError> {
		let invocation = self.invocations.lock().shift_remove(&id).ok_or(EngineError::NotFound(id))?;
		invocation.cancel();
		tracing::debug!(invocation = %id, "invocation.delete");
		Ok(invocation.summary())
	}

	/// Publishes under the action's full path, so same-named actions of
	/// different things never share observers.
	fn event_handle(&self, action: &Action) -> EventHandle {
		let bridge = self.bridge.clone();
		let observers = Arc::clone(&self.observers);
		let path = action.path();
		Arc::new(move |id, event| {
			let observers = Arc::clone(&observers);
			let key = path.clone();
			let message = match event {
				InvocationEvent::Status(status) => Message::ActionStatus {
					action: path.clone(),
					id,
					status,
				},
				InvocationEvent::Progress(progress) => Message::ActionProgress {
					action: path.clone(),
					id,
					progress,
				},
			};
			bridge.call(move || {
				observers.publish(&key, message);
			});
		})
	}
}
