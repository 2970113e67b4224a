/// Shared execution classes used for worker scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// One action invocation body, run on the blocking pool.
	Action,
	/// Externally driven frame producers (capture loops) on dedicated threads.
	Capture,
	/// Work delivered onto the cooperative runtime through the bridge.
	Notify,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Action => "action",
			Self::Capture => "capture",
			Self::Notify => "notify",
		}
	}
}
