use serde::{Deserialize, Serialize};

/// Lifecycle state of one invocation.
///
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       ├──► Cancelled
///                       └──► Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
	Pending,
	Running,
	Completed,
	Cancelled,
	Error,
}

impl InvocationStatus {
	/// Returns true for the three states an invocation never leaves.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Cancelled | Self::Error)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Cancelled => "cancelled",
			Self::Error => "error",
		}
	}

	/// Whether `self -> next` is an edge of the lifecycle graph.
	pub(crate) const fn can_become(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Pending, Self::Running) | (Self::Running, Self::Completed | Self::Cancelled | Self::Error)
		)
	}
}

impl std::fmt::Display for InvocationStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
