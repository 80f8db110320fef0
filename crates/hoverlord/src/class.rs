use serde::{Deserialize, Serialize};

/// How a worker's isolated execution unit is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionClass {
	/// Async task on the controller's tokio runtime.
	#[default]
	Task,
	/// Dedicated OS thread driving its own current-thread runtime.
	///
	/// Use for workers whose reducers block or burn CPU.
	Thread,
}

impl ExecutionClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Task => "task",
			Self::Thread => "thread",
		}
	}
}

impl std::fmt::Display for ExecutionClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
