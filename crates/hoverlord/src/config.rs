use std::time::Duration;

use serde_json::Value;

use crate::ExecutionClass;

/// Controller-wide defaults.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
	pub(crate) default_call_timeout: Option<Duration>,
	pub(crate) ready_timeout: Duration,
	pub(crate) shutdown_grace: Duration,
	pub(crate) class: ExecutionClass,
}

impl ControllerConfig {
	/// Sets the deadline applied by `call` on the controller and on every
	/// worker it spawns. `None` waits forever.
	#[must_use]
	pub fn default_call_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.default_call_timeout = timeout;
		self
	}

	/// Sets how long `spawn` waits for the readiness handshake.
	///
	/// # Panics
	///
	/// Panics if `timeout` is zero.
	#[must_use]
	pub fn ready_timeout(mut self, timeout: Duration) -> Self {
		assert!(!timeout.is_zero(), "ready timeout must be > 0");
		self.ready_timeout = timeout;
		self
	}

	/// Sets how long `shutdown` waits for terminated workers to report their exit.
	#[must_use]
	pub fn shutdown_grace(mut self, grace: Duration) -> Self {
		self.shutdown_grace = grace;
		self
	}

	/// Sets the execution class used when a spawn does not pick one.
	#[must_use]
	pub fn class(mut self, class: ExecutionClass) -> Self {
		self.class = class;
		self
	}
}

impl Default for ControllerConfig {
	fn default() -> Self {
		Self {
			default_call_timeout: None,
			ready_timeout: Duration::from_secs(5),
			shutdown_grace: Duration::from_secs(1),
			class: ExecutionClass::Task,
		}
	}
}

/// Builder spec for one worker.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
	pub(crate) job: String,
	pub(crate) name: String,
	pub(crate) vars: Value,
	pub(crate) class: Option<ExecutionClass>,
	pub(crate) ready_timeout: Option<Duration>,
}

impl SpawnSpec {
	/// Spawns the job registered as `job` under the worker name `name`.
	pub fn new(job: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			job: job.into(),
			name: name.into(),
			vars: Value::Null,
			class: None,
			ready_timeout: None,
		}
	}

	/// Sets the initial values the worker decodes with `WorkerContext::vars`.
	#[must_use]
	pub fn vars(mut self, vars: Value) -> Self {
		self.vars = vars;
		self
	}

	/// Overrides the controller's execution class.
	#[must_use]
	pub fn class(mut self, class: ExecutionClass) -> Self {
		self.class = Some(class);
		self
	}

	/// Overrides the controller's ready timeout.
	///
	/// # Panics
	///
	/// Panics if `timeout` is zero.
	#[must_use]
	pub fn ready_timeout(mut self, timeout: Duration) -> Self {
		assert!(!timeout.is_zero(), "ready timeout must be > 0");
		self.ready_timeout = Some(timeout);
		self
	}

	/// Job name.
	pub fn job(&self) -> &str {
		&self.job
	}

	/// Worker name.
	pub fn name(&self) -> &str {
		&self.name
	}
}
