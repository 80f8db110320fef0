use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Result, WorkerContext};

/// Entry point of a worker.
///
/// Jobs are registered on the controller under a name and referenced by that
/// name at spawn time; a worker receives only the name and a serialized copy
/// of its initial values. The worker lives for as long as `run` does.
///
/// Any `Fn(WorkerContext) -> impl Future<Output = Result<()>>` is a job:
///
/// ```
/// use hoverlord::{Controller, WorkerContext};
///
/// async fn idle(ctx: WorkerContext) -> hoverlord::Result<()> {
/// 	ctx.receive((), |state, _msg, _ctx| async move { state }).await
/// }
///
/// let _controller = Controller::builder().job("idle", idle);
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
	/// Runs the worker.
	async fn run(&self, ctx: WorkerContext) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Job for F
where
	F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	async fn run(&self, ctx: WorkerContext) -> Result<()> {
		(self)(ctx).await
	}
}

/// Named jobs a controller can spawn.
#[derive(Clone, Default)]
pub struct JobTable {
	jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `job` under `name`, replacing any previous registration.
	pub fn register(&mut self, name: impl Into<String>, job: impl Job) {
		let name = name.into();
		if self.jobs.insert(name.clone(), Arc::new(job)).is_some() {
			tracing::debug!(job = %name, "hoverlord.job.replaced");
		}
	}

	/// Looks up a job.
	pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
		self.jobs.get(name).cloned()
	}

	/// Returns registered job names, sorted.
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<_> = self.jobs.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}
}

impl std::fmt::Debug for JobTable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("JobTable").field("jobs", &self.names()).finish()
	}
}
