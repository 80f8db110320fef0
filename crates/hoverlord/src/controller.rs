//! The controlling unit: owns a registry of workers and their router.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::correlation::{Correlator, demux};
use crate::messenger::{Outbox, Port, messaging_api};
use crate::registry::{Registry, WorkerRecord};
use crate::router::{Command, Router};
use crate::{
	ControllerConfig, Envelope, Error, ExecutionClass, ExecutionId, Executor, Job, JobTable, LocalExecutor, Recipient, Result, SpawnSpec, UnitSpec,
};

/// Handle to a spawned worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerRef {
	id: ExecutionId,
	name: String,
}

impl WorkerRef {
	pub(crate) fn new(id: ExecutionId, name: String) -> Self {
		Self { id, name }
	}

	/// Execution identity of the worker.
	pub fn id(&self) -> ExecutionId {
		self.id
	}

	/// Name the worker was spawned under.
	pub fn name(&self) -> &str {
		&self.name
	}
}

/// Addresses the worker by identity, which stays valid if its name is reused.
impl From<&WorkerRef> for Recipient {
	fn from(worker: &WorkerRef) -> Self {
		Self::Id(worker.id)
	}
}

impl From<WorkerRef> for Recipient {
	fn from(worker: WorkerRef) -> Self {
		Self::Id(worker.id)
	}
}

/// Builder for a [`Controller`].
pub struct ControllerBuilder {
	jobs: JobTable,
	config: ControllerConfig,
	executor: Arc<dyn Executor>,
}

impl ControllerBuilder {
	/// Registers `job` under `name`.
	#[must_use]
	pub fn job(mut self, name: impl Into<String>, job: impl Job) -> Self {
		self.jobs.register(name, job);
		self
	}

	/// Replaces the controller defaults.
	#[must_use]
	pub fn config(mut self, config: ControllerConfig) -> Self {
		self.config = config;
		self
	}

	/// Replaces the execution collaborator.
	#[must_use]
	pub fn executor(mut self, executor: impl Executor) -> Self {
		self.executor = Arc::new(executor);
		self
	}

	/// Starts the controller's router.
	///
	/// Outside a tokio runtime the router runs on a shared fallback runtime.
	pub fn build(self) -> Controller {
		let Self { jobs, config, executor } = self;
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (sink_tx, sink_rx) = mpsc::unbounded_channel();
		let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
		let cancel = CancellationToken::new();
		let correlator = Correlator::default();

		crate::spawn(ExecutionClass::Task, demux(sink_rx, correlator.clone(), mailbox_tx));
		let router = Router::new(Registry::new(sink_tx), commands_rx, commands_tx.clone(), cancel.clone(), config.shutdown_grace);
		let join = RouterJoin::new(crate::spawn(ExecutionClass::Task, router.run()));
		let port = Port::new(ExecutionId::CONTROLLER, Outbox::Controller(commands_tx.clone()), correlator, config.default_call_timeout);
		tracing::debug!(jobs = ?jobs.names(), "hoverlord.controller.start");

		Controller {
			inner: Arc::new(ControllerInner {
				port,
				commands: commands_tx,
				jobs,
				executor,
				config,
				mailbox: Mutex::new(Some(mailbox_rx)),
				closed: AtomicBool::new(false),
				join,
			}),
			lease: Some(Arc::new(cancel.drop_guard())),
		}
	}
}

impl Default for ControllerBuilder {
	fn default() -> Self {
		Self {
			jobs: JobTable::new(),
			config: ControllerConfig::default(),
			executor: Arc::new(LocalExecutor::new()),
		}
	}
}

impl std::fmt::Debug for ControllerBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ControllerBuilder")
			.field("jobs", &self.jobs)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

/// Owner of one set of workers.
///
/// Cheap to clone. The registry lives on a router task owned by the
/// controller; dropping the last clone terminates every worker.
///
/// The handle a [`receive`](Self::receive) reducer gets does not count
/// towards that: it keeps working until the controller goes away.
#[derive(Clone)]
pub struct Controller {
	inner: Arc<ControllerInner>,
	/// Cancels the router once the last owning handle is dropped.
	lease: Option<Arc<DropGuard>>,
}

struct ControllerInner {
	port: Port,
	commands: mpsc::UnboundedSender<Command>,
	jobs: JobTable,
	executor: Arc<dyn Executor>,
	config: ControllerConfig,
	mailbox: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
	closed: AtomicBool,
	join: RouterJoin,
}

impl Controller {
	/// Creates a controller with no registered jobs and default settings.
	pub fn new() -> Self {
		Self::builder().build()
	}

	/// Starts building a controller.
	pub fn builder() -> ControllerBuilder {
		ControllerBuilder::default()
	}

	pub(crate) fn port(&self) -> &Port {
		&self.inner.port
	}

	/// A handle sharing this controller without keeping it alive.
	fn borrowed(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
			lease: None,
		}
	}

	fn guard(&self) -> Result<()> {
		if self.is_shut_down() { Err(Error::ShutdownInProgress) } else { Ok(()) }
	}

	/// The controller's own identity, [`ExecutionId::CONTROLLER`].
	pub fn id(&self) -> ExecutionId {
		ExecutionId::CONTROLLER
	}

	/// Names of the registered jobs, sorted.
	pub fn jobs(&self) -> Vec<&str> {
		self.inner.jobs.names()
	}

	/// Spawns the job registered as `job` under `name`, passing it a copy of `vars`.
	///
	/// Resolves once the worker completed its readiness handshake. A name
	/// already in use is taken over by the new worker; the old one stays
	/// reachable by identity.
	///
	/// # Errors
	///
	/// `UnknownJob` if no job is registered as `job`; `WorkerSpawnFailure` if
	/// `vars` does not serialize or the worker fails before it is ready.
	pub async fn spawn(&self, job: &str, name: impl Into<String>, vars: impl Serialize) -> Result<WorkerRef> {
		let vars = serde_json::to_value(vars).map_err(|err| Error::WorkerSpawnFailure(format!("vars: {err}")))?;
		self.spawn_with(SpawnSpec::new(job, name).vars(vars)).await
	}

	/// Spawns a worker from a full [`SpawnSpec`].
	///
	/// # Errors
	///
	/// As [`spawn`](Self::spawn).
	pub async fn spawn_with(&self, spec: SpawnSpec) -> Result<WorkerRef> {
		self.guard()?;
		let SpawnSpec {
			job,
			name,
			vars,
			class,
			ready_timeout,
		} = spec;
		let config = &self.inner.config;
		let entry = self.inner.jobs.get(&job).ok_or_else(|| Error::UnknownJob(job.clone()))?;
		let class = class.unwrap_or(config.class);
		let unit = self.inner.executor.create(UnitSpec {
			name: name.clone(),
			class,
			job: entry,
			vars,
			call_timeout: config.default_call_timeout,
		})?;
		let id = unit.id();
		if id.is_controller() {
			return Err(Error::WorkerSpawnFailure(format!("executor handed out the controller identity for '{name}'")));
		}

		let (ready_tx, ready_rx) = oneshot::channel();
		self.inner
			.commands
			.send(Command::Spawn {
				unit,
				name: name.clone(),
				class,
				ready: ready_tx,
			})
			.map_err(|_| Error::ShutdownInProgress)?;

		let limit = ready_timeout.unwrap_or(config.ready_timeout);
		match tokio::time::timeout(limit, ready_rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => Err(Error::ShutdownInProgress),
			Err(_) => {
				tracing::warn!(worker = %name, %id, job = %job, ?limit, "hoverlord.worker.ready_timeout");
				let _ = self.inner.commands.send(Command::Abort(id));
				Err(Error::WorkerSpawnFailure(format!("worker '{name}' was not ready within {limit:?}")))
			}
		}
	}

	/// Snapshots the registered workers, sorted by name.
	///
	/// # Errors
	///
	/// `ShutdownInProgress` after shutdown.
	pub async fn workers(&self) -> Result<Vec<WorkerRecord>> {
		self.guard()?;
		let (tx, rx) = oneshot::channel();
		self.inner.commands.send(Command::Workers(tx)).map_err(|_| Error::ShutdownInProgress)?;
		rx.await.map_err(|_| Error::ShutdownInProgress)
	}

	/// Folds envelopes addressed to the controller into a running state.
	///
	/// Runs until the controller shuts down, then returns the final state.
	/// Replies to the controller's own calls never reach the reducer.
	///
	/// # Errors
	///
	/// `ReceiverInstalled` on a second call, `ShutdownInProgress` after shutdown.
	pub async fn receive<S, R, Fut>(&self, initial: S, reducer: R) -> Result<S>
	where
		S: Clone + Send + 'static,
		R: FnMut(S, Envelope, Controller) -> Fut,
		Fut: Future<Output = S> + Send + 'static,
	{
		self.guard()?;
		let mailbox = self.inner.mailbox.lock().take().ok_or(Error::ReceiverInstalled)?;
		Ok(crate::receive::fold(ExecutionId::CONTROLLER, ExecutionClass::Task, mailbox, self.borrowed(), initial, reducer).await)
	}

	/// Terminates every worker, rejects every pending call, and discards the
	/// registry.
	///
	/// Idempotent. Concurrent callers all return once teardown is complete.
	pub async fn shutdown(&self) {
		if !self.inner.closed.swap(true, Ordering::AcqRel) {
			tracing::debug!("hoverlord.controller.shutdown_requested");
			let _ = self.inner.commands.send(Command::Shutdown);
		}
		self.inner.join.join().await;
	}

	/// Returns true once shutdown was requested.
	pub fn is_shut_down(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}
}

impl Default for Controller {
	fn default() -> Self {
		Self::new()
	}
}

messaging_api!(Controller);

impl std::fmt::Debug for Controller {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Controller")
			.field("jobs", &self.inner.jobs)
			.field("shut_down", &self.is_shut_down())
			.finish_non_exhaustive()
	}
}

/// Join coordination for the router task.
///
/// The first shutdown caller awaits the join handle; everyone else waits on
/// the notify until it is done.
enum JoinState {
	Handle(JoinHandle<()>),
	Joining,
	Done,
}

struct RouterJoin {
	state: tokio::sync::Mutex<JoinState>,
	done: Notify,
}

impl RouterJoin {
	fn new(handle: JoinHandle<()>) -> Self {
		Self {
			state: tokio::sync::Mutex::new(JoinState::Handle(handle)),
			done: Notify::new(),
		}
	}

	async fn join(&self) {
		loop {
			let handle = {
				let mut state = self.state.lock().await;
				match &*state {
					JoinState::Done => return,
					JoinState::Joining => {
						// Register before unlocking so the leader's notify is not missed.
						let notified = self.done.notified();
						drop(state);
						notified.await;
						continue;
					}
					JoinState::Handle(_) => match std::mem::replace(&mut *state, JoinState::Joining) {
						JoinState::Handle(handle) => handle,
						_ => continue,
					},
				}
			};
			if let Err(err) = handle.await {
				tracing::error!(error = %err, "hoverlord.router.join_failed");
			}
			*self.state.lock().await = JoinState::Done;
			self.done.notify_waiters();
			return;
		}
	}
}
