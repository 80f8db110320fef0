//! Execution units: the isolated contexts workers run in.
//!
//! An [`Executor`] turns a [`UnitSpec`] into a running [`ExecutionUnit`]. The
//! controller keeps the unit and talks to it only through channels; the
//! worker end, a [`WorkerPort`], drives the job.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::correlation::{Correlator, demux};
use crate::id::IdClock;
use crate::messenger::{Outbox, Port};
use crate::protocol::{Delivery, Frame};
use crate::{Error, ExecutionClass, ExecutionId, Job, Result, WorkerContext, join_error_panic_message};

/// Everything an executor needs to start one worker.
pub struct UnitSpec {
	/// Name the worker is registered under.
	pub name: String,
	/// Scheduling class.
	pub class: ExecutionClass,
	/// Entry point.
	pub job: Arc<dyn Job>,
	/// Initial values, already copied out of the controller.
	pub vars: Value,
	/// Default deadline for the worker's own calls.
	pub call_timeout: Option<Duration>,
}

/// Creates isolated execution units.
pub trait Executor: Send + Sync + 'static {
	/// Starts a worker and returns the owner's end of its unit.
	///
	/// # Errors
	///
	/// `WorkerSpawnFailure` if the unit cannot be started.
	fn create(&self, spec: UnitSpec) -> Result<ExecutionUnit>;
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
	/// The job returned `Ok`.
	Returned,
	/// The job returned an error.
	Failed(String),
	/// The job panicked.
	Panicked(String),
	/// The unit was terminated by its owner or stopped itself.
	Terminated,
}

impl WorkerExit {
	/// Returns true for crashes.
	pub fn is_failure(&self) -> bool {
		matches!(self, Self::Failed(_) | Self::Panicked(_))
	}
}

impl std::fmt::Display for WorkerExit {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Returned => f.write_str("returned"),
			Self::Failed(err) => write!(f, "failed: {err}"),
			Self::Panicked(msg) => write!(f, "panicked: {msg}"),
			Self::Terminated => f.write_str("terminated"),
		}
	}
}

/// Owner's end of one worker.
///
/// Dropping the unit terminates the worker.
#[derive(Debug)]
pub struct ExecutionUnit {
	id: ExecutionId,
	inbound: mpsc::UnboundedSender<Delivery>,
	outbound: Option<mpsc::UnboundedReceiver<Frame>>,
	cancel: CancellationToken,
}

impl ExecutionUnit {
	/// Opens the channel pair for a new unit with identity `id`.
	///
	/// The returned port must be driven with [`WorkerPort::run`] on whatever
	/// context the executor chooses.
	pub fn open(id: ExecutionId, spec: UnitSpec) -> (Self, WorkerPort) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let cancel = CancellationToken::new();
		let unit = Self {
			id,
			inbound: inbound_tx,
			outbound: Some(outbound_rx),
			cancel: cancel.clone(),
		};
		let port = WorkerPort {
			id,
			spec,
			to_owner: outbound_tx,
			from_owner: inbound_rx,
			cancel,
		};
		(unit, port)
	}

	/// Identity of the worker.
	pub fn id(&self) -> ExecutionId {
		self.id
	}

	/// Posts a delivery to the worker's inbound channel.
	///
	/// # Errors
	///
	/// `RecipientGone` once the worker has exited.
	pub fn post(&self, delivery: Delivery) -> Result<()> {
		self.inbound.send(delivery).map_err(|_| Error::RecipientGone(self.id))
	}

	/// Takes the stream of frames the worker posts to its owner.
	///
	/// Returns `None` after the first call.
	pub fn take_outbound(&mut self) -> Option<mpsc::UnboundedReceiver<Frame>> {
		self.outbound.take()
	}

	/// Forcibly stops the worker at its next suspension point.
	pub fn terminate(&self) {
		self.cancel.cancel();
	}

	/// Returns true once the worker was terminated or has exited.
	pub fn is_terminated(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

impl Drop for ExecutionUnit {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Worker's end of an execution unit.
pub struct WorkerPort {
	id: ExecutionId,
	spec: UnitSpec,
	to_owner: mpsc::UnboundedSender<Frame>,
	from_owner: mpsc::UnboundedReceiver<Delivery>,
	cancel: CancellationToken,
}

impl WorkerPort {
	/// Identity of the worker.
	pub fn id(&self) -> ExecutionId {
		self.id
	}

	/// Runs the job until it returns, panics, or the unit is terminated, then
	/// posts the exit to the owner.
	///
	/// Must be polled inside a tokio runtime; the worker's tasks are spawned
	/// onto that runtime.
	pub async fn run(self) -> WorkerExit {
		let Self {
			id,
			spec,
			to_owner,
			from_owner,
			cancel,
		} = self;
		let UnitSpec {
			name,
			class,
			job,
			vars,
			call_timeout,
		} = spec;

		let correlator = Correlator::default();
		let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
		let inbound = crate::spawn(class, demux(from_owner, correlator.clone(), mailbox_tx));
		let port = Port::new(id, Outbox::Worker(to_owner.clone()), correlator, call_timeout);
		let ctx = WorkerContext::new(port, name.clone(), class, vars, mailbox_rx, cancel.clone());

		tracing::debug!(worker = %name, %id, %class, "hoverlord.worker.start");
		let mut task = crate::spawn(class, async move { job.run(ctx).await });
		let exit = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				task.abort();
				// Resolves once the job future is dropped.
				let _ = (&mut task).await;
				WorkerExit::Terminated
			}
			joined = &mut task => match joined {
				Ok(Ok(())) => WorkerExit::Returned,
				Ok(Err(err)) => WorkerExit::Failed(err.to_string()),
				Err(err) => match join_error_panic_message(err) {
					Some(msg) => WorkerExit::Panicked(msg),
					None => WorkerExit::Terminated,
				},
			},
		};

		// Stop continuations the job left behind.
		cancel.cancel();
		inbound.abort();
		tracing::debug!(worker = %name, %id, %exit, "hoverlord.worker.exit");
		let _ = to_owner.send(Frame::Exited(exit.clone()));
		exit
	}
}

/// Runs workers in this process, as tasks or on dedicated threads.
#[derive(Debug, Default)]
pub struct LocalExecutor {
	clock: IdClock,
}

impl LocalExecutor {
	/// Creates an executor with a fresh identity clock.
	pub fn new() -> Self {
		Self::default()
	}
}

impl Executor for LocalExecutor {
	fn create(&self, spec: UnitSpec) -> Result<ExecutionUnit> {
		let id = self.clock.next();
		let class = spec.class;
		let thread_name = format!("hoverlord-{}-{id}", spec.name);
		let (unit, port) = ExecutionUnit::open(id, spec);
		match class {
			ExecutionClass::Task => {
				crate::spawn(class, port.run());
			}
			ExecutionClass::Thread => {
				let runtime = tokio::runtime::Builder::new_current_thread()
					.enable_all()
					.build()
					.map_err(|err| Error::WorkerSpawnFailure(format!("worker runtime: {err}")))?;
				crate::spawn_named_thread(class, thread_name, move || runtime.block_on(port.run()))
					.map_err(|err| Error::WorkerSpawnFailure(format!("worker thread: {err}")))?;
			}
		}
		Ok(unit)
	}
}
