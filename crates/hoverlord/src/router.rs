//! The controller's execution context.
//!
//! One router task per controller owns the [`Registry`] and the table of calls
//! in flight. Every frame from every actor passes through here, so routing,
//! stale-reply filtering and crash cleanup all happen on a single task.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Delivery, Frame};
use crate::registry::{Registry, WorkerHandle, WorkerRecord};
use crate::{Envelope, Error, ExecutionClass, ExecutionId, ExecutionUnit, Fingerprint, Kind, Result, WorkerExit, WorkerRef};

/// Requests handled by the router.
#[derive(Debug)]
pub(crate) enum Command {
	/// A frame posted by an actor.
	Frame { from: ExecutionId, frame: Frame },
	/// Register a freshly created unit and report once it is ready.
	Spawn {
		unit: ExecutionUnit,
		name: String,
		class: ExecutionClass,
		ready: oneshot::Sender<Result<WorkerRef>>,
	},
	/// Drop a worker that never became ready.
	Abort(ExecutionId),
	/// Snapshot the registry.
	Workers(oneshot::Sender<Vec<WorkerRecord>>),
	/// Terminate every worker and stop routing.
	Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
	origin: ExecutionId,
	target: ExecutionId,
}

pub(crate) struct Router {
	registry: Registry,
	in_flight: HashMap<Fingerprint, InFlight>,
	awaiting_ready: HashMap<ExecutionId, oneshot::Sender<Result<WorkerRef>>>,
	commands: mpsc::UnboundedReceiver<Command>,
	loopback: mpsc::UnboundedSender<Command>,
	cancel: CancellationToken,
	shutdown_grace: Duration,
}

impl Router {
	pub fn new(
		registry: Registry,
		commands: mpsc::UnboundedReceiver<Command>,
		loopback: mpsc::UnboundedSender<Command>,
		cancel: CancellationToken,
		shutdown_grace: Duration,
	) -> Self {
		Self {
			registry,
			in_flight: HashMap::new(),
			awaiting_ready: HashMap::new(),
			commands,
			loopback,
			cancel,
			shutdown_grace,
		}
	}

	/// Routes until shutdown is requested or the controller is dropped.
	pub async fn run(mut self) {
		tracing::debug!("hoverlord.router.start");
		loop {
			let command = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => break,
				command = self.commands.recv() => command,
			};
			match command {
				Some(Command::Shutdown) | None => break,
				Some(command) => self.handle(command),
			}
		}
		self.teardown().await;
	}

	fn handle(&mut self, command: Command) {
		match command {
			Command::Frame { from, frame } => self.on_frame(from, frame),
			Command::Spawn { unit, name, class, ready } => self.on_spawn(unit, name, class, ready),
			Command::Abort(id) => self.abort(id),
			Command::Workers(reply) => {
				let _ = reply.send(self.registry.snapshots());
			}
			Command::Shutdown => {}
		}
	}

	fn on_frame(&mut self, from: ExecutionId, frame: Frame) {
		match frame {
			Frame::Route { envelope, ack } => {
				let verdict = self.route(from, envelope);
				let _ = ack.send(verdict);
			}
			Frame::Ready => self.on_ready(from),
			Frame::Cancel(fingerprint) => {
				if self.in_flight.get(&fingerprint).is_some_and(|call| call.origin == from) {
					self.in_flight.remove(&fingerprint);
					tracing::trace!(%from, %fingerprint, "hoverlord.router.call_cancelled");
				}
			}
			Frame::Exited(exit) => self.on_exit(from, exit),
		}
	}

	fn route(&mut self, from: ExecutionId, mut envelope: Envelope) -> Result<()> {
		envelope.sender = Some(from);
		envelope.from_worker = !from.is_controller();
		let target = self.registry.resolve(&envelope.recipient).inspect_err(|_| {
			tracing::warn!(%from, to = %envelope.recipient, kind = ?envelope.kind, "hoverlord.router.unknown_recipient");
		})?;

		let fingerprint = envelope.fingerprint;
		match (envelope.kind, fingerprint) {
			(Kind::Call, Some(fingerprint)) => {
				if self.in_flight.contains_key(&fingerprint) {
					tracing::error!(%from, %fingerprint, "hoverlord.router.duplicate_fingerprint");
					return Err(Error::DuplicateFingerprint(fingerprint));
				}
				self.in_flight.insert(fingerprint, InFlight { origin: from, target });
			}
			(Kind::Reply, Some(fingerprint)) => {
				let answers = self.in_flight.get(&fingerprint).is_some_and(|call| call.origin == target && call.target == from);
				if !answers {
					tracing::debug!(%from, %fingerprint, "hoverlord.router.stale_reply");
					return Ok(());
				}
				self.in_flight.remove(&fingerprint);
			}
			(Kind::Reply, None) => {
				tracing::warn!(%from, "hoverlord.router.reply_without_fingerprint");
				return Ok(());
			}
			_ => {}
		}

		tracing::trace!(%from, %target, kind = ?envelope.kind, "hoverlord.router.relay");
		let kind = envelope.kind;
		self.registry.deliver(target, Delivery::Envelope(envelope)).inspect_err(|err| {
			tracing::warn!(%from, %target, error = %err, "hoverlord.router.undeliverable");
			if let (Kind::Call, Some(fingerprint)) = (kind, fingerprint) {
				self.in_flight.remove(&fingerprint);
			}
		})
	}

	fn on_spawn(&mut self, mut unit: ExecutionUnit, name: String, class: ExecutionClass, ready: oneshot::Sender<Result<WorkerRef>>) {
		let id = unit.id();
		if let Some(outbound) = unit.take_outbound() {
			crate::spawn(ExecutionClass::Task, forward(id, outbound, self.loopback.clone()));
		}
		if let Some(superseded) = self.registry.store(WorkerHandle::new(unit, name.clone(), class)) {
			tracing::debug!(worker = %name, %id, %superseded, "hoverlord.registry.superseded");
		}
		tracing::debug!(worker = %name, %id, %class, workers = self.registry.len(), "hoverlord.worker.registered");
		self.awaiting_ready.insert(id, ready);
	}

	fn on_ready(&mut self, id: ExecutionId) {
		let Some(handle) = self.registry.mark_ready(id) else {
			return;
		};
		let worker = WorkerRef::new(id, handle.name.clone());
		tracing::debug!(worker = %worker.name(), %id, "hoverlord.worker.ready");
		let Some(ready) = self.awaiting_ready.remove(&id) else {
			return;
		};
		if ready.send(Ok(worker)).is_err() {
			// The spawner gave up; nobody can address this worker by its handle.
			self.abort(id);
		}
	}

	fn abort(&mut self, id: ExecutionId) {
		self.awaiting_ready.remove(&id);
		if let Some(handle) = self.registry.purge(id) {
			tracing::debug!(worker = %handle.name, %id, "hoverlord.worker.aborted");
			handle.unit.terminate();
			self.drop_routes_of(id);
		}
	}

	fn on_exit(&mut self, id: ExecutionId, exit: WorkerExit) {
		let Some(handle) = self.registry.purge(id) else {
			return;
		};
		if exit.is_failure() {
			tracing::warn!(worker = %handle.name, %id, %exit, "hoverlord.worker.crashed");
		} else {
			tracing::debug!(worker = %handle.name, %id, %exit, "hoverlord.worker.exited");
		}
		if let Some(ready) = self.awaiting_ready.remove(&id) {
			let _ = ready.send(Err(Error::WorkerSpawnFailure(format!("worker '{}' exited before it was ready: {exit}", handle.name))));
		}
		self.drop_routes_of(id);
	}

	/// Fails calls pending on `id` and forgets calls `id` issued.
	fn drop_routes_of(&mut self, id: ExecutionId) {
		let orphaned: Vec<_> = self
			.in_flight
			.iter()
			.filter(|(_, call)| call.origin == id || call.target == id)
			.map(|(fingerprint, call)| (*fingerprint, *call))
			.collect();
		for (fingerprint, call) in orphaned {
			self.in_flight.remove(&fingerprint);
			if call.target == id && call.origin != id {
				let failure = Delivery::Failure {
					fingerprint,
					error: Error::RecipientGone(id),
				};
				if self.registry.deliver(call.origin, failure).is_err() {
					tracing::debug!(origin = %call.origin, %fingerprint, "hoverlord.router.failure_undeliverable");
				}
			}
		}
	}

	async fn teardown(mut self) {
		for (_, ready) in self.awaiting_ready.drain() {
			let _ = ready.send(Err(Error::ShutdownInProgress));
		}
		self.in_flight.clear();
		let mut live: HashSet<ExecutionId> = self.registry.snapshots().into_iter().map(|record| record.id).collect();
		let terminated = self.registry.shutdown();
		tracing::info!(workers = terminated, "hoverlord.controller.shutdown");

		// Give terminated workers a moment to report their exit so shutdown
		// returns with nothing left running.
		let deadline = tokio::time::Instant::now() + self.shutdown_grace;
		while !live.is_empty() {
			let command = match tokio::time::timeout_at(deadline, self.commands.recv()).await {
				Ok(Some(command)) => command,
				Ok(None) => break,
				Err(_) => {
					tracing::warn!(remaining = live.len(), "hoverlord.controller.shutdown_grace_elapsed");
					break;
				}
			};
			match command {
				Command::Frame {
					from,
					frame: Frame::Exited(_),
				} => {
					live.remove(&from);
				}
				Command::Frame {
					frame: Frame::Route { ack, .. },
					..
				} => {
					let _ = ack.send(Err(Error::ShutdownInProgress));
				}
				Command::Spawn { ready, .. } => {
					let _ = ready.send(Err(Error::ShutdownInProgress));
				}
				Command::Workers(reply) => {
					let _ = reply.send(Vec::new());
				}
				_ => {}
			}
		}
		tracing::debug!("hoverlord.router.stop");
	}
}

/// Pumps one worker's frames into the router.
///
/// A worker that vanishes without its final frame is reported as terminated.
async fn forward(id: ExecutionId, mut outbound: mpsc::UnboundedReceiver<Frame>, router: mpsc::UnboundedSender<Command>) {
	while let Some(frame) = outbound.recv().await {
		let last = matches!(frame, Frame::Exited(_));
		if router.send(Command::Frame { from: id, frame }).is_err() || last {
			return;
		}
	}
	let _ = router.send(Command::Frame {
		from: id,
		frame: Frame::Exited(WorkerExit::Terminated),
	});
}
