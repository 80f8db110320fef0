use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::messenger::{Port, messaging_api};
use crate::protocol::Frame;
use crate::{Envelope, Error, ExecutionClass, ExecutionId, Result};

/// A worker's view of the system, handed to its [`Job`](crate::Job).
///
/// Cheap to clone; every clone refers to the same worker.
#[derive(Clone)]
pub struct WorkerContext {
	inner: Arc<WorkerInner>,
}

struct WorkerInner {
	port: Port,
	name: String,
	class: ExecutionClass,
	vars: Value,
	mailbox: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
	ready: AtomicBool,
	cancel: CancellationToken,
}

impl WorkerContext {
	pub(crate) fn new(
		port: Port,
		name: String,
		class: ExecutionClass,
		vars: Value,
		mailbox: mpsc::UnboundedReceiver<Envelope>,
		cancel: CancellationToken,
	) -> Self {
		Self {
			inner: Arc::new(WorkerInner {
				port,
				name,
				class,
				vars,
				mailbox: Mutex::new(Some(mailbox)),
				ready: AtomicBool::new(false),
				cancel,
			}),
		}
	}

	pub(crate) fn port(&self) -> &Port {
		&self.inner.port
	}

	fn guard(&self) -> Result<()> {
		if self.inner.cancel.is_cancelled() { Err(Error::ShutdownInProgress) } else { Ok(()) }
	}

	/// This worker's execution identity.
	pub fn id(&self) -> ExecutionId {
		self.inner.port.id()
	}

	/// Name the worker was spawned under.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Scheduling class of this worker.
	pub fn class(&self) -> ExecutionClass {
		self.inner.class
	}

	/// Decodes a private copy of the values passed at spawn time.
	///
	/// # Errors
	///
	/// `Payload` if the values do not decode as `T`.
	pub fn vars<T: DeserializeOwned>(&self) -> Result<T> {
		Ok(T::deserialize(&self.inner.vars)?)
	}

	/// Tells the controller this worker is up. Idempotent.
	///
	/// [`receive`](Self::receive) calls this itself; jobs that never receive
	/// call it once their setup is done so `spawn` can resolve.
	///
	/// # Errors
	///
	/// `ShutdownInProgress` if the controller is gone.
	pub fn ready(&self) -> Result<()> {
		if self.inner.ready.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		self.inner.port.outbox().post(Frame::Ready)
	}

	/// Folds every inbound envelope into a running state.
	///
	/// Sends the readiness handshake, then runs `reducer` once per envelope in
	/// arrival order until the worker is terminated. Replies to this worker's
	/// own calls never reach the reducer, so a reducer may await a call; it
	/// just holds up later envelopes until the reply arrives.
	///
	/// A reducer step that panics is logged and skipped, keeping the state
	/// from before that envelope.
	///
	/// # Errors
	///
	/// `ReceiverInstalled` on a second call.
	pub async fn receive<S, R, Fut>(&self, initial: S, reducer: R) -> Result<S>
	where
		S: Clone + Send + 'static,
		R: FnMut(S, Envelope, WorkerContext) -> Fut + Send + 'static,
		Fut: Future<Output = S> + Send + 'static,
	{
		let mailbox = self.inner.mailbox.lock().take().ok_or(Error::ReceiverInstalled)?;
		self.ready()?;
		Ok(crate::receive::fold(self.id(), self.inner.class, mailbox, self.clone(), initial, reducer).await)
	}

	/// Runs `fut` alongside the reducer, for continuations that should not
	/// hold up the inbound queue.
	///
	/// The task is cancelled when the worker exits.
	pub fn spawn<F>(&self, fut: F) -> JoinHandle<Option<F::Output>>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		let cancel = self.inner.cancel.clone();
		crate::spawn(self.inner.class, async move {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => None,
				out = fut => Some(out),
			}
		})
	}

	/// Terminates this worker, as if its owner had.
	pub fn stop(&self) {
		tracing::debug!(worker = %self.inner.name, id = %self.id(), "hoverlord.worker.stop");
		self.inner.cancel.cancel();
	}
}

messaging_api!(WorkerContext);

impl std::fmt::Debug for WorkerContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerContext")
			.field("id", &self.id())
			.field("name", &self.inner.name)
			.field("class", &self.inner.class)
			.finish_non_exhaustive()
	}
}
