//! Send/call/reply shared by the controller and its workers.
//!
//! Both sides speak the same protocol; they differ only in where frames go.
//! The controller hands them straight to its router, a worker posts them to
//! its owner and the router picks them up from there.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::correlation::{CallGuard, Correlator};
use crate::protocol::Frame;
use crate::router::Command;
use crate::{Envelope, Error, ExecutionId, Fingerprint, Kind, Recipient, Result};

/// Where an actor's frames go.
#[derive(Debug, Clone)]
pub(crate) enum Outbox {
	/// The controller feeds its router directly.
	Controller(mpsc::UnboundedSender<Command>),
	/// A worker posts to its owner.
	Worker(mpsc::UnboundedSender<Frame>),
}

impl Outbox {
	pub fn post(&self, frame: Frame) -> Result<()> {
		let delivered = match self {
			Self::Controller(commands) => commands
				.send(Command::Frame {
					from: ExecutionId::CONTROLLER,
					frame,
				})
				.is_ok(),
			Self::Worker(owner) => owner.send(frame).is_ok(),
		};
		if delivered { Ok(()) } else { Err(Error::ShutdownInProgress) }
	}
}

/// One actor's messaging endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Port {
	id: ExecutionId,
	outbox: Outbox,
	correlator: Correlator,
	call_timeout: Option<Duration>,
}

impl Port {
	pub fn new(id: ExecutionId, outbox: Outbox, correlator: Correlator, call_timeout: Option<Duration>) -> Self {
		Self {
			id,
			outbox,
			correlator,
			call_timeout,
		}
	}

	pub fn id(&self) -> ExecutionId {
		self.id
	}

	pub fn outbox(&self) -> &Outbox {
		&self.outbox
	}

	pub fn call_timeout(&self) -> Option<Duration> {
		self.call_timeout
	}

	pub fn pending_calls(&self) -> usize {
		self.correlator.len()
	}

	async fn route(&self, envelope: Envelope) -> Result<()> {
		let (ack, verdict) = oneshot::channel();
		self.outbox.post(Frame::Route { envelope, ack })?;
		verdict.await.map_err(|_| Error::ShutdownInProgress)?
	}

	pub async fn send(&self, recipient: Recipient, content: Value) -> Result<()> {
		tracing::trace!(from = %self.id, to = %recipient, "hoverlord.send");
		self.route(Envelope::new(Kind::Send, recipient, self.id, content)).await
	}

	pub async fn call(&self, recipient: Recipient, content: Value, timeout: Option<Duration>) -> Result<Envelope> {
		let fingerprint = Fingerprint::random();
		let settled = self.correlator.register(fingerprint)?;
		let guard = CallGuard::new(fingerprint, self.correlator.clone(), self.outbox.clone());

		tracing::trace!(from = %self.id, to = %recipient, %fingerprint, "hoverlord.call");
		let request = Envelope::new(Kind::Call, recipient, self.id, content).with_fingerprint(fingerprint);
		self.route(request).await?;

		let outcome = match timeout {
			Some(limit) => match tokio::time::timeout(limit, settled).await {
				Ok(outcome) => outcome,
				Err(_) => {
					tracing::debug!(from = %self.id, %fingerprint, ?limit, "hoverlord.call.timeout");
					return Err(Error::CallTimeout(limit));
				}
			},
			None => settled.await,
		};
		guard.disarm();
		outcome.map_err(|_| Error::ShutdownInProgress)?
	}

	pub async fn reply(&self, request: &Envelope, content: Value) -> Result<()> {
		let Some(reply) = Envelope::reply_to(request, self.id, content) else {
			tracing::debug!(from = %self.id, kind = ?request.kind, "hoverlord.reply.not_a_call");
			return Ok(());
		};
		self.route(reply).await
	}
}

/// Generates the public messaging surface of an actor context type.
///
/// The type must provide `fn port(&self) -> &Port` and
/// `fn guard(&self) -> Result<()>`.
macro_rules! messaging_api {
	($ty:ty) => {
		impl $ty {
			/// Sends `content` to `recipient` without waiting for an answer.
			///
			/// Resolves once the router handed the envelope over.
			///
			/// # Errors
			///
			/// `UnknownRecipient` if nothing is registered under `recipient`,
			/// `ShutdownInProgress` after shutdown, `Payload` if `content`
			/// does not serialize.
			pub async fn send(&self, recipient: impl Into<$crate::Recipient>, content: impl serde::Serialize) -> $crate::Result<()> {
				self.guard()?;
				let content = serde_json::to_value(content)?;
				self.port().send(recipient.into(), content).await
			}

			/// Sends a request and waits for its reply.
			///
			/// Uses the configured default call timeout, if any. Dropping the
			/// returned future cancels the call.
			///
			/// # Errors
			///
			/// As [`send`](Self::send), plus `CallTimeout` and `RecipientGone`.
			pub async fn call(&self, recipient: impl Into<$crate::Recipient>, content: impl serde::Serialize) -> $crate::Result<$crate::Envelope> {
				self.guard()?;
				let content = serde_json::to_value(content)?;
				self.port().call(recipient.into(), content, self.port().call_timeout()).await
			}

			/// Sends a request and waits at most `timeout` for its reply.
			///
			/// # Errors
			///
			/// As [`call`](Self::call).
			pub async fn call_timeout(
				&self,
				recipient: impl Into<$crate::Recipient>,
				content: impl serde::Serialize,
				timeout: std::time::Duration,
			) -> $crate::Result<$crate::Envelope> {
				self.guard()?;
				let content = serde_json::to_value(content)?;
				self.port().call(recipient.into(), content, Some(timeout)).await
			}

			/// Answers `request` with `content`.
			///
			/// Answering an envelope that is not a call is a no-op. Only the
			/// first reply to a call is delivered.
			///
			/// # Errors
			///
			/// `UnknownRecipient` if the caller is gone, `ShutdownInProgress`
			/// after shutdown, `Payload` if `content` does not serialize.
			pub async fn reply(&self, request: &$crate::Envelope, content: impl serde::Serialize) -> $crate::Result<()> {
				self.guard()?;
				let content = serde_json::to_value(content)?;
				self.port().reply(request, content).await
			}

			/// Number of this actor's calls still awaiting a reply.
			pub fn pending_calls(&self) -> usize {
				self.port().pending_calls()
			}
		}
	};
}

pub(crate) use messaging_api;
