//! Pending-call bookkeeping for one actor's inbound path.
//!
//! Each actor owns a [`Correlator`]. `call` registers a continuation keyed by
//! its fingerprint; the actor's demultiplexer resolves it with the first reply
//! carrying that fingerprint and forwards everything else to the reducer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::messenger::Outbox;
use crate::protocol::{Delivery, Frame};
use crate::{Envelope, Error, Fingerprint, Kind, Result};

type Continuation = oneshot::Sender<Result<Envelope>>;

/// Table of calls awaiting their reply.
#[derive(Debug, Clone, Default)]
pub(crate) struct Correlator {
	pending: Arc<Mutex<HashMap<Fingerprint, Continuation>>>,
}

impl Correlator {
	/// Registers a pending call and returns the receiver its reply resolves.
	pub fn register(&self, fingerprint: Fingerprint) -> Result<oneshot::Receiver<Result<Envelope>>> {
		let mut pending = self.pending.lock();
		if pending.contains_key(&fingerprint) {
			tracing::error!(%fingerprint, "hoverlord.correlation.duplicate_fingerprint");
			return Err(Error::DuplicateFingerprint(fingerprint));
		}
		let (tx, rx) = oneshot::channel();
		pending.insert(fingerprint, tx);
		Ok(rx)
	}

	/// Drops a pending call. Returns true if it was still pending.
	pub fn forget(&self, fingerprint: &Fingerprint) -> bool {
		self.pending.lock().remove(fingerprint).is_some()
	}

	/// Number of calls still awaiting a reply.
	pub fn len(&self) -> usize {
		self.pending.lock().len()
	}

	/// Settles pending calls from one delivery.
	///
	/// Returns the envelope when it is meant for the actor's reducer. Replies
	/// nobody is waiting for are discarded.
	pub fn dispatch(&self, delivery: Delivery) -> Option<Envelope> {
		match delivery {
			Delivery::Envelope(envelope) if envelope.kind == Kind::Reply => {
				let Some(fingerprint) = envelope.fingerprint else {
					tracing::warn!(sender = ?envelope.sender, "hoverlord.correlation.reply_without_fingerprint");
					return None;
				};
				let continuation = self.pending.lock().remove(&fingerprint);
				match continuation {
					Some(tx) => {
						let _ = tx.send(Ok(envelope));
					}
					None => tracing::debug!(%fingerprint, "hoverlord.correlation.stale_reply"),
				}
				None
			}
			Delivery::Envelope(envelope) => Some(envelope),
			Delivery::Failure { fingerprint, error } => {
				let continuation = self.pending.lock().remove(&fingerprint);
				if let Some(tx) = continuation {
					let _ = tx.send(Err(error));
				}
				None
			}
		}
	}

	/// Rejects every pending call with `error`.
	pub fn reject_all(&self, error: &Error) {
		let drained: Vec<_> = self.pending.lock().drain().collect();
		for (_, tx) in drained {
			let _ = tx.send(Err(error.clone()));
		}
	}
}

/// Cancels a pending call when dropped before it settles.
///
/// Covers timeouts and callers dropping the call future alike: the local
/// continuation is removed and the router forgets the in-flight route.
pub(crate) struct CallGuard {
	fingerprint: Fingerprint,
	correlator: Correlator,
	outbox: Outbox,
	armed: bool,
}

impl CallGuard {
	pub fn new(fingerprint: Fingerprint, correlator: Correlator, outbox: Outbox) -> Self {
		Self {
			fingerprint,
			correlator,
			outbox,
			armed: true,
		}
	}

	/// The call settled; nothing to clean up.
	pub fn disarm(mut self) {
		self.armed = false;
	}
}

impl Drop for CallGuard {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		if self.correlator.forget(&self.fingerprint) {
			tracing::debug!(fingerprint = %self.fingerprint, "hoverlord.call.cancelled");
		}
		let _ = self.outbox.post(Frame::Cancel(self.fingerprint));
	}
}

/// Pumps one actor's inbound deliveries until the channel closes.
///
/// Replies settle pending calls here, independently of the reducer, so a
/// reducer awaiting a call still sees it resolve.
pub(crate) async fn demux(mut inbound: mpsc::UnboundedReceiver<Delivery>, correlator: Correlator, mailbox: mpsc::UnboundedSender<Envelope>) {
	while let Some(delivery) = inbound.recv().await {
		let Some(envelope) = correlator.dispatch(delivery) else {
			continue;
		};
		if let Err(mpsc::error::SendError(envelope)) = mailbox.send(envelope) {
			tracing::debug!(sender = ?envelope.sender, kind = ?envelope.kind, "hoverlord.demux.mailbox_closed");
		}
	}
	correlator.reject_all(&Error::ShutdownInProgress);
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::{ExecutionId, Recipient};

	fn reply(fingerprint: Fingerprint, content: serde_json::Value) -> Delivery {
		Delivery::Envelope(Envelope::new(Kind::Reply, Recipient::CONTROLLER, "1".parse().unwrap(), content).with_fingerprint(fingerprint))
	}

	#[tokio::test]
	async fn first_matching_reply_wins() {
		let correlator = Correlator::default();
		let fingerprint = Fingerprint::random();
		let rx = correlator.register(fingerprint).unwrap();

		assert!(correlator.dispatch(reply(fingerprint, json!(1))).is_none());
		assert!(correlator.dispatch(reply(fingerprint, json!(2))).is_none());

		let settled = rx.await.unwrap().unwrap();
		assert_eq!(settled.content, json!(1));
		assert_eq!(correlator.len(), 0);
	}

	#[test]
	fn duplicate_registration_is_rejected() {
		let correlator = Correlator::default();
		let fingerprint = Fingerprint::random();
		let _rx = correlator.register(fingerprint).unwrap();
		assert_eq!(correlator.register(fingerprint).unwrap_err(), Error::DuplicateFingerprint(fingerprint));
	}

	#[test]
	fn requests_pass_through_to_the_reducer() {
		let correlator = Correlator::default();
		let request = Envelope::new(Kind::Call, "demo".into(), ExecutionId::CONTROLLER, json!("pang")).with_fingerprint(Fingerprint::random());
		let forwarded = correlator.dispatch(Delivery::Envelope(request.clone()));
		assert_eq!(forwarded, Some(request));
	}

	#[tokio::test]
	async fn failure_rejects_only_its_call() {
		let correlator = Correlator::default();
		let doomed = Fingerprint::random();
		let survivor = Fingerprint::random();
		let doomed_rx = correlator.register(doomed).unwrap();
		let _survivor_rx = correlator.register(survivor).unwrap();

		let gone: ExecutionId = "9".parse().unwrap();
		correlator.dispatch(Delivery::Failure {
			fingerprint: doomed,
			error: Error::RecipientGone(gone),
		});

		assert_eq!(doomed_rx.await.unwrap(), Err(Error::RecipientGone(gone)));
		assert_eq!(correlator.len(), 1);
	}

	#[tokio::test]
	async fn demux_rejects_pending_calls_when_inbound_closes() {
		let correlator = Correlator::default();
		let rx = correlator.register(Fingerprint::random()).unwrap();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (mailbox_tx, mut mailbox_rx) = mpsc::unbounded_channel();

		let send = Envelope::new(Kind::Send, "demo".into(), ExecutionId::CONTROLLER, json!("ping"));
		inbound_tx.send(Delivery::Envelope(send.clone())).unwrap();
		drop(inbound_tx);

		demux(inbound_rx, correlator.clone(), mailbox_tx).await;

		assert_eq!(mailbox_rx.recv().await, Some(send));
		assert_eq!(rx.await.unwrap(), Err(Error::ShutdownInProgress));
	}
}
