//! Frames exchanged between an execution unit and its owning controller.
//!
//! Actors never talk to each other directly. Every actor posts [`Frame`]s to
//! the controller's router, and the router posts [`Delivery`]s to the inbound
//! channel of the addressed actor.

use tokio::sync::oneshot;

use crate::{Envelope, Error, Fingerprint, Result, WorkerExit};

/// Actor → router.
#[derive(Debug)]
pub enum Frame {
	/// Readiness handshake: the worker is about to process its inbound queue.
	Ready,
	/// Route an envelope. `ack` receives the routing verdict.
	Route {
		/// Envelope to relay.
		envelope: Envelope,
		/// Resolves once the envelope was handed to its recipient, or failed to resolve.
		ack: oneshot::Sender<Result<()>>,
	},
	/// The caller gave up on a call; forget its in-flight route.
	Cancel(Fingerprint),
	/// Final frame of a worker.
	Exited(WorkerExit),
}

/// Router → actor.
#[derive(Debug)]
pub enum Delivery {
	/// An envelope addressed to this actor.
	Envelope(Envelope),
	/// A call this actor issued failed after it was routed.
	Failure {
		/// Fingerprint of the failed call.
		fingerprint: Fingerprint,
		/// Why the call failed.
		error: Error,
	},
}
