//! Error types for routing, calls, and worker lifecycle.

use std::time::Duration;

use thiserror::Error;

use crate::{ExecutionId, Fingerprint, Recipient};

/// Errors surfaced by controller and worker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	/// No worker is registered under the given name or identity.
	#[error("unknown recipient: {0}")]
	UnknownRecipient(Recipient),

	/// A freshly drawn fingerprint matched one already in flight.
	///
	/// Natural collisions are negligible, so this indicates a broken random source.
	#[error("fingerprint {0} is already in flight")]
	DuplicateFingerprint(Fingerprint),

	/// No reply arrived before the call deadline.
	#[error("call timed out after {0:?}")]
	CallTimeout(Duration),

	/// The worker could not be created or never became ready.
	#[error("worker spawn failed: {0}")]
	WorkerSpawnFailure(String),

	/// No job is registered under the requested name.
	#[error("no job registered under '{0}'")]
	UnknownJob(String),

	/// The controller has shut down (or is shutting down).
	#[error("controller is shut down")]
	ShutdownInProgress,

	/// The target worker exited while a call to it was pending.
	#[error("recipient {0} terminated while a call was pending")]
	RecipientGone(ExecutionId),

	/// `receive` was already called for this actor.
	#[error("receive handler already installed")]
	ReceiverInstalled,

	/// A payload could not be converted to or from JSON.
	#[error("payload error: {0}")]
	Payload(String),
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Payload(err.to_string())
	}
}

/// Result type for hoverlord operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
