use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ExecutionId, Fingerprint, Result};

/// Addressee of an envelope: a logical name or an execution identity.
///
/// Serialized untagged, so `"demo"` is a name and `3` an identity. A name that
/// matches no registered worker but parses as an identity is resolved against
/// the identity table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
	/// Identity assigned when the worker was created.
	Id(ExecutionId),
	/// Name the worker was spawned under.
	Name(String),
}

impl Recipient {
	/// The controller of the current registry.
	pub const CONTROLLER: Self = Self::Id(ExecutionId::CONTROLLER);
}

impl std::fmt::Display for Recipient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Id(id) => write!(f, "#{id}"),
			Self::Name(name) => write!(f, "'{name}'"),
		}
	}
}

impl From<&str> for Recipient {
	fn from(name: &str) -> Self {
		Self::Name(name.to_owned())
	}
}

impl From<String> for Recipient {
	fn from(name: String) -> Self {
		Self::Name(name)
	}
}

impl From<ExecutionId> for Recipient {
	fn from(id: ExecutionId) -> Self {
		Self::Id(id)
	}
}

/// Role of an envelope in the messaging protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
	/// Fire-and-forget message.
	Send,
	/// Request expecting exactly one reply with the same fingerprint.
	Call,
	/// Answer to a call.
	Reply,
}

/// Message unit relayed between actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	/// Addressee, as given by the sender.
	pub recipient: Recipient,
	/// Identity of the sending actor, stamped by the router.
	pub sender: Option<ExecutionId>,
	/// Correlation token, present on calls and replies.
	pub fingerprint: Option<Fingerprint>,
	/// Protocol role.
	pub kind: Kind,
	/// Payload, copied by value on every hop.
	pub content: Value,
	/// Whether the envelope originated in a worker.
	pub from_worker: bool,
}

impl Envelope {
	pub(crate) fn new(kind: Kind, recipient: Recipient, sender: ExecutionId, content: Value) -> Self {
		Self {
			recipient,
			sender: Some(sender),
			fingerprint: None,
			kind,
			content,
			from_worker: !sender.is_controller(),
		}
	}

	#[must_use]
	pub(crate) fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
		self.fingerprint = Some(fingerprint);
		self
	}

	/// Builds the reply to `request`, or `None` if `request` is not an answerable call.
	pub(crate) fn reply_to(request: &Envelope, from: ExecutionId, content: Value) -> Option<Self> {
		if request.kind != Kind::Call {
			return None;
		}
		let (Some(sender), Some(fingerprint)) = (request.sender, request.fingerprint) else {
			return None;
		};
		Some(Self::new(Kind::Reply, Recipient::Id(sender), from, content).with_fingerprint(fingerprint))
	}

	/// Decodes the payload into `T`.
	pub fn content<T: DeserializeOwned>(&self) -> Result<T> {
		Ok(T::deserialize(&self.content)?)
	}

	/// Returns true if this envelope expects a reply.
	pub fn is_call(&self) -> bool {
		self.kind == Kind::Call
	}
}
