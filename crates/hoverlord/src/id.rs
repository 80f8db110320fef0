use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of one execution context.
///
/// Identities are handed out by the [`Executor`](crate::Executor) that creates
/// a worker and never change afterwards. [`ExecutionId::CONTROLLER`] is
/// reserved for the controller itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(u64);

impl ExecutionId {
	/// Identity of the controller.
	pub const CONTROLLER: Self = Self(0);

	/// Returns the raw identity value.
	pub const fn get(self) -> u64 {
		self.0
	}

	/// Returns true for the controller identity.
	pub const fn is_controller(self) -> bool {
		self.0 == Self::CONTROLLER.0
	}
}

impl std::fmt::Display for ExecutionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ExecutionId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.parse().map(Self)
	}
}

/// Monotonic identity clock. The first identity issued is 1.
#[derive(Debug, Default, Clone)]
pub(crate) struct IdClock {
	next: Arc<AtomicU64>,
}

impl IdClock {
	/// Returns the next worker identity.
	pub fn next(&self) -> ExecutionId {
		ExecutionId(self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
	}
}

/// Random 128-bit token pairing one call with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Uuid);

impl Fingerprint {
	/// Draws a fresh fingerprint from the OS-seeded random source.
	pub fn random() -> Self {
		Self(Uuid::new_v4())
	}

	/// Returns the token as an integer.
	pub fn as_u128(self) -> u128 {
		self.0.as_u128()
	}
}

impl std::fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0.simple())
	}
}
