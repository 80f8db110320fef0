use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::protocol::Delivery;
use crate::{Error, ExecutionClass, ExecutionId, ExecutionUnit, Recipient, Result};

/// Snapshot of one registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
	/// Execution identity.
	pub id: ExecutionId,
	/// Name the worker was spawned under.
	pub name: String,
	/// Scheduling class.
	pub class: ExecutionClass,
	/// Whether the readiness handshake arrived.
	pub ready: bool,
	/// Whether a later spawn took over the name.
	pub superseded: bool,
}

/// Registry entry for one live worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
	pub id: ExecutionId,
	pub name: String,
	pub class: ExecutionClass,
	pub unit: ExecutionUnit,
	pub ready: bool,
}

impl WorkerHandle {
	pub fn new(unit: ExecutionUnit, name: String, class: ExecutionClass) -> Self {
		Self {
			id: unit.id(),
			name,
			class,
			unit,
			ready: false,
		}
	}
}

/// Names and identities of one controller's live workers.
///
/// Lives inside the router and is only touched from there.
#[derive(Debug)]
pub(crate) struct Registry {
	by_name: HashMap<String, ExecutionId>,
	by_id: HashMap<ExecutionId, WorkerHandle>,
	controller: Option<mpsc::UnboundedSender<Delivery>>,
}

impl Registry {
	/// Creates an empty registry delivering controller-bound traffic to `controller`.
	pub fn new(controller: mpsc::UnboundedSender<Delivery>) -> Self {
		Self {
			by_name: HashMap::new(),
			by_id: HashMap::new(),
			controller: Some(controller),
		}
	}

	/// Registers `handle` under its name, superseding any earlier holder of
	/// that name. Returns the superseded identity.
	///
	/// A superseded worker stays reachable by identity.
	pub fn store(&mut self, handle: WorkerHandle) -> Option<ExecutionId> {
		let superseded = self.by_name.insert(handle.name.clone(), handle.id);
		self.by_id.insert(handle.id, handle);
		superseded
	}

	/// Resolves a recipient: name table first, then identity table.
	pub fn resolve(&self, recipient: &Recipient) -> Result<ExecutionId> {
		let found = match recipient {
			Recipient::Name(name) => self.by_name.get(name).copied().or_else(|| name.parse().ok().filter(|id| self.knows(*id))),
			Recipient::Id(id) => Some(*id).filter(|id| self.knows(*id)),
		};
		found.ok_or_else(|| Error::UnknownRecipient(recipient.clone()))
	}

	fn knows(&self, id: ExecutionId) -> bool {
		id.is_controller() || self.by_id.contains_key(&id)
	}

	/// Posts a delivery to an already resolved actor.
	pub fn deliver(&self, target: ExecutionId, delivery: Delivery) -> Result<()> {
		if target.is_controller() {
			let controller = self.controller.as_ref().ok_or(Error::ShutdownInProgress)?;
			return controller.send(delivery).map_err(|_| Error::ShutdownInProgress);
		}
		let handle = self.by_id.get(&target).ok_or(Error::RecipientGone(target))?;
		handle.unit.post(delivery)
	}

	/// Flags a worker as ready. Returns its handle if it is registered.
	pub fn mark_ready(&mut self, id: ExecutionId) -> Option<&WorkerHandle> {
		let handle = self.by_id.get_mut(&id)?;
		handle.ready = true;
		Some(handle)
	}

	/// Removes a worker. Its name is released only if it still points at it.
	pub fn purge(&mut self, id: ExecutionId) -> Option<WorkerHandle> {
		let handle = self.by_id.remove(&id)?;
		if self.by_name.get(&handle.name) == Some(&id) {
			self.by_name.remove(&handle.name);
		}
		Some(handle)
	}

	/// Terminates every worker and drops all state, including the controller's
	/// inbound path. Returns the number of workers terminated.
	pub fn shutdown(&mut self) -> usize {
		let count = self.by_id.len();
		for handle in self.by_id.values() {
			handle.unit.terminate();
		}
		self.by_id.clear();
		self.by_name.clear();
		self.controller = None;
		count
	}

	/// Returns records sorted by name, then identity.
	pub fn snapshots(&self) -> Vec<WorkerRecord> {
		let mut records: Vec<_> = self
			.by_id
			.values()
			.map(|handle| WorkerRecord {
				id: handle.id,
				name: handle.name.clone(),
				class: handle.class,
				ready: handle.ready,
				superseded: self.by_name.get(&handle.name) != Some(&handle.id),
			})
			.collect();
		records.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
		records
	}

	pub fn len(&self) -> usize {
		self.by_id.len()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use pretty_assertions::assert_eq;
	use serde_json::{Value, json};

	use super::*;
	use crate::id::IdClock;
	use crate::{Envelope, Kind, UnitSpec, WorkerContext, WorkerPort};

	async fn idle(_ctx: WorkerContext) -> Result<()> {
		Ok(())
	}

	struct Fixture {
		registry: Registry,
		controller: mpsc::UnboundedReceiver<Delivery>,
		clock: IdClock,
		ports: Vec<WorkerPort>,
	}

	impl Fixture {
		fn new() -> Self {
			let (tx, rx) = mpsc::unbounded_channel();
			Self {
				registry: Registry::new(tx),
				controller: rx,
				clock: IdClock::default(),
				ports: Vec::new(),
			}
		}

		/// Registers a unit whose port is kept but never run.
		fn add(&mut self, name: &str) -> ExecutionId {
			let spec = UnitSpec {
				name: name.into(),
				class: ExecutionClass::Task,
				job: Arc::new(idle),
				vars: Value::Null,
				call_timeout: None,
			};
			let (unit, port) = ExecutionUnit::open(self.clock.next(), spec);
			let id = unit.id();
			self.ports.push(port);
			self.registry.store(WorkerHandle::new(unit, name.into(), ExecutionClass::Task));
			id
		}
	}

	fn send_to(recipient: impl Into<Recipient>) -> Envelope {
		Envelope::new(Kind::Send, recipient.into(), ExecutionId::CONTROLLER, json!("ping"))
	}

	#[test]
	fn resolves_names_then_identities() {
		let mut fx = Fixture::new();
		let id = fx.add("demo");

		assert_eq!(fx.registry.resolve(&"demo".into()), Ok(id));
		assert_eq!(fx.registry.resolve(&id.into()), Ok(id));
		assert_eq!(fx.registry.resolve(&Recipient::Name(id.to_string())), Ok(id));
		assert_eq!(fx.registry.resolve(&Recipient::CONTROLLER), Ok(ExecutionId::CONTROLLER));
		assert_eq!(fx.registry.resolve(&"nobody".into()), Err(Error::UnknownRecipient("nobody".into())));
	}

	#[test]
	fn a_name_that_looks_like_an_identity_prefers_the_name_table() {
		let mut fx = Fixture::new();
		let first = fx.add("a");
		let named_one = fx.add(&first.to_string());
		assert_ne!(first, named_one);
		assert_eq!(fx.registry.resolve(&Recipient::Name(first.to_string())), Ok(named_one));
	}

	#[test]
	fn name_reuse_supersedes_but_keeps_identity_reachable() {
		let mut fx = Fixture::new();
		let old = fx.add("dup");
		let new = fx.add("dup");

		assert_eq!(fx.registry.resolve(&"dup".into()), Ok(new));
		assert_eq!(fx.registry.resolve(&old.into()), Ok(old));

		let records = fx.registry.snapshots();
		assert_eq!(records.iter().map(|r| (r.id, r.superseded)).collect::<Vec<_>>(), vec![(old, true), (new, false)]);

		// Purging the superseded worker must not release the name.
		fx.registry.purge(old);
		assert_eq!(fx.registry.resolve(&"dup".into()), Ok(new));
		fx.registry.purge(new);
		assert!(fx.registry.resolve(&"dup".into()).is_err());
	}

	#[tokio::test]
	async fn deliver_reaches_worker_inbound_and_controller() {
		let mut fx = Fixture::new();
		let id = fx.add("demo");

		assert_eq!(fx.registry.deliver(id, Delivery::Envelope(send_to("demo"))), Ok(()));
		assert_eq!(fx.registry.deliver(ExecutionId::CONTROLLER, Delivery::Envelope(send_to(Recipient::CONTROLLER))), Ok(()));
		assert!(matches!(fx.controller.recv().await, Some(Delivery::Envelope(_))));
	}

	#[test]
	fn delivery_to_an_exited_worker_reports_it_gone() {
		let mut fx = Fixture::new();
		let id = fx.add("demo");
		fx.ports.clear();
		assert_eq!(fx.registry.deliver(id, Delivery::Envelope(send_to("demo"))), Err(Error::RecipientGone(id)));

		let unknown = fx.clock.next();
		assert_eq!(fx.registry.deliver(unknown, Delivery::Envelope(send_to("demo"))), Err(Error::RecipientGone(unknown)));
	}

	#[test]
	fn shutdown_terminates_everything() {
		let mut fx = Fixture::new();
		let a = fx.add("a");
		fx.add("b");
		fx.registry.mark_ready(a);
		assert!(fx.registry.snapshots()[0].ready);

		assert_eq!(fx.registry.shutdown(), 2);
		assert_eq!(fx.registry.len(), 0);
		assert!(fx.registry.resolve(&"a".into()).is_err());
		assert_eq!(fx.registry.deliver(ExecutionId::CONTROLLER, Delivery::Envelope(send_to("a"))), Err(Error::ShutdownInProgress));
	}
}
