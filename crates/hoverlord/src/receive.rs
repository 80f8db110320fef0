use std::future::Future;
use std::panic::AssertUnwindSafe;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Envelope, ExecutionClass, ExecutionId, join_error_panic_message};

/// Folds mailbox envelopes into `state` until the mailbox closes.
///
/// One reducer step runs at a time, in arrival order. A step that panics is
/// contained: the state from before that envelope is kept and the loop moves on.
pub(crate) async fn fold<C, S, R, Fut>(
	actor: ExecutionId,
	class: ExecutionClass,
	mut mailbox: mpsc::UnboundedReceiver<Envelope>,
	ctx: C,
	initial: S,
	mut reducer: R,
) -> S
where
	C: Clone,
	S: Clone + Send + 'static,
	R: FnMut(S, Envelope, C) -> Fut,
	Fut: Future<Output = S> + Send + 'static,
{
	let mut state = initial;
	let mut handled = 0u64;
	while let Some(envelope) = mailbox.recv().await {
		handled = handled.wrapping_add(1);
		let kind = envelope.kind;
		let snapshot = state.clone();
		let step = match std::panic::catch_unwind(AssertUnwindSafe(|| reducer(state, envelope, ctx.clone()))) {
			Ok(step) => step,
			Err(_) => {
				tracing::warn!(%actor, handled, ?kind, "hoverlord.receive.reducer_panicked");
				state = snapshot;
				continue;
			}
		};
		let mut step = AbortOnDrop(crate::spawn(class, step));
		state = match (&mut step.0).await {
			Ok(next) => next,
			Err(err) => {
				let panic = join_error_panic_message(err);
				tracing::warn!(%actor, handled, ?kind, panic = panic.as_deref().unwrap_or("<cancelled>"), "hoverlord.receive.reducer_panicked");
				snapshot
			}
		};
	}
	tracing::debug!(%actor, handled, "hoverlord.receive.closed");
	state
}

/// Aborts an in-progress reducer step when the loop itself is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
	fn drop(&mut self) {
		self.0.abort();
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::{Kind, Recipient};

	fn message(content: serde_json::Value) -> Envelope {
		Envelope::new(Kind::Send, Recipient::Name("t".into()), ExecutionId::CONTROLLER, content)
	}

	#[tokio::test]
	async fn folds_in_arrival_order() {
		let (tx, rx) = mpsc::unbounded_channel();
		for n in 0..5 {
			tx.send(message(json!(n))).unwrap();
		}
		drop(tx);

		let seen = fold(ExecutionId::CONTROLLER, ExecutionClass::Task, rx, (), Vec::new(), |mut seen: Vec<i64>, msg, ()| async move {
			seen.push(msg.content.as_i64().unwrap_or(-1));
			seen
		})
		.await;
		assert_eq!(seen, vec![0, 1, 2, 3, 4]);
	}

	#[tokio::test]
	async fn panicking_step_keeps_previous_state() {
		let (tx, rx) = mpsc::unbounded_channel();
		for content in [json!("ping"), json!("boom"), json!("ping")] {
			tx.send(message(content)).unwrap();
		}
		drop(tx);

		let count = fold(ExecutionId::CONTROLLER, ExecutionClass::Task, rx, (), 0u32, |count, msg, ()| async move {
			match msg.content.as_str() {
				Some("boom") => panic!("malformed message"),
				Some("ping") => count + 1,
				_ => count,
			}
		})
		.await;
		assert_eq!(count, 2);
	}

	#[tokio::test]
	async fn panicking_reducer_call_keeps_previous_state() {
		let (tx, rx) = mpsc::unbounded_channel();
		for content in [json!(1), json!(0), json!(2)] {
			tx.send(message(content)).unwrap();
		}
		drop(tx);

		let sum = fold(ExecutionId::CONTROLLER, ExecutionClass::Task, rx, (), 0u64, |sum, msg, ()| {
			let n = msg.content.as_u64().unwrap_or_default();
			assert!(n != 0, "zero is not accepted");
			async move { sum + n }
		})
		.await;
		assert_eq!(sum, 3);
	}
}
