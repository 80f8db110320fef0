use std::future::Future;
use std::sync::OnceLock;

use tokio::task::{JoinError, JoinHandle};

use crate::ExecutionClass;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("hoverlord-global")
			.build()
			.expect("failed to build hoverlord global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task on the current runtime, or the global fallback runtime
/// when called outside of one.
pub(crate) fn spawn<F>(class: ExecutionClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(class = class.as_str(), "hoverlord.spawn");
	runtime_handle().spawn(fut)
}

/// Spawns a dedicated named OS thread.
pub(crate) fn spawn_named_thread<F, R>(class: ExecutionClass, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(class = class.as_str(), "hoverlord.spawn_named_thread");
	std::thread::Builder::new().name(name.into()).spawn(f)
}

/// Extracts the panic payload of a failed task as text.
///
/// Returns `None` when the task was cancelled rather than panicking.
pub(crate) fn join_error_panic_message(err: JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	let payload = err.into_panic();
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return Some((*msg).to_string());
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return Some(msg.clone());
	}
	Some("<non-string panic payload>".to_string())
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn panic_message_from_static_str() {
		let handle = spawn(ExecutionClass::Task, async { panic!("boom-str") });
		let err = handle.await.unwrap_err();
		let msg = join_error_panic_message(err).expect("should be a panic");
		assert!(msg.contains("boom-str"), "expected 'boom-str', got: {msg}");
	}

	#[tokio::test]
	async fn panic_message_from_formatted_string() {
		let handle = spawn(ExecutionClass::Task, async { panic!("{}", String::from("boom-string")) });
		let err = handle.await.unwrap_err();
		let msg = join_error_panic_message(err).expect("should be a panic");
		assert!(msg.contains("boom-string"), "expected 'boom-string', got: {msg}");
	}

	#[tokio::test]
	async fn aborted_task_has_no_panic_message() {
		let handle = spawn(ExecutionClass::Task, async {
			tokio::time::sleep(Duration::from_secs(60)).await;
		});
		handle.abort();
		let err = handle.await.unwrap_err();
		assert!(join_error_panic_message(err).is_none());
	}

	#[test]
	fn spawns_outside_a_runtime() {
		let handle = spawn(ExecutionClass::Task, async { 7 });
		let value = runtime_handle().block_on(handle).unwrap();
		assert_eq!(value, 7);
	}

	#[test]
	fn named_thread_carries_its_name() {
		let handle = spawn_named_thread(ExecutionClass::Thread, "hoverlord-test", || std::thread::current().name().map(str::to_owned)).unwrap();
		assert_eq!(handle.join().unwrap().as_deref(), Some("hoverlord-test"));
	}
}
