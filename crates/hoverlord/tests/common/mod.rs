//! Jobs and helpers shared by the integration suites.

#![allow(dead_code, reason = "each test file uses a subset of the helpers")]

use std::time::Duration;

use hoverlord::{Controller, ControllerBuilder, ControllerConfig, Result, WorkerContext};
use serde_json::{Value, json};

/// Installs a test-writer subscriber once per binary.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Builder with every job below registered and a short ready timeout.
pub fn builder() -> ControllerBuilder {
	init_tracing();
	Controller::builder()
		.config(ControllerConfig::default().ready_timeout(Duration::from_secs(2)))
		.job("counter", counter)
		.job("receiver", receiver)
		.job("stateful", stateful)
		.job("caller", caller)
		.job("isolated", isolated)
		.job("crasher", crasher)
		.job("fragile", fragile)
		.job("never_ready", never_ready)
		.job("quits_early", quits_early)
		.job("replies_twice", replies_twice)
		.job("silent", silent)
		.job("reporter", reporter)
		.job("whoami", whoami)
}

/// Counts `"ping"`; answers `"pang"` with the count.
pub async fn counter(ctx: WorkerContext) -> Result<()> {
	ctx.receive(0i64, |count, msg, ctx| async move {
		match msg.content.as_str() {
			Some("ping") => count + 1,
			Some("pang") => {
				let _ = ctx.reply(&msg, count).await;
				count
			}
			_ => count,
		}
	})
	.await?;
	Ok(())
}

/// Answers `["ping", n]` with `["pong", n]`.
pub async fn receiver(ctx: WorkerContext) -> Result<()> {
	ctx.receive((), |state, msg, ctx| async move {
		match msg.content::<(String, u64)>() {
			Ok((tag, n)) if tag == "ping" => {
				let _ = ctx.reply(&msg, ("pong", n)).await;
			}
			_ => {}
		}
		state
	})
	.await
}

/// Holds a number: `{"add": n}` adds, `"get"` answers with it.
pub async fn stateful(ctx: WorkerContext) -> Result<()> {
	let start: i64 = ctx.vars().unwrap_or_default();
	ctx.receive(start, |value, msg, ctx| async move {
		if let Some(by) = msg.content.get("add").and_then(Value::as_i64) {
			return value + by;
		}
		if msg.content == "get" {
			let _ = ctx.reply(&msg, value).await;
		}
		value
	})
	.await?;
	Ok(())
}

/// On `"relay"`: reads `stateful`, bumps it by 5, answers with what it read.
pub async fn caller(ctx: WorkerContext) -> Result<()> {
	ctx.receive((), |state, msg, ctx| async move {
		if msg.content == "relay" {
			let seen = match ctx.call("stateful", "get").await {
				Ok(reply) => reply.content,
				Err(err) => json!(err.to_string()),
			};
			let _ = ctx.send("stateful", json!({ "add": 5 })).await;
			let _ = ctx.reply(&msg, seen).await;
		}
		state
	})
	.await
}

/// Keeps its own copy of the spawn-time list: `{"push": n}` appends, `"get"` answers.
pub async fn isolated(ctx: WorkerContext) -> Result<()> {
	let items: Vec<i64> = ctx.vars()?;
	ctx.receive(items, |mut items, msg, ctx| async move {
		if let Some(n) = msg.content.get("push").and_then(Value::as_i64) {
			items.push(n);
		} else if msg.content == "get" {
			let _ = ctx.reply(&msg, &items).await;
		}
		items
	})
	.await?;
	Ok(())
}

/// Panics the whole worker on `"crash"`; ignores everything else.
pub async fn crasher(ctx: WorkerContext) -> Result<()> {
	ctx.ready()?;
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	ctx.spawn({
		let ctx = ctx.clone();
		async move {
			ctx.receive((), move |state, msg, _ctx| {
				let tx = tx.clone();
				async move {
					if msg.content == "crash" {
						let _ = tx.send(());
					}
					state
				}
			})
			.await
		}
	});
	if rx.recv().await.is_some() {
		panic!("crash requested");
	}
	Ok(())
}

/// A reducer step panics on `"boom"`; counts `"ping"`; answers `"pang"`.
pub async fn fragile(ctx: WorkerContext) -> Result<()> {
	ctx.receive(0i64, |count, msg, ctx| async move {
		match msg.content.as_str() {
			Some("boom") => panic!("malformed message"),
			Some("ping") => count + 1,
			Some("pang") => {
				let _ = ctx.reply(&msg, count).await;
				count
			}
			_ => count,
		}
	})
	.await?;
	Ok(())
}

/// Never completes the readiness handshake.
pub async fn never_ready(_ctx: WorkerContext) -> Result<()> {
	tokio::time::sleep(Duration::from_secs(3600)).await;
	Ok(())
}

/// Fails before it is ready.
pub async fn quits_early(_ctx: WorkerContext) -> Result<()> {
	Err(hoverlord::Error::Payload("missing configuration".into()))
}

/// Answers every call twice.
pub async fn replies_twice(ctx: WorkerContext) -> Result<()> {
	ctx.receive((), |state, msg, ctx| async move {
		let _ = ctx.reply(&msg, "first").await;
		let _ = ctx.reply(&msg, "second").await;
		state
	})
	.await
}

/// Takes calls and never answers them.
pub async fn silent(ctx: WorkerContext) -> Result<()> {
	ctx.receive((), |state, _msg, _ctx| async move { state }).await
}

/// On `"report"`: sends `"hello"` to the controller, then asks it `"question"`
/// and answers the original call with the controller's reply.
pub async fn reporter(ctx: WorkerContext) -> Result<()> {
	ctx.receive((), |state, msg, ctx| async move {
		if msg.content == "report" {
			let _ = ctx.send(hoverlord::Recipient::CONTROLLER, "hello").await;
			let answer = match ctx.call(hoverlord::Recipient::CONTROLLER, "question").await {
				Ok(reply) => reply.content,
				Err(err) => json!(err.to_string()),
			};
			let _ = ctx.reply(&msg, answer).await;
		}
		state
	})
	.await
}

/// Answers any call with its identity, name and class, and tries to send to
/// the recipient named in `{"poke": name}`.
pub async fn whoami(ctx: WorkerContext) -> Result<()> {
	ctx.receive((), |state, msg, ctx| async move {
		if let Some(target) = msg.content.get("poke").and_then(Value::as_str) {
			let outcome = match ctx.send(target, "ping").await {
				Ok(()) => json!("ok"),
				Err(err) => json!(err.to_string()),
			};
			let _ = ctx.reply(&msg, outcome).await;
		} else {
			let _ = ctx.reply(&msg, json!({ "id": ctx.id(), "name": ctx.name(), "class": ctx.class() })).await;
		}
		state
	})
	.await
}
