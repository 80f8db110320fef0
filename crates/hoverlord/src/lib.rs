//! In-process actor workers with name/identity addressing and correlated calls.
//!
//! A [`Controller`] owns one registry of workers. Workers are spawned from
//! registered [`Job`]s, addressed by logical name or [`ExecutionId`], and talk
//! to each other only through the controller:
//! * [`Controller::send`] / [`WorkerContext::send`]: fire-and-forget delivery
//! * `call` / `call_timeout`: request tagged with a random [`Fingerprint`],
//!   resolved by the first reply carrying the same fingerprint
//! * `reply`: answers a call envelope
//! * `receive`: folds inbound envelopes into actor state, one at a time
//!
//! ```no_run
//! use hoverlord::{Controller, WorkerContext};
//!
//! async fn counter(ctx: WorkerContext) -> hoverlord::Result<()> {
//! 	ctx.receive(0i64, |count, msg, ctx| async move {
//! 		match msg.content.as_str() {
//! 			Some("ping") => count + 1,
//! 			Some("pang") => {
//! 				let _ = ctx.reply(&msg, count).await;
//! 				count
//! 			}
//! 			_ => count,
//! 		}
//! 	})
//! 	.await?;
//! 	Ok(())
//! }
//!
//! # async fn demo() -> hoverlord::Result<()> {
//! let controller = Controller::builder().job("counter", counter).build();
//! controller.spawn("counter", "demo", ()).await?;
//! controller.send("demo", "ping").await?;
//! let answer = controller.call("demo", "pang").await?;
//! assert_eq!(answer.content, 1);
//! controller.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod class;
mod config;
mod controller;
mod correlation;
mod envelope;
mod error;
mod executor;
mod id;
mod job;
mod messenger;
pub mod protocol;
mod receive;
mod registry;
mod router;
mod spawn;
mod worker;

pub use class::ExecutionClass;
pub use config::{ControllerConfig, SpawnSpec};
pub use controller::{Controller, ControllerBuilder, WorkerRef};
pub use envelope::{Envelope, Kind, Recipient};
pub use error::{Error, Result};
pub use executor::{ExecutionUnit, Executor, LocalExecutor, UnitSpec, WorkerExit, WorkerPort};
pub use id::{ExecutionId, Fingerprint};
pub use job::{Job, JobTable};
pub use registry::WorkerRecord;
pub(crate) use spawn::{join_error_panic_message, spawn, spawn_named_thread};
pub use worker::WorkerContext;
