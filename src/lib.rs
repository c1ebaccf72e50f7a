//! # `coloop`: a single-threaded cooperative event loop
//!
//! This crate implements a small reactor-style event loop that multiplexes
//! timers and IO readiness across many tasks on one thread. It is meant for
//! environments that need concurrency without OS threads: exactly one task
//! runs at any time, and a task only gives up control at an `.await` that
//! suspends it.
//!
//! The loop waits with `ppoll(2)` on the descriptors tasks are interested in,
//! bounded by the next timer, and never busy-loops.
//!
//! Spawning a task yields an [Evaluation], a handle through which the task's
//! outcome is awaited (optionally with a timeout), cancelled, or concluded from
//! outside. Every evaluation concludes exactly once, whichever of completion,
//! cancellation or [Evaluation::conclude_with] gets there first.
//!
//! For the loop itself, refer to the [task] module. To see what a task can
//! suspend on, see the [futures] module.
//!
//! ## Example
//!
//! ```
//! use coloop::EventLoop;
//! use std::time::Duration;
//!
//! let lp = EventLoop::new();
//!
//! let hello = {
//!     let lp = lp.clone();
//!     lp.clone().spawn(async move {
//!         lp.wait(Duration::from_millis(10)).await;
//!         Ok("Hello, ")
//!     })
//! };
//!
//! let world = {
//!     let (lp, hello) = (lp.clone(), hello.clone());
//!     lp.clone().spawn(async move {
//!         let greeting = hello.result().await?;
//!         lp.wait(Duration::from_millis(10)).await;
//!         Ok(format!("{greeting}world!"))
//!     })
//! };
//!
//! assert_eq!(world.join().unwrap(), "Hello, world!");
//! ```
pub mod builder;
pub mod clock;
pub mod error;
pub mod evaluation;
pub mod futures;
pub(crate) mod reactor;
pub mod task;
pub(crate) mod timer;

pub use builder::Builder;
pub use error::{Error, Result};
pub use evaluation::{AwaitResult, Cancelled, Evaluation};
pub use task::{EventLoop, HookId};
