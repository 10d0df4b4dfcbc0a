//! uthread: user-level green threads
//!
//! This crate multiplexes many green threads onto the OS thread that
//! starts a session:
//! - Round-robin scheduling over a FIFO ready queue
//! - Explicit yield, exit, and join with exit values
//! - Optional timer preemption driven by the thread's CPU time
//! - One private stack per thread, with a guard page
//!
//! ```ignore
//! uthread::start(false)?;
//! let id = uthread::create(|| {
//!     uthread::yield_now();
//!     5
//! })?;
//! assert_eq!(uthread::join(id)?, 5);
//! uthread::stop()?;
//! ```
//!
//! With preemption enabled, a thread can be interrupted anywhere, including
//! inside the allocator or while holding the stdout lock. Threads of a
//! preemptive session should leave such work to the main thread or finish
//! it before another thread might need it.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
compile_error!("uthread requires Linux with glibc (ucontext and per-thread CPU timers)");

pub mod config;
pub mod error;
pub mod queue;

mod context;
mod preempt;
mod runtime;
mod scheduler;
mod signal;
mod stack;
mod thread;

pub use config::SchedulerConfig;
pub use error::{QueueError, Result, SchedulerError};
pub use queue::{Queue, Visit};
pub use runtime::{create, exit, is_started, join, self_id, start, start_with, stats, stop, yield_now};
pub use scheduler::SchedulerStats;
pub use thread::{ThreadId, ThreadState};
