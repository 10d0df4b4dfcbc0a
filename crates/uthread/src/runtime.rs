//! Thread API
//!
//! A session is bound to the OS thread that started it: the scheduler is
//! reachable through a thread-local pointer, which is how the thread
//! trampoline and the timer signal handler find it. Independent sessions
//! can run on different OS threads at the same time.

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::{Hooks, Scheduler, SchedulerStats};
use crate::signal::SavedErrno;
use crate::thread::ThreadId;
use std::cell::Cell;
use std::ptr;

/// Session registered on this OS thread, if any
///
/// Dropped when the OS thread exits, which tears down a session that was
/// never stopped so that its timer and handler registration do not outlive
/// the thread.
struct Session(Cell<*mut Scheduler>);

impl Drop for Session {
    fn drop(&mut self) {
        let raw = self.0.replace(ptr::null_mut());
        if raw.is_null() {
            return;
        }
        // SAFETY: `raw` came from Box::into_raw in start_with and was just
        // unregistered, so this is the only owner
        let scheduler = unsafe { *Box::from_raw(raw) };
        scheduler.abandon();
    }
}

thread_local! {
    static ACTIVE: Session = const { Session(Cell::new(ptr::null_mut())) };
}

const HOOKS: Hooks = Hooks {
    trampoline: thread_trampoline,
    on_timer: on_timer_signal,
};

/// Scheduler of the session running on this OS thread
fn active() -> Option<&'static Scheduler> {
    // The session is unreachable once its OS thread has begun tearing down
    let scheduler = ACTIVE
        .try_with(|session| session.0.get())
        .unwrap_or(ptr::null_mut());
    // SAFETY: the pointer is set by `start_with` and cleared by `stop`, which
    // only succeeds once every other thread has been collected, or when the
    // OS thread exits, so no code holding this reference can run after the
    // scheduler is freed
    unsafe { scheduler.as_ref() }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Start a scheduler session on the calling OS thread
///
/// The caller becomes the main thread (id 0). With `preempt` set, a timer
/// forces a yield 100 times per second of CPU time.
pub fn start(preempt: bool) -> Result<()> {
    start_with(SchedulerConfig::default().with_preempt(preempt))
}

/// Start a scheduler session with explicit settings
///
/// A session still running when its OS thread exits is torn down then:
/// preemption is disarmed and every control block is freed, but values
/// alive on the stacks of unfinished threads are not dropped.
pub fn start_with(config: SchedulerConfig) -> Result<()> {
    if is_started() {
        return Err(SchedulerError::AlreadyStarted);
    }

    let scheduler = Box::new(Scheduler::new(config, HOOKS)?);
    ACTIVE.with(|session| session.0.set(Box::into_raw(scheduler)));

    log::info!(
        "uthread session started (preempt: {}, stack: {} bytes)",
        config.preempt,
        config.stack_size
    );
    Ok(())
}

/// End the session on the calling OS thread
///
/// Only the main thread may stop, and only once every created thread has
/// exited and been joined.
pub fn stop() -> Result<()> {
    let scheduler = active().ok_or(SchedulerError::NotStarted)?;
    scheduler.check_stop()?;

    // From here on a late timer tick finds no scheduler and is ignored
    let raw = ACTIVE.with(|session| session.0.replace(ptr::null_mut()));
    // SAFETY: `raw` came from Box::into_raw in start_with and was just
    // unregistered, so this is the only owner
    let scheduler = unsafe { *Box::from_raw(raw) };
    let stats = scheduler.shutdown()?;

    log::info!(
        "uthread session stopped ({} threads, {} switches, {} preemptions)",
        stats.threads_created,
        stats.context_switches,
        stats.preemptions
    );
    Ok(())
}

/// Check if a session is running on the calling OS thread
pub fn is_started() -> bool {
    active().is_some()
}

/// Statistics of the running session
pub fn stats() -> Option<SchedulerStats> {
    active().map(Scheduler::stats)
}

// ============================================================================
// Threads
// ============================================================================

/// Create a thread running `entry`
///
/// The thread is appended to the ready queue and first runs when the
/// scheduler reaches it. The value `entry` returns becomes its exit value.
pub fn create<F>(entry: F) -> Result<ThreadId>
where
    F: FnOnce() -> i32 + 'static,
{
    let scheduler = active().ok_or(SchedulerError::NotStarted)?;
    scheduler.create(entry)
}

/// Give the CPU to the next ready thread
///
/// Returns immediately when no other thread is ready or no session is
/// running.
pub fn yield_now() {
    if let Some(scheduler) = active() {
        scheduler.yield_now();
    }
}

/// Id of the running thread
///
/// Outside a session this is [`ThreadId::MAIN`].
pub fn self_id() -> ThreadId {
    active().map_or(ThreadId::MAIN, Scheduler::current_id)
}

/// Terminate the running thread with `value`
///
/// Values still alive on the exiting thread's stack are not dropped.
///
/// # Panics
///
/// Panics when called from the main thread or outside a session.
pub fn exit(value: i32) -> ! {
    match active() {
        Some(scheduler) => scheduler.exit(value),
        None => panic!("uthread::exit called outside a scheduler session"),
    }
}

/// Wait for thread `target` to exit and return its exit value
///
/// The target's resources are released once its value is collected. If
/// the target panicked, the panic is resumed in the caller.
pub fn join(target: ThreadId) -> Result<i32> {
    let scheduler = active().ok_or(SchedulerError::NotStarted)?;
    scheduler.join(target)
}

// ============================================================================
// Platform entry points
// ============================================================================

extern "C" fn thread_trampoline() {
    let Some(scheduler) = active() else {
        std::process::abort();
    };
    let value = scheduler.run_current();
    scheduler.exit(value)
}

extern "C" fn on_timer_signal(_signum: libc::c_int) {
    let errno = SavedErrno::save();
    if let Some(scheduler) = active() {
        scheduler.preempt_tick();
    }
    errno.restore();
}
