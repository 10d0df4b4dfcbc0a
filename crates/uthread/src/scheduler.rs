//! Round-robin scheduler
//!
//! One [`Scheduler`] drives every green thread of a session. It owns the
//! ready, blocked, and zombie queues plus the control block of the running
//! thread, and performs every context switch.
//!
//! # Concurrency model
//!
//! All threads of a session share one OS thread, so the only thing that can
//! interleave with scheduler code is the preemption signal handler, which
//! itself calls back into [`Scheduler::yield_now`]. Every access to the
//! session state therefore happens with the timer signal masked, and no
//! borrow of the state is held across a context switch: only raw context
//! pointers are carried over the switch.
//!
//! Nothing on the switch path allocates or logs. The capacity every queue
//! can ever need is reserved when a thread is created.

use crate::config::SchedulerConfig;
use crate::context::{self, ExecutionContext};
use crate::error::{Result, SchedulerError};
use crate::preempt::PreemptController;
use crate::queue::Queue;
use crate::stack::Stack;
use crate::thread::{Entry, Tcb, ThreadId, ThreadState};
use std::cell::UnsafeCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Threads created in this session
    pub threads_created: u64,
    /// Zombies whose exit value has been collected by a join
    pub threads_collected: u64,
    /// Switches from one thread to another
    pub context_switches: u64,
    /// Timer ticks that forced a yield
    pub preemptions: u64,
}

/// Entry points the scheduler hands to the platform layer
#[derive(Clone, Copy)]
pub(crate) struct Hooks {
    /// First code a created thread runs, on its own stack
    pub(crate) trampoline: extern "C" fn(),
    /// Timer signal handler
    pub(crate) on_timer: extern "C" fn(libc::c_int),
}

struct SchedState {
    /// Threads waiting for the CPU, in round-robin order
    ready: Queue<Box<Tcb>>,

    /// Threads waiting for a joined thread to exit
    blocked: Queue<Box<Tcb>>,

    /// Exited threads whose value has not been collected
    zombie: Queue<Box<Tcb>>,

    /// The running thread
    current: Box<Tcb>,

    /// Next id to hand out; ids are never reused within a session
    next_id: u32,

    stats: SchedulerStats,
}

impl SchedState {
    fn live_threads(&self) -> usize {
        // main is never created or collected
        (self.stats.threads_created - self.stats.threads_collected) as usize + 1
    }

    /// Pick the next thread and park the current one
    ///
    /// Returns the pair of contexts to switch between, or None when the
    /// current thread is the only runnable one and keeps the CPU.
    fn rotate(&mut self) -> Option<(*mut libc::ucontext_t, *const libc::ucontext_t)> {
        let runnable = self.current.state().is_runnable();
        let next = match self.ready.dequeue() {
            Ok(next) => next,
            Err(_) if runnable => {
                self.current.set_state(ThreadState::Running);
                return None;
            }
            Err(_) => fatal(&format!(
                "deadlock: thread {} is {:?} and no thread is ready",
                self.current.id(),
                self.current.state()
            )),
        };

        let mut prev = mem::replace(&mut self.current, next);
        self.current.set_state(ThreadState::Running);

        // Both contexts are boxed, so the pointers survive the moves below
        let from = prev.context().as_ptr();
        let to = self.current.context().as_ptr().cast_const();

        let parked = match prev.state() {
            ThreadState::Ready | ThreadState::Running => {
                prev.set_state(ThreadState::Ready);
                self.ready.enqueue(prev)
            }
            ThreadState::Blocked => self.blocked.enqueue(prev),
            ThreadState::Zombie => self.zombie.enqueue(prev),
        };
        if parked.is_err() {
            fatal("failed to park the running thread");
        }

        self.stats.context_switches += 1;
        Some((from, to))
    }
}

/// Scheduler for one session
pub(crate) struct Scheduler {
    state: UnsafeCell<SchedState>,
    preempt: PreemptController,
    config: SchedulerConfig,
    hooks: Hooks,
}

impl Scheduler {
    /// Set up the queues and the main thread, and arm preemption if asked
    pub(crate) fn new(config: SchedulerConfig, hooks: Hooks) -> Result<Self> {
        config.validate()?;

        let scheduler = Self {
            state: UnsafeCell::new(SchedState {
                ready: Queue::new(),
                blocked: Queue::new(),
                zombie: Queue::new(),
                current: Box::new(Tcb::main()),
                next_id: 1,
                stats: SchedulerStats::default(),
            }),
            preempt: PreemptController::new(),
            config,
            hooks,
        };

        if config.preempt {
            scheduler
                .preempt
                .start(config.preempt_interval(), hooks.on_timer)
                .map_err(SchedulerError::Timer)?;
        }

        Ok(scheduler)
    }

    /// # Safety
    ///
    /// The timer signal must be masked (or the caller must be the signal
    /// handler) and the returned borrow must end before any context switch.
    #[allow(clippy::mut_from_ref)]
    unsafe fn state(&self) -> &mut SchedState {
        // SAFETY: upheld by the caller
        unsafe { &mut *self.state.get() }
    }

    fn critical<R>(&self, f: impl FnOnce(&mut SchedState) -> R) -> R {
        let _guard = self.preempt.disable();
        // SAFETY: the signal is masked and the borrow ends with `f`
        f(unsafe { self.state() })
    }

    /// Id of the running thread
    pub(crate) fn current_id(&self) -> ThreadId {
        self.critical(|state| state.current.id())
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        self.critical(|state| state.stats)
    }

    /// Create a thread running `entry` and append it to the ready queue
    pub(crate) fn create<F>(&self, entry: F) -> Result<ThreadId>
    where
        F: FnOnce() -> i32 + 'static,
    {
        let _guard = self.preempt.disable();
        // SAFETY: masked; no switch happens in this function
        let state = unsafe { self.state() };

        if state.next_id > u32::from(self.config.thread_limit) {
            return Err(SchedulerError::ResourceExhausted);
        }

        // The new thread inherits the mask captured here: it starts with
        // preemption disabled and enables it itself.
        let stack = Stack::allocate(self.config.stack_size)?;
        let context = ExecutionContext::for_entry(&stack, self.hooks.trampoline)?;

        let live = state.live_threads() + 1;
        for queue in [&mut state.ready, &mut state.blocked, &mut state.zombie] {
            queue.reserve(live.saturating_sub(queue.len()))?;
        }

        // Boxed while masked, like every other allocation the scheduler makes
        let mut entry = Some(entry);
        let entry: Entry = Box::new(move || entry.take().map_or(-1, |f| f()));

        let id = ThreadId::from_u16(state.next_id as u16);
        state.next_id += 1;
        state
            .ready
            .enqueue(Box::new(Tcb::new(id, stack, context, entry)))?;
        state.stats.threads_created += 1;

        log::debug!("created thread {} ({} ready)", id, state.ready.len());
        Ok(id)
    }

    /// Give the CPU to the next ready thread
    ///
    /// Returns immediately when no other thread is ready.
    pub(crate) fn yield_now(&self) {
        let _guard = self.preempt.disable();
        // SAFETY: masked by the guard above
        unsafe { self.reschedule() };
    }

    /// Rotate the queues and switch to whichever thread comes next
    ///
    /// # Safety
    ///
    /// The timer signal must be masked and no borrow of the state may be
    /// live.
    unsafe fn reschedule(&self) {
        // SAFETY: upheld by the caller; the borrow ends inside rotate
        let switch = unsafe { self.state() }.rotate();
        if let Some((from, to)) = switch {
            // SAFETY: `from` belongs to the parked thread and `to` to the new
            // current thread; both control blocks stay alive in the session
            if unsafe { context::switch(from, to) }.is_err() {
                fatal("context switch failed");
            }
        }
    }

    /// Timer tick, called from the signal handler
    pub(crate) fn preempt_tick(&self) {
        // SAFETY: the kernel blocks the signal while its handler runs, so
        // no other borrow of the state can be live
        unsafe { self.state() }.stats.preemptions += 1;
        self.yield_now();
    }

    /// Run the entry closure of the current thread, which has just started
    ///
    /// A panic escaping the closure is caught and stored for the joiner;
    /// the exit value is then -1.
    pub(crate) fn run_current(&self) -> i32 {
        // SAFETY: a new thread starts with the timer signal still masked
        let entry = unsafe { self.state() }.current.take_entry();
        self.preempt.enable();

        let Some(mut entry) = entry else {
            fatal("thread started twice");
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry()));
        // Freed along with the control block, under the mask
        self.critical(|state| state.current.restore_entry(entry));

        match outcome {
            Ok(value) => value,
            Err(payload) => {
                self.critical(|state| state.current.set_panic(payload));
                -1
            }
        }
    }

    /// Terminate the current thread with `value`
    ///
    /// Wakes the thread waiting to join it, if any. Never returns.
    pub(crate) fn exit(&self, value: i32) -> ! {
        let guard = self.preempt.disable();
        // SAFETY: masked; the borrow ends before reschedule
        let state = unsafe { self.state() };
        let id = state.current.id();
        if id.is_main() {
            drop(guard);
            panic!("the main thread cannot exit through the scheduler");
        }

        state.current.exit(value);
        if let Some(joiner) = state.current.joiner() {
            match state.blocked.delete_by(|tcb| tcb.id() == joiner) {
                Ok(mut waiter) => {
                    waiter.set_state(ThreadState::Ready);
                    if state.ready.enqueue(waiter).is_err() {
                        fatal("failed to wake a joining thread");
                    }
                }
                Err(_) => log::warn!("thread {} exited but its joiner {} is not blocked", id, joiner),
            }
        }
        log::debug!("thread {} exited with {}", id, value);

        // SAFETY: still masked, the state borrow is no longer used
        unsafe { self.reschedule() };
        fatal("an exited thread was resumed");
    }

    /// Wait for `target` to exit and collect its exit value
    pub(crate) fn join(&self, target: ThreadId) -> Result<i32> {
        let guard = self.preempt.disable();

        // SAFETY: masked; the borrow ends before the first reschedule
        let me = unsafe { self.state() }.current.id();
        if target.is_main() {
            return Err(SchedulerError::InvalidArgument("the main thread cannot be joined"));
        }
        if target == me {
            return Err(SchedulerError::InvalidArgument("a thread cannot join itself"));
        }

        loop {
            // SAFETY: masked; a fresh borrow on every round, dropped before
            // reschedule
            let state = unsafe { self.state() };
            let alive = match state.ready.find_mut(|tcb| tcb.id() == target) {
                Some(tcb) => Some(tcb),
                None => state.blocked.find_mut(|tcb| tcb.id() == target),
            };
            let Some(tcb) = alive else {
                break;
            };
            match tcb.joiner() {
                None => tcb.set_joiner(me),
                Some(joiner) if joiner == me => {}
                Some(_) => return Err(SchedulerError::AlreadyJoined(target)),
            }

            state.current.set_state(ThreadState::Blocked);
            log::trace!("thread {} waits for thread {}", me, target);
            // SAFETY: masked, and `state` is not used past this point
            unsafe { self.reschedule() };
        }

        // SAFETY: masked; resumed threads come back with the signal masked
        let state = unsafe { self.state() };
        match state.zombie.find(|tcb| tcb.id() == target) {
            None => return Err(SchedulerError::NotFound(target)),
            Some(tcb) if tcb.joiner().is_some_and(|joiner| joiner != me) => {
                return Err(SchedulerError::AlreadyJoined(target));
            }
            Some(_) => {}
        }

        let mut zombie = state.zombie.delete_by(|tcb| tcb.id() == target)?;
        state.stats.threads_collected += 1;
        let value = zombie.return_value().unwrap_or(-1);
        let payload = zombie.take_panic();
        log::debug!("collected thread {} (exit value {})", target, value);

        // Releases the stack; the zombie can never run again
        drop(zombie);
        drop(guard);

        if let Some(payload) = payload {
            panic::resume_unwind(payload);
        }
        Ok(value)
    }

    /// Check that the session can end: called from main, nothing left to collect
    pub(crate) fn check_stop(&self) -> Result<()> {
        self.critical(|state| {
            if !state.current.id().is_main() {
                return Err(SchedulerError::NotAllowed);
            }
            if !(state.ready.is_empty() && state.blocked.is_empty() && state.zombie.is_empty()) {
                return Err(SchedulerError::ThreadsRemain {
                    ready: state.ready.len(),
                    blocked: state.blocked.len(),
                    zombie: state.zombie.len(),
                });
            }
            Ok(())
        })
    }

    /// Tear down a session whose OS thread is going away without stopping it
    ///
    /// Preemption is disarmed before anything is freed. Threads that never
    /// finished lose whatever was alive on their stacks.
    pub(crate) fn abandon(self) {
        self.preempt.stop();
        let state = self.state.into_inner();
        log::warn!(
            "uthread session abandoned with {} ready, {} blocked and {} zombie threads",
            state.ready.len(),
            state.blocked.len(),
            state.zombie.len()
        );
    }

    /// Disarm preemption and release the queues
    pub(crate) fn shutdown(self) -> Result<SchedulerStats> {
        self.check_stop()?;
        self.preempt.stop();

        let state = self.state.into_inner();
        state.ready.destroy().map_err(|(_, err)| err)?;
        state.blocked.destroy().map_err(|(_, err)| err)?;
        state.zombie.destroy().map_err(|(_, err)| err)?;
        Ok(state.stats)
    }
}

/// Report an unrecoverable scheduler state and abort the process
fn fatal(message: &str) -> ! {
    log::error!("uthread: {}", message);
    std::process::abort()
}
