//! Timer signal plumbing
//!
//! Three pieces live here: the process-wide handler registration for the
//! timer signal (reference counted, since every OS thread running a
//! preemptive session shares it), per-OS-thread masking of that signal,
//! and a CPU-time timer that targets the calling OS thread only.

use parking_lot::Mutex;
use std::io;
use std::mem;
use std::ptr;
use std::time::Duration;

/// Signal delivered on every preemption tick
pub(crate) const TIMER_SIGNAL: libc::c_int = libc::SIGVTALRM;

/// `sigev_notify` value that targets one kernel thread (Linux specific)
const SIGEV_THREAD_ID: libc::c_int = 4;

// ============================================================================
// Handler registration
// ============================================================================

struct Registration {
    users: usize,
    prior: Option<libc::sigaction>,
}

static REGISTRATION: Mutex<Registration> = parking_lot::const_mutex(Registration {
    users: 0,
    prior: None,
});

/// Keeps the timer signal handler installed while alive
///
/// The first registration saves the disposition that was in place and the
/// last one to drop puts it back.
#[must_use]
pub(crate) struct HandlerRegistration {
    _private: (),
}

/// Install `handler` for [`TIMER_SIGNAL`]
pub(crate) fn install_handler(handler: extern "C" fn(libc::c_int)) -> io::Result<HandlerRegistration> {
    let mut registration = REGISTRATION.lock();
    if registration.users == 0 {
        // SAFETY: sigaction is plain old data
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        // SAFETY: sa_mask is a valid sigset_t owned by `action`
        unsafe { libc::sigemptyset(&mut action.sa_mask) };

        // SAFETY: as above
        let mut prior: libc::sigaction = unsafe { mem::zeroed() };
        // SAFETY: both structs are valid for the duration of the call
        if unsafe { libc::sigaction(TIMER_SIGNAL, &action, &mut prior) } != 0 {
            return Err(io::Error::last_os_error());
        }
        registration.prior = Some(prior);
    }
    registration.users += 1;
    Ok(HandlerRegistration { _private: () })
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        let mut registration = REGISTRATION.lock();
        registration.users -= 1;
        if registration.users > 0 {
            return;
        }
        if let Some(prior) = registration.prior.take() {
            // SAFETY: `prior` was filled in by the kernel on install
            let rc = unsafe { libc::sigaction(TIMER_SIGNAL, &prior, ptr::null_mut()) };
            if rc != 0 {
                log::warn!(
                    "failed to restore the previous timer signal handler: {}",
                    io::Error::last_os_error()
                );
            }
        }
    }
}

// ============================================================================
// Masking
// ============================================================================

fn timer_set() -> libc::sigset_t {
    // SAFETY: sigset_t is plain old data and is initialized by sigemptyset
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, TIMER_SIGNAL);
        set
    }
}

fn change_mask(how: libc::c_int) {
    let set = timer_set();
    // SAFETY: `set` is initialized; the old mask is not requested
    let rc = unsafe { libc::pthread_sigmask(how, &set, ptr::null_mut()) };
    debug_assert_eq!(rc, 0);
}

/// Block the timer signal on the calling OS thread
pub(crate) fn mask() {
    change_mask(libc::SIG_BLOCK);
}

/// Unblock the timer signal on the calling OS thread
pub(crate) fn unmask() {
    change_mask(libc::SIG_UNBLOCK);
}

/// Check if the timer signal is blocked on the calling OS thread
#[cfg(test)]
pub(crate) fn is_masked() -> bool {
    // SAFETY: only reads the current mask into a local
    unsafe {
        let mut current: libc::sigset_t = mem::zeroed();
        libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut current);
        libc::sigismember(&current, TIMER_SIGNAL) == 1
    }
}

/// Discard a timer signal that is pending for the calling OS thread
///
/// Must be called with the signal masked.
pub(crate) fn drain_pending() {
    let set = timer_set();
    let zero = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `set` and `zero` are valid; the siginfo is not requested
    while unsafe { libc::sigtimedwait(&set, ptr::null_mut(), &zero) } == TIMER_SIGNAL {}
}

// ============================================================================
// Errno
// ============================================================================

/// errno value saved across a signal handler
pub(crate) struct SavedErrno(libc::c_int);

impl SavedErrno {
    pub(crate) fn save() -> Self {
        // SAFETY: __errno_location always returns the calling thread's errno
        Self(unsafe { *libc::__errno_location() })
    }

    pub(crate) fn restore(self) {
        // SAFETY: as above
        unsafe { *libc::__errno_location() = self.0 };
    }
}

// ============================================================================
// Per-thread timer
// ============================================================================

/// Periodic CPU-time timer that signals the OS thread that armed it
pub(crate) struct ThreadTimer {
    id: libc::timer_t,
}

impl ThreadTimer {
    /// Arm a timer firing every `interval` of CPU time consumed by this OS thread
    pub(crate) fn arm(interval: Duration) -> io::Result<Self> {
        // SAFETY: sigevent is plain old data
        let mut event: libc::sigevent = unsafe { mem::zeroed() };
        event.sigev_notify = SIGEV_THREAD_ID;
        event.sigev_signo = TIMER_SIGNAL;
        event.sigev_notify_thread_id = current_tid();

        let mut id: libc::timer_t = ptr::null_mut();
        // SAFETY: event and id are valid for the duration of the call
        if unsafe { libc::timer_create(libc::CLOCK_THREAD_CPUTIME_ID, &mut event, &mut id) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let timer = Self { id };

        let period = timespec(interval);
        let spec = libc::itimerspec {
            it_interval: period,
            it_value: period,
        };
        // SAFETY: timer.id was just created; the old value is not requested
        if unsafe { libc::timer_settime(timer.id, 0, &spec, ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(timer)
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        // SAFETY: the id is owned by this value and deleted once
        let rc = unsafe { libc::timer_delete(self.id) };
        debug_assert_eq!(rc, 0);
    }
}

fn current_tid() -> libc::c_int {
    // SAFETY: gettid has no preconditions
    unsafe { libc::syscall(libc::SYS_gettid) as libc::c_int }
}

fn timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}
