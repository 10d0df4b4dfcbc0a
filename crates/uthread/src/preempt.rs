//! Preemption controller
//!
//! While armed, a per-thread CPU-time timer raises the timer signal at the
//! configured frequency and the installed handler forces a yield. The
//! scheduler masks the signal around every manipulation of its queues;
//! [`PreemptController::disable`] hands out the guard that does this.
//! A disarmed controller turns every call into a no-op.

use crate::signal::{self, HandlerRegistration, ThreadTimer};
use std::cell::Cell;
use std::io;
use std::marker::PhantomData;
use std::time::Duration;

/// Resources held while the controller is armed
struct Armed {
    // Field order matters: the timer goes before the handler registration
    timer: ThreadTimer,
    _handler: HandlerRegistration,
}

/// Arms, disarms, and masks preemption for one scheduler session
pub(crate) struct PreemptController {
    armed: Cell<bool>,
    resources: Cell<Option<Armed>>,
}

impl PreemptController {
    /// Create a disarmed controller
    pub(crate) fn new() -> Self {
        Self {
            armed: Cell::new(false),
            resources: Cell::new(None),
        }
    }

    /// Install `handler` and start a timer firing every `interval`
    pub(crate) fn start(&self, interval: Duration, handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
        if self.is_armed() {
            return Ok(());
        }
        let registration = signal::install_handler(handler)?;
        let timer = ThreadTimer::arm(interval)?;
        self.resources.set(Some(Armed {
            timer,
            _handler: registration,
        }));
        self.armed.set(true);
        log::debug!("preemption armed, interval {:?}", interval);
        Ok(())
    }

    /// Stop the timer and restore the previous handler
    ///
    /// Leaves the timer signal unmasked on the calling OS thread.
    pub(crate) fn stop(&self) {
        if !self.is_armed() {
            return;
        }
        signal::mask();
        self.armed.set(false);
        if let Some(armed) = self.resources.take() {
            drop(armed.timer);
            // A tick may have fired between the last unmask and the delete
            signal::drain_pending();
            drop(armed._handler);
        }
        signal::unmask();
        log::debug!("preemption disarmed");
    }

    /// Check if the timer is running
    pub(crate) fn is_armed(&self) -> bool {
        self.armed.get()
    }

    /// Block preemption until the returned guard is dropped
    ///
    /// Guards do not nest: dropping any guard re-enables preemption.
    pub(crate) fn disable(&self) -> PreemptGuard {
        let active = self.is_armed();
        if active {
            signal::mask();
        }
        PreemptGuard {
            active,
            _not_send: PhantomData,
        }
    }

    /// Re-enable preemption
    pub(crate) fn enable(&self) {
        if self.is_armed() {
            signal::unmask();
        }
    }
}

impl Drop for PreemptController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keeps the timer signal masked on this OS thread while alive
#[must_use = "preemption is re-enabled as soon as the guard is dropped"]
pub(crate) struct PreemptGuard {
    active: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        if self.active {
            signal::unmask();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // The handler registration is shared process-wide, so every test in
    // this binary that arms a controller must install this same handler.
    static TICKS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_tick(_signum: libc::c_int) {
        TICKS.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fresh_thread<F: FnOnce() + Send + 'static>(f: F) {
        std::thread::spawn(f).join().unwrap();
    }

    #[test]
    fn test_disarmed_controller_is_noop() {
        on_fresh_thread(|| {
            let controller = PreemptController::new();
            assert!(!controller.is_armed());

            let guard = controller.disable();
            assert!(!signal::is_masked());
            drop(guard);

            controller.enable();
            controller.stop();
            assert!(!signal::is_masked());
        });
    }

    #[test]
    fn test_guard_masks_while_armed() {
        on_fresh_thread(|| {
            let controller = PreemptController::new();
            controller
                .start(Duration::from_millis(10), count_tick)
                .unwrap();
            assert!(controller.is_armed());

            {
                let _guard = controller.disable();
                assert!(signal::is_masked());
            }
            assert!(!signal::is_masked());

            controller.stop();
            assert!(!controller.is_armed());
            assert!(!signal::is_masked());
        });
    }

    #[test]
    fn test_armed_controller_ticks() {
        on_fresh_thread(|| {
            let controller = PreemptController::new();
            let before = TICKS.load(Ordering::Relaxed);
            controller
                .start(Duration::from_millis(1), count_tick)
                .unwrap();

            // Burn CPU time on this thread until a tick lands
            let mut spins = 0u64;
            while TICKS.load(Ordering::Relaxed) == before {
                spins = std::hint::black_box(spins.wrapping_add(1));
            }

            controller.stop();
            assert!(TICKS.load(Ordering::Relaxed) > before);
        });
    }

    #[test]
    fn test_enable_after_disable() {
        on_fresh_thread(|| {
            let controller = PreemptController::new();
            controller
                .start(Duration::from_millis(10), count_tick)
                .unwrap();

            let guard = controller.disable();
            std::mem::forget(guard);
            assert!(signal::is_masked());
            controller.enable();
            assert!(!signal::is_masked());
        });
    }
}
