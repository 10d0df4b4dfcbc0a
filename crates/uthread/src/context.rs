//! Saved execution contexts and the switch primitive
//!
//! A context is a heap-pinned `ucontext_t`. It never moves once captured:
//! on some targets the saved structure points into itself (the floating
//! point save area on x86_64), so it lives in its own allocation and is
//! only ever touched through the raw pointer from [`ExecutionContext::as_ptr`].

use crate::error::ContextError;
use crate::stack::Stack;
use std::cell::UnsafeCell;
use std::io;
use std::mem;
use std::ptr;

/// Saved machine state of a thread that is not running
pub(crate) struct ExecutionContext {
    uc: Box<UnsafeCell<libc::ucontext_t>>,
}

impl ExecutionContext {
    /// Blank context; filled in by the first switch away from its owner
    pub(crate) fn empty() -> Self {
        // SAFETY: ucontext_t is plain old data, all-zero is a valid bit pattern
        let uc = unsafe { mem::zeroed::<libc::ucontext_t>() };
        Self {
            uc: Box::new(UnsafeCell::new(uc)),
        }
    }

    /// Context that starts running `entry` at the top of `stack`
    ///
    /// The signal mask in effect now is captured as the new thread's
    /// initial mask. `entry` must never return: the context has no link.
    pub(crate) fn for_entry(stack: &Stack, entry: extern "C" fn()) -> Result<Self, ContextError> {
        let context = Self::empty();
        let uc = context.as_ptr();

        // SAFETY: uc points at a live, boxed ucontext_t owned by `context`;
        // the stack outlives the context because both live in the same Tcb
        unsafe {
            if libc::getcontext(uc) != 0 {
                return Err(ContextError::ContextInit(io::Error::last_os_error()));
            }
            (*uc).uc_stack.ss_sp = stack.bottom().cast();
            (*uc).uc_stack.ss_size = stack.size();
            (*uc).uc_stack.ss_flags = 0;
            (*uc).uc_link = ptr::null_mut();
            libc::makecontext(uc, entry, 0);
        }

        Ok(context)
    }

    /// Raw pointer to the saved state
    pub(crate) fn as_ptr(&self) -> *mut libc::ucontext_t {
        self.uc.get()
    }
}

/// Save the running state into `from` and resume `to`
///
/// Returns once something switches back into `from`.
///
/// # Safety
///
/// Both pointers must come from [`ExecutionContext::as_ptr`] on contexts that
/// stay alive until the switch back, and `to` must hold a state captured by
/// `getcontext`/`swapcontext` or prepared by [`ExecutionContext::for_entry`].
pub(crate) unsafe fn switch(
    from: *mut libc::ucontext_t,
    to: *const libc::ucontext_t,
) -> Result<(), ContextError> {
    // SAFETY: upheld by the caller
    if unsafe { libc::swapcontext(from, to) } != 0 {
        return Err(ContextError::ContextInit(io::Error::last_os_error()));
    }
    Ok(())
}
