//! Green thread stacks
//!
//! Each stack is an anonymous private mapping with one inaccessible guard
//! page at its low end, so running off the bottom faults instead of
//! scribbling over a neighbouring allocation. The mapping is released
//! exactly once, when the owning [`Stack`] is dropped.

use crate::error::ContextError;
use std::io;
use std::ptr::{self, NonNull};

/// Fallback when the page size cannot be queried
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Owned stack mapping
pub(crate) struct Stack {
    /// Start of the mapping (the guard page)
    base: NonNull<u8>,

    /// Length of the whole mapping, guard page included
    mapped_len: usize,

    /// Size of the guard page
    guard_len: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes
    pub(crate) fn allocate(size: usize) -> Result<Self, ContextError> {
        let page = page_size();
        let usable = size
            .max(1)
            .checked_next_multiple_of(page)
            .ok_or_else(|| ContextError::StackAllocation(io::ErrorKind::InvalidInput.into()))?;
        let mapped_len = usable
            .checked_add(page)
            .ok_or_else(|| ContextError::StackAllocation(io::ErrorKind::InvalidInput.into()))?;

        // SAFETY: anonymous mapping request, no existing memory is touched
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(ContextError::StackAllocation(io::Error::last_os_error()));
        }

        let Some(base) = NonNull::new(addr.cast::<u8>()) else {
            return Err(ContextError::StackAllocation(io::ErrorKind::AddrNotAvailable.into()));
        };
        let stack = Self {
            base,
            mapped_len,
            guard_len: page,
        };

        // SAFETY: the first page lies inside the mapping created above
        if unsafe { libc::mprotect(addr, page, libc::PROT_NONE) } != 0 {
            return Err(ContextError::StackAllocation(io::Error::last_os_error()));
        }

        Ok(stack)
    }

    /// Lowest usable address, just above the guard page
    pub(crate) fn bottom(&self) -> *mut u8 {
        // SAFETY: guard_len < mapped_len, so the result stays inside the mapping
        unsafe { self.base.as_ptr().add(self.guard_len) }
    }

    /// Usable size in bytes
    pub(crate) fn size(&self) -> usize {
        self.mapped_len - self.guard_len
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: base/mapped_len describe a mapping owned by this value only
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.mapped_len) };
        debug_assert_eq!(rc, 0, "munmap of a thread stack failed");
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_rounds_up_to_pages() {
        let page = page_size();
        let stack = Stack::allocate(1).unwrap();
        assert_eq!(stack.size(), page);

        let stack = Stack::allocate(page + 1).unwrap();
        assert_eq!(stack.size(), 2 * page);
    }

    #[test]
    fn test_stack_is_writable_end_to_end() {
        let stack = Stack::allocate(64 * 1024).unwrap();
        let bottom = stack.bottom();
        // SAFETY: both bytes lie in the usable part of the mapping
        unsafe {
            bottom.write(0xAA);
            bottom.add(stack.size() - 1).write(0x55);
            assert_eq!(bottom.read(), 0xAA);
            assert_eq!(bottom.add(stack.size() - 1).read(), 0x55);
        }
    }

    #[test]
    fn test_stack_bottom_is_page_aligned() {
        let stack = Stack::allocate(32 * 1024).unwrap();
        assert_eq!(stack.bottom() as usize % page_size(), 0);
    }

    #[test]
    fn test_oversized_stack_fails() {
        assert!(matches!(
            Stack::allocate(usize::MAX),
            Err(ContextError::StackAllocation(_))
        ));
    }
}
