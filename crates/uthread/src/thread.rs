//! Thread control blocks

use crate::context::ExecutionContext;
use crate::stack::Stack;
use std::any::Any;
use std::fmt;

/// Unique identifier for a green thread within one scheduler session
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u16);

impl ThreadId {
    /// The thread that called `start`
    pub const MAIN: ThreadId = ThreadId(0);

    /// Largest id a session can hand out, and the default thread limit
    pub const MAX: ThreadId = ThreadId(u16::MAX);

    /// Create a ThreadId from a raw value
    pub const fn from_u16(id: u16) -> Self {
        ThreadId(id)
    }

    /// Get the numeric ID value
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Check if this is the main thread
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a green thread
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadState {
    /// Waiting in the ready queue
    Ready,
    /// Currently executing
    Running,
    /// Waiting for a joined thread to exit
    Blocked,
    /// Exited, return value not yet collected
    Zombie,
}

impl ThreadState {
    /// Check if a thread in this state goes back to the ready queue when it yields
    pub fn is_runnable(self) -> bool {
        matches!(self, ThreadState::Ready | ThreadState::Running)
    }
}

/// Entry closure of a green thread; its return value is the exit value
///
/// Called at most once. It is `FnMut` so that calling it leaves the box
/// in place, to be freed with the control block.
pub(crate) type Entry = Box<dyn FnMut() -> i32 + 'static>;

/// Thread control block
pub(crate) struct Tcb {
    /// Unique identifier
    id: ThreadId,

    /// Current state
    state: ThreadState,

    /// Saved machine state while not running
    context: ExecutionContext,

    /// Owned stack (None for the main thread, which runs on the OS stack)
    stack: Option<Stack>,

    /// Entry closure, taken once when the thread first runs
    entry: Option<Entry>,

    /// Exit value, set once
    return_value: Option<i32>,

    /// Thread that claimed the right to collect the exit value
    joiner: Option<ThreadId>,

    /// Payload of a panic that escaped the entry closure
    panic: Option<Box<dyn Any + Send + 'static>>,
}

impl Tcb {
    /// Control block for the thread that started the scheduler
    pub(crate) fn main() -> Self {
        Self {
            id: ThreadId::MAIN,
            state: ThreadState::Running,
            context: ExecutionContext::empty(),
            stack: None,
            entry: None,
            return_value: None,
            joiner: None,
            panic: None,
        }
    }

    /// Control block for a newly created thread
    pub(crate) fn new(id: ThreadId, stack: Stack, context: ExecutionContext, entry: Entry) -> Self {
        Self {
            id,
            state: ThreadState::Ready,
            context,
            stack: Some(stack),
            entry: Some(entry),
            return_value: None,
            joiner: None,
            panic: None,
        }
    }

    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub(crate) fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub(crate) fn joiner(&self) -> Option<ThreadId> {
        self.joiner
    }

    pub(crate) fn set_joiner(&mut self, joiner: ThreadId) {
        self.joiner = Some(joiner);
    }

    /// Take the entry closure; None once the thread has started
    pub(crate) fn take_entry(&mut self) -> Option<Entry> {
        self.entry.take()
    }

    /// Hand back an entry closure that has finished running
    pub(crate) fn restore_entry(&mut self, entry: Entry) {
        self.entry = Some(entry);
    }

    /// Record the exit value and turn the thread into a zombie
    pub(crate) fn exit(&mut self, value: i32) {
        self.return_value = Some(value);
        self.state = ThreadState::Zombie;
    }

    pub(crate) fn return_value(&self) -> Option<i32> {
        self.return_value
    }

    pub(crate) fn set_panic(&mut self, payload: Box<dyn Any + Send + 'static>) {
        self.panic = Some(payload);
    }

    pub(crate) fn take_panic(&mut self) -> Option<Box<dyn Any + Send + 'static>> {
        self.panic.take()
    }

    /// Check if this control block owns a stack
    pub(crate) fn has_stack(&self) -> bool {
        self.stack.is_some()
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("return_value", &self.return_value)
            .field("joiner", &self.joiner)
            .field("has_stack", &self.has_stack())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tcb(id: u16) -> Tcb {
        let stack = Stack::allocate(64 * 1024).unwrap();
        let context = ExecutionContext::empty();
        Tcb::new(ThreadId::from_u16(id), stack, context, Box::new(|| 0))
    }

    #[test]
    fn test_thread_id_main() {
        assert!(ThreadId::MAIN.is_main());
        assert!(!ThreadId::from_u16(1).is_main());
        assert_eq!(ThreadId::MAX.as_u16(), u16::MAX);
        assert_eq!(ThreadId::from_u16(7).to_string(), "7");
    }

    #[test]
    fn test_main_tcb() {
        let main = Tcb::main();
        assert_eq!(main.id(), ThreadId::MAIN);
        assert_eq!(main.state(), ThreadState::Running);
        assert!(!main.has_stack());
        assert!(main.joiner().is_none());
    }

    #[test]
    fn test_tcb_creation() {
        let mut tcb = test_tcb(3);
        assert_eq!(tcb.id(), ThreadId::from_u16(3));
        assert_eq!(tcb.state(), ThreadState::Ready);
        assert!(tcb.has_stack());
        assert!(tcb.joiner().is_none());
        assert!(tcb.return_value().is_none());

        // The entry can only be taken once
        let mut entry = tcb.take_entry().unwrap();
        assert_eq!(entry(), 0);
        assert!(tcb.take_entry().is_none());

        tcb.restore_entry(entry);
        assert!(tcb.take_entry().is_some());
    }

    #[test]
    fn test_tcb_state_transitions() {
        let mut tcb = test_tcb(1);
        assert!(tcb.state().is_runnable());

        tcb.set_state(ThreadState::Running);
        assert!(tcb.state().is_runnable());

        tcb.set_state(ThreadState::Blocked);
        assert!(!tcb.state().is_runnable());

        tcb.exit(42);
        assert_eq!(tcb.state(), ThreadState::Zombie);
        assert!(!tcb.state().is_runnable());
        assert_eq!(tcb.return_value(), Some(42));
    }

    #[test]
    fn test_tcb_joiner() {
        let mut tcb = test_tcb(2);
        tcb.set_joiner(ThreadId::MAIN);
        assert_eq!(tcb.joiner(), Some(ThreadId::MAIN));
    }

    #[test]
    fn test_tcb_panic_payload() {
        let mut tcb = test_tcb(4);
        assert!(tcb.take_panic().is_none());

        tcb.set_panic(Box::new("boom"));
        let payload = tcb.take_panic().unwrap();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
        assert!(tcb.take_panic().is_none());
    }
}
