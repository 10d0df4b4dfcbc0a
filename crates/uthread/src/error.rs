//! Error types for the queue, the context layer, and the scheduler

use crate::thread::ThreadId;

/// Errors returned by [`Queue`](crate::Queue) operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Dequeue on a queue with no entries
    #[error("Queue is empty")]
    Empty,

    /// The requested entry is not in the queue
    #[error("Entry not found in queue")]
    NotFound,

    /// Destroy on a queue that still holds entries
    #[error("Queue still holds entries")]
    NotEmpty,

    /// Backing storage could not grow
    #[error("Queue allocation failed")]
    AllocationFailed,
}

/// Errors raised while preparing a stack or an execution context
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The stack mapping (or its guard page) could not be created
    #[error("Stack allocation failed: {0}")]
    StackAllocation(#[source] std::io::Error),

    /// The execution context could not be captured or initialized
    #[error("Context initialization failed: {0}")]
    ContextInit(#[source] std::io::Error),
}

/// Errors returned by scheduler operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Forbidden argument (joining main, joining self, bad configuration)
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Stack, context, or control block allocation failed
    #[error("Allocation failed: {0}")]
    AllocationFailed(#[from] ContextError),

    /// A scheduler queue operation failed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The thread id space of this session is used up
    #[error("Thread ids exhausted")]
    ResourceExhausted,

    /// No ready, blocked, or zombie thread carries this id
    #[error("Thread {0} not found")]
    NotFound(ThreadId),

    /// Another thread already claimed the right to join this thread
    #[error("Thread {0} is already being joined")]
    AlreadyJoined(ThreadId),

    /// Stop was requested while threads are still waiting to be collected
    #[error("Threads remain: {ready} ready, {blocked} blocked, {zombie} zombie")]
    ThreadsRemain {
        /// Threads waiting to run
        ready: usize,
        /// Threads waiting on a join
        blocked: usize,
        /// Exited threads not yet collected
        zombie: usize,
    },

    /// The operation may only be performed by the main thread
    #[error("Operation only allowed from the main thread")]
    NotAllowed,

    /// No scheduler session is active on this OS thread
    #[error("Scheduler not started")]
    NotStarted,

    /// A scheduler session is already active on this OS thread
    #[error("Scheduler already started")]
    AlreadyStarted,

    /// The preemption timer could not be armed
    #[error("Preemption timer error: {0}")]
    Timer(#[source] std::io::Error),
}

/// Result alias used throughout the scheduler API
pub type Result<T> = std::result::Result<T, SchedulerError>;
