//! Scheduler configuration

use crate::error::{Result, SchedulerError};
use crate::thread::ThreadId;
use std::time::Duration;

/// Default preemption frequency in ticks per second of CPU time
pub const DEFAULT_PREEMPT_HZ: u32 = 100;

/// Highest accepted preemption frequency
pub const MAX_PREEMPT_HZ: u32 = 1000;

/// Default usable stack size of a created thread
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest accepted stack size
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Settings for one scheduler session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Arm the preemption timer
    pub preempt: bool,

    /// Preemption ticks per second of CPU time
    pub preempt_hz: u32,

    /// Usable stack bytes per created thread (rounded up to whole pages)
    pub stack_size: usize,

    /// Highest thread id the session may hand out
    pub thread_limit: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            preempt: false,
            preempt_hz: DEFAULT_PREEMPT_HZ,
            stack_size: DEFAULT_STACK_SIZE,
            thread_limit: ThreadId::MAX.as_u16(),
        }
    }
}

impl SchedulerConfig {
    /// Cooperative session: threads switch only when they yield, join, or exit
    pub fn cooperative() -> Self {
        Self::default()
    }

    /// Preemptive session at the default frequency
    pub fn preemptive() -> Self {
        Self::default().with_preempt(true)
    }

    /// Set whether the preemption timer is armed
    pub fn with_preempt(mut self, preempt: bool) -> Self {
        self.preempt = preempt;
        self
    }

    /// Set the preemption frequency
    pub fn with_preempt_hz(mut self, hz: u32) -> Self {
        self.preempt_hz = hz;
        self
    }

    /// Set the stack size of created threads
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Set the highest thread id the session may hand out
    pub fn with_thread_limit(mut self, limit: u16) -> Self {
        self.thread_limit = limit;
        self
    }

    /// Time between two preemption ticks
    pub fn preempt_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.preempt_hz.max(1)))
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.preempt_hz == 0 {
            return Err(SchedulerError::InvalidArgument(
                "preemption frequency must be positive",
            ));
        }
        if self.preempt_hz > MAX_PREEMPT_HZ {
            return Err(SchedulerError::InvalidArgument(
                "preemption frequency above 1000 Hz",
            ));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(SchedulerError::InvalidArgument("stack size below 16 KiB"));
        }
        if self.thread_limit == 0 {
            return Err(SchedulerError::InvalidArgument(
                "thread limit must allow at least one thread",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(!config.preempt);
        assert_eq!(config.preempt_hz, 100);
        assert_eq!(config.stack_size, 256 * 1024);
        assert_eq!(config.thread_limit, ThreadId::MAX.as_u16());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_preemptive_config() {
        let config = SchedulerConfig::preemptive();
        assert!(config.preempt);
        assert_eq!(config.preempt_interval(), Duration::from_millis(10));
        assert!(!SchedulerConfig::cooperative().preempt);
    }

    #[test]
    fn test_builder_methods() {
        let config = SchedulerConfig::default()
            .with_preempt(true)
            .with_preempt_hz(250)
            .with_stack_size(64 * 1024)
            .with_thread_limit(8);

        assert!(config.preempt);
        assert_eq!(config.preempt_interval(), Duration::from_millis(4));
        assert_eq!(config.stack_size, 64 * 1024);
        assert_eq!(config.thread_limit, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let base = SchedulerConfig::default();
        assert!(base.with_preempt_hz(0).validate().is_err());
        assert!(base.with_preempt_hz(MAX_PREEMPT_HZ + 1).validate().is_err());
        assert!(base.with_stack_size(MIN_STACK_SIZE - 1).validate().is_err());
        assert!(base.with_thread_limit(0).validate().is_err());

        assert!(base.with_preempt_hz(MAX_PREEMPT_HZ).validate().is_ok());
        assert!(base.with_stack_size(MIN_STACK_SIZE).validate().is_ok());
    }

    #[test]
    fn test_zero_hz_interval_does_not_divide_by_zero() {
        let config = SchedulerConfig::default().with_preempt_hz(0);
        assert_eq!(config.preempt_interval(), Duration::from_secs(1));
    }
}
