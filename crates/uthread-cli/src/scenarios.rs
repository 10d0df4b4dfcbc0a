//! Demo scenarios
//!
//! Each scenario runs a full session (start, work, stop) and returns a
//! report. Nothing is printed while threads are alive: the report is
//! rendered by the caller once the session is over.
//!
//! Any scenario may run with preemption armed, so thread bodies never
//! allocate or take locks. They record [`Event`]s into an [`EventLog`]
//! sized up front, and the text is produced after `stop`.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use uthread::{SchedulerConfig, SchedulerError, SchedulerStats, ThreadId};

/// Outcome of one scenario
#[derive(Debug, Default)]
pub struct Report {
    /// Lines describing what happened, in order
    pub lines: Vec<String>,
    /// Statistics sampled just before the session stopped
    pub stats: SchedulerStats,
}

impl Report {
    fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }
}

/// Something a green thread did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Greeted(ThreadId),
    Turn { round: u32, thread: ThreadId },
    Ran(ThreadId),
    Collected { thread: ThreadId, value: i32 },
}

impl Event {
    // Layout: tag in bits 48..56, thread in 32..48, payload in 0..32.
    // Tag 0 marks an empty slot.
    fn encode(self) -> u64 {
        let (tag, thread, payload): (u64, ThreadId, u32) = match self {
            Event::Greeted(thread) => (1, thread, 0),
            Event::Turn { round, thread } => (2, thread, round),
            Event::Ran(thread) => (3, thread, 0),
            Event::Collected { thread, value } => (4, thread, value as u32),
        };
        (tag << 48) | (u64::from(thread.as_u16()) << 32) | u64::from(payload)
    }

    fn decode(raw: u64) -> Option<Self> {
        let thread = ThreadId::from_u16((raw >> 32) as u16);
        let payload = raw as u32;
        match raw >> 48 {
            1 => Some(Event::Greeted(thread)),
            2 => Some(Event::Turn {
                round: payload,
                thread,
            }),
            3 => Some(Event::Ran(thread)),
            4 => Some(Event::Collected {
                thread,
                value: payload as i32,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Greeted(thread) => write!(f, "thread {thread}: hello world"),
            Event::Turn { round, thread } => write!(f, "round {round}: thread {thread}"),
            Event::Ran(thread) => write!(f, "thread {thread}"),
            Event::Collected { thread, value } => write!(f, "thread {thread} collected {value}"),
        }
    }
}

/// Fixed-capacity record of events, safe to write from preempted threads
///
/// Recording is a single atomic increment plus a store, so a tick landing
/// anywhere in it cannot corrupt the log. Events past the capacity are
/// counted but not kept.
struct EventLog {
    slots: Box<[AtomicU64]>,
    next: AtomicUsize,
}

impl EventLog {
    fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            next: AtomicUsize::new(0),
        })
    }

    fn record(&self, event: Event) {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = self.slots.get(index) {
            slot.store(event.encode(), Ordering::Relaxed);
        }
    }

    /// Events that did not fit
    fn overflow(&self) -> usize {
        self.next.load(Ordering::Relaxed).saturating_sub(self.slots.len())
    }

    /// Render the recorded events in order
    fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| Event::decode(slot.load(Ordering::Relaxed)))
            .map(|event| event.to_string())
    }

    /// Append the recorded events to `report`
    fn render_into(&self, report: &mut Report) {
        report.lines.extend(self.lines());
        let lost = self.overflow();
        if lost > 0 {
            report.line(format!("({lost} events not recorded)"));
        }
    }
}

fn sample_stats() -> SchedulerStats {
    uthread::stats().unwrap_or_default()
}

/// One thread says hello, another returns 5; main collects both
pub fn hello(config: SchedulerConfig) -> Result<Report> {
    let mut report = Report::default();
    let log = EventLog::with_capacity(1);

    uthread::start_with(config).context("starting scheduler")?;

    let greeting = Arc::clone(&log);
    let hello = uthread::create(move || {
        greeting.record(Event::Greeted(uthread::self_id()));
        0
    })?;
    let five = uthread::create(|| 5)?;

    let hello_value = uthread::join(hello)?;
    let five_value = uthread::join(five)?;
    report.stats = sample_stats();
    uthread::stop().context("stopping scheduler")?;

    log.render_into(&mut report);
    report.line(format!("thread {hello} exited with {hello_value}"));
    report.line(format!("thread {five} exited with {five_value}"));
    Ok(report)
}

/// `threads` threads take `rounds` turns each, yielding after every turn
pub fn rotate(config: SchedulerConfig, threads: u16, rounds: u32) -> Result<Report> {
    if threads == 0 {
        bail!("at least one thread is needed");
    }
    let turns = usize::try_from(rounds)
        .ok()
        .and_then(|rounds| rounds.checked_mul(usize::from(threads)))
        .context("too many turns to record")?;
    let mut report = Report::default();
    let log = EventLog::with_capacity(turns);

    uthread::start_with(config).context("starting scheduler")?;

    let mut ids = Vec::with_capacity(usize::from(threads));
    for _ in 0..threads {
        let log = Arc::clone(&log);
        ids.push(uthread::create(move || {
            for round in 0..rounds {
                log.record(Event::Turn {
                    round,
                    thread: uthread::self_id(),
                });
                uthread::yield_now();
            }
            0
        })?);
    }
    for id in ids {
        uthread::join(id)?;
    }
    report.stats = sample_stats();
    uthread::stop().context("stopping scheduler")?;

    log.render_into(&mut report);
    Ok(report)
}

/// Thread 1 joins thread 2, which creates thread 3 and leaves it behind
///
/// Stop is refused until main collects the orphan.
pub fn tree(config: SchedulerConfig) -> Result<Report> {
    let mut report = Report::default();
    let log = EventLog::with_capacity(3);

    uthread::start_with(config).context("starting scheduler")?;

    let t1_log = Arc::clone(&log);
    let first = uthread::create(move || {
        let t2_log = Arc::clone(&t1_log);
        let second = uthread::create(move || {
            let t3_log = Arc::clone(&t2_log);
            let third = uthread::create(move || {
                uthread::yield_now();
                t3_log.record(Event::Ran(uthread::self_id()));
                3
            });
            uthread::yield_now();
            t2_log.record(Event::Ran(uthread::self_id()));
            if third.is_ok() {
                2
            } else {
                -1
            }
        });

        let value = match second {
            Ok(id) => uthread::join(id).unwrap_or(-1),
            Err(_) => -1,
        };
        uthread::yield_now();
        t1_log.record(Event::Collected {
            thread: uthread::self_id(),
            value,
        });
        uthread::yield_now();
        1
    })?;

    let value = uthread::join(first)?;
    report.line(format!("thread {first} exited with {value}"));

    match uthread::stop() {
        Err(err @ SchedulerError::ThreadsRemain { .. }) => {
            report.line(format!("stop refused: {err}"));
        }
        Err(err) => return Err(err).context("stopping scheduler"),
        Ok(()) => bail!("stop succeeded with an uncollected thread"),
    }

    let orphan = ThreadId::from_u16(3);
    let orphan_value = uthread::join(orphan)?;
    report.line(format!("main collected thread {orphan} with {orphan_value}"));
    report.stats = sample_stats();
    uthread::stop().context("stopping scheduler")?;

    let mut traced = Report::default();
    log.render_into(&mut traced);
    traced.lines.append(&mut report.lines);
    report.lines = traced.lines;
    Ok(report)
}

/// A thread spins without ever yielding; the timer keeps everyone else going
pub fn preempt(config: SchedulerConfig) -> Result<Report> {
    let mut report = Report::default();
    let config = config.with_preempt(true);
    let release = Arc::new(AtomicBool::new(false));
    let spins = Arc::new(AtomicU64::new(0));

    uthread::start_with(config).context("starting scheduler")?;

    let gate = Arc::clone(&release);
    let counter = Arc::clone(&spins);
    let spinner = uthread::create(move || {
        while !gate.load(Ordering::Relaxed) {
            counter.fetch_add(1, Ordering::Relaxed);
            hint::spin_loop();
        }
        1
    })?;
    let polite = uthread::create(|| 2)?;

    // Main hands the CPU to the spinner; only the timer brings it back
    uthread::yield_now();
    let polite_value = uthread::join(polite)?;

    let refused = matches!(uthread::stop(), Err(SchedulerError::ThreadsRemain { .. }));

    release.store(true, Ordering::Relaxed);
    let spinner_value = uthread::join(spinner)?;
    report.stats = sample_stats();
    uthread::stop().context("stopping scheduler")?;

    report.line(format!("thread {polite} exited with {polite_value}"));
    report.line(format!(
        "stop while thread {spinner} spun: {}",
        if refused { "refused" } else { "accepted" }
    ));
    report.line(format!(
        "thread {spinner} spun {} times, exited with {spinner_value}",
        spins.load(Ordering::Relaxed)
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::spawn(f).join().unwrap()
    }

    #[test]
    fn test_hello_scenario() {
        let report = isolated(|| hello(SchedulerConfig::default()).unwrap());
        assert_eq!(report.lines[0], "thread 1: hello world");
        assert_eq!(report.lines[2], "thread 2 exited with 5");
        assert_eq!(report.stats.threads_collected, 2);
    }

    #[test]
    fn test_rotate_scenario() {
        let report = isolated(|| rotate(SchedulerConfig::default(), 2, 2).unwrap());
        assert_eq!(
            report.lines,
            [
                "round 0: thread 1",
                "round 0: thread 2",
                "round 1: thread 1",
                "round 1: thread 2"
            ]
        );
    }

    #[test]
    fn test_rotate_needs_threads() {
        assert!(isolated(|| rotate(SchedulerConfig::default(), 0, 1).is_err()));
    }

    #[test]
    fn test_tree_scenario() {
        let report = isolated(|| tree(SchedulerConfig::default()).unwrap());
        assert!(report.lines.iter().any(|l| l == "thread 1 collected 2"));
        assert!(report.lines.iter().any(|l| l.starts_with("stop refused")));
        assert_eq!(
            report.lines.last().map(String::as_str),
            Some("main collected thread 3 with 3")
        );
    }

    #[test]
    fn test_preempt_scenario() {
        let report = isolated(|| preempt(SchedulerConfig::default()).unwrap());
        assert!(report.stats.preemptions > 0);
        assert_eq!(report.lines[0], "thread 2 exited with 2");
        assert!(report.lines[1].ends_with("refused"));
    }

    #[test]
    fn test_event_log_keeps_order_and_counts_overflow() {
        let log = EventLog::with_capacity(2);
        let thread = ThreadId::from_u16(4);
        log.record(Event::Ran(thread));
        log.record(Event::Collected { thread, value: -1 });
        log.record(Event::Greeted(thread));

        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines, ["thread 4", "thread 4 collected -1"]);
        assert_eq!(log.overflow(), 1);
    }

    #[test]
    fn test_event_encoding() {
        let thread = ThreadId::from_u16(65535);
        for event in [
            Event::Greeted(thread),
            Event::Turn {
                round: u32::MAX,
                thread,
            },
            Event::Ran(ThreadId::from_u16(1)),
            Event::Collected {
                thread,
                value: i32::MIN,
            },
        ] {
            assert_eq!(Event::decode(event.encode()), Some(event));
        }
        assert_eq!(Event::decode(0), None);
    }

    #[test]
    fn test_scenarios_survive_preemption() {
        let config = SchedulerConfig::preemptive().with_preempt_hz(1000);

        let report = isolated(move || rotate(config, 8, 20_000).unwrap());
        assert_eq!(report.lines.len(), 8 * 20_000);
        assert_eq!(report.lines[0], "round 0: thread 1");
        let last_round = report
            .lines
            .iter()
            .filter(|line| line.starts_with("round 19999:"))
            .count();
        assert_eq!(last_round, 8);
        assert_eq!(report.stats.threads_collected, 8);

        let report = isolated(move || hello(config).unwrap());
        assert_eq!(report.lines[0], "thread 1: hello world");

        let report = isolated(move || tree(config).unwrap());
        assert!(report.lines.iter().any(|l| l == "thread 1 collected 2"));
        assert_eq!(
            report.lines.last().map(String::as_str),
            Some("main collected thread 3 with 3")
        );
    }
}
