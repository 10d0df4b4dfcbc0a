//! Integration tests for timer preemption
//!
//! Thread bodies here stay away from the allocator and from stdio: with
//! preemption on, they may be interrupted at any instruction.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uthread::{SchedulerConfig, SchedulerError};

fn isolated<F: FnOnce() + Send + 'static>(f: F) {
    std::thread::spawn(f).join().unwrap();
}

#[test]
fn test_spinning_thread_is_preempted() {
    isolated(|| {
        uthread::start(true).unwrap();
        let release = Arc::new(AtomicBool::new(false));

        // Never yields on its own
        let gate = Arc::clone(&release);
        let spinner = uthread::create(move || {
            while !gate.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
            1
        })
        .unwrap();
        let polite = uthread::create(|| {
            uthread::yield_now();
            2
        })
        .unwrap();

        assert_eq!(uthread::join(polite).unwrap(), 2);
        assert!(uthread::stats().unwrap().preemptions > 0);

        // The spinner is still around
        assert!(matches!(
            uthread::stop(),
            Err(SchedulerError::ThreadsRemain { .. })
        ));

        release.store(true, Ordering::Relaxed);
        assert_eq!(uthread::join(spinner).unwrap(), 1);
        uthread::stop().unwrap();
    });
}

#[test]
fn test_spinning_threads_share_the_cpu() {
    isolated(|| {
        uthread::start_with(SchedulerConfig::preemptive().with_preempt_hz(1000)).unwrap();
        let a_count = Arc::new(AtomicU64::new(0));
        let b_count = Arc::new(AtomicU64::new(0));

        // Each thread spins until it has seen the other one make progress,
        // which only happens if the timer switches between them.
        let spawn = |mine: &Arc<AtomicU64>, theirs: &Arc<AtomicU64>| {
            let mine = Arc::clone(mine);
            let theirs = Arc::clone(theirs);
            uthread::create(move || {
                while theirs.load(Ordering::Relaxed) == 0 {
                    mine.fetch_add(1, Ordering::Relaxed);
                    hint::spin_loop();
                }
                mine.fetch_add(1, Ordering::Relaxed);
                0
            })
            .unwrap()
        };
        let a = spawn(&a_count, &b_count);
        let b = spawn(&b_count, &a_count);

        uthread::join(a).unwrap();
        uthread::join(b).unwrap();
        assert!(a_count.load(Ordering::Relaxed) > 0);
        assert!(b_count.load(Ordering::Relaxed) > 0);
        uthread::stop().unwrap();
    });
}

#[test]
fn test_preemptive_session_without_threads() {
    isolated(|| {
        uthread::start(true).unwrap();
        uthread::yield_now();
        uthread::stop().unwrap();
        assert!(uthread::stats().is_none());

        // No tick may reach the restored default disposition
        let mut acc = 0u64;
        for i in 0..5_000_000u64 {
            acc = hint::black_box(acc.wrapping_add(i));
        }
        hint::black_box(acc);
    });
}

#[test]
fn test_restart_preemptive_sessions() {
    isolated(|| {
        for round in 0..3 {
            uthread::start(true).unwrap();
            let id = uthread::create(move || {
                let mut acc = 0u64;
                for i in 0..100_000u64 {
                    acc = hint::black_box(acc.wrapping_add(i));
                }
                hint::black_box(acc);
                round
            })
            .unwrap();
            assert_eq!(uthread::join(id).unwrap(), round);
            uthread::stop().unwrap();
        }
    });
}

#[test]
fn test_preemptive_sessions_on_parallel_os_threads() {
    let workers: Vec<_> = (0..3)
        .map(|n| {
            std::thread::spawn(move || {
                uthread::start(true).unwrap();
                let done = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&done);
                let spinner = uthread::create(move || {
                    while !flag.load(Ordering::Relaxed) {
                        hint::spin_loop();
                    }
                    n
                })
                .unwrap();
                let setter = uthread::create(move || {
                    done.store(true, Ordering::Relaxed);
                    0
                })
                .unwrap();

                uthread::join(setter).unwrap();
                let value = uthread::join(spinner).unwrap();
                uthread::stop().unwrap();
                value
            })
        })
        .collect();

    let values: Vec<i32> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2]);
}
