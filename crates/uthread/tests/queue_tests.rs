//! Queue behaviour checked against `VecDeque` over pseudo-random workloads

use std::collections::VecDeque;
use uthread::{Queue, QueueError, Visit};

/// Small deterministic generator, good enough to shuffle operations
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn contents(queue: &Queue<u32>) -> Vec<u32> {
    queue.iter().copied().collect()
}

#[test]
fn test_queue_matches_model() {
    for seed in 1..=8u64 {
        let mut rng = Lcg(seed);
        let mut queue = Queue::new();
        let mut model = VecDeque::new();

        for _ in 0..2_000 {
            match rng.below(10) {
                0..=3 => {
                    let value = rng.below(50) as u32;
                    queue.enqueue(value).unwrap();
                    model.push_back(value);
                }
                4..=6 => {
                    assert_eq!(queue.dequeue().ok(), model.pop_front());
                }
                7 => {
                    let value = rng.below(50) as u32;
                    let expected = model.iter().position(|&v| v == value);
                    match (queue.delete(&value), expected) {
                        (Ok(removed), Some(index)) => {
                            assert_eq!(removed, value);
                            model.remove(index);
                        }
                        (Err(QueueError::NotFound), None) => {}
                        (got, want) => panic!("delete({value}): {got:?} vs {want:?}"),
                    }
                }
                8 => {
                    let limit = rng.below(50) as u32;
                    queue.iterate(|v| {
                        if *v > limit {
                            Visit::Remove
                        } else {
                            Visit::Continue
                        }
                    });
                    model.retain(|&v| v <= limit);
                }
                _ => {
                    let value = rng.below(50) as u32;
                    assert_eq!(
                        queue.find(|&v| v == value).copied(),
                        model.iter().find(|&&v| v == value).copied()
                    );
                }
            }

            assert_eq!(queue.len(), model.len());
            assert_eq!(queue.is_empty(), model.is_empty());
        }

        assert_eq!(contents(&queue), model.iter().copied().collect::<Vec<_>>());
    }
}

#[test]
fn test_destroy_after_draining() {
    let mut queue = Queue::new();
    for value in 0..10u32 {
        queue.enqueue(value).unwrap();
    }

    let mut queue = match queue.destroy() {
        Err((queue, QueueError::NotEmpty)) => queue,
        other => panic!("unexpected destroy result: {:?}", other.map_err(|(_, e)| e)),
    };
    assert_eq!(queue.len(), 10);
    while queue.dequeue().is_ok() {}
    assert!(queue.destroy().is_ok());
}

#[test]
fn test_queue_of_owned_values() {
    let mut queue: Queue<String> = Queue::new();
    for word in ["alpha", "beta", "gamma"] {
        queue.enqueue(word.to_string()).unwrap();
    }

    let found = queue.iterate(|word| {
        if word.starts_with('b') {
            word.push('!');
            Visit::Match
        } else {
            Visit::Continue
        }
    });
    assert_eq!(found.map(|w| w.as_str()), Some("beta!"));

    assert_eq!(queue.delete_by(|w| w.len() == 5).unwrap(), "alpha");
    assert_eq!(queue.dequeue().unwrap(), "beta!");
    assert_eq!(queue.dequeue().unwrap(), "gamma");
    assert_eq!(queue.dequeue(), Err(QueueError::Empty));
}
