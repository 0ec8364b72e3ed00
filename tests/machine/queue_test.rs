// Event Queue Tests
// FIFO order, overflow policies and concurrent producers

use sensor_link::machine::{EventQueue, OverflowPolicy};
use std::sync::Arc;
use std::thread;

// ============================================================================
// BASIC BEHAVIOUR
// ============================================================================

#[test]
fn test_queue_is_fifo() {
    let queue = EventQueue::new(10, OverflowPolicy::DropOldest);
    queue.push(1u32);
    queue.push(2);
    queue.push(3);

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.pop(), Some(1));
    assert_eq!(queue.pop(), Some(2));
    assert_eq!(queue.pop(), Some(3));
    assert_eq!(queue.pop(), None);
    assert!(queue.is_empty());
}

#[test]
fn test_clear_discards_everything() {
    let queue = EventQueue::new(4, OverflowPolicy::DropOldest);
    queue.push('a');
    queue.push('b');

    assert_eq!(queue.clear(), 2);
    assert!(queue.is_empty());
    assert_eq!(queue.clear(), 0);
}

#[test]
fn test_remove_keeps_order_of_others() {
    let queue = EventQueue::new(6, OverflowPolicy::DropOldest);
    for value in ['r', 's', 'r', 't', 'r'] {
        queue.push(value);
    }

    assert_eq!(queue.remove('r'), 3);
    assert_eq!(queue.snapshot(), vec!['s', 't']);
}

// ============================================================================
// OVERFLOW
// ============================================================================

#[test]
fn test_default_policy_is_drop_oldest() {
    assert_eq!(OverflowPolicy::default(), OverflowPolicy::DropOldest);
}

#[test]
fn test_drop_oldest_on_overflow() {
    let queue = EventQueue::new(3, OverflowPolicy::DropOldest);
    for value in 1..=3u32 {
        assert_eq!(queue.push(value), None);
    }

    assert_eq!(queue.push(4), Some(1));
    assert_eq!(queue.push(5), Some(2));

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.snapshot(), vec![3, 4, 5]);
    assert_eq!(queue.dropped(), 2);
}

#[test]
fn test_drop_newest_on_overflow() {
    let queue = EventQueue::new(2, OverflowPolicy::DropNewest);
    queue.push(1u32);
    queue.push(2);

    assert_eq!(queue.push(3), Some(3));
    assert_eq!(queue.snapshot(), vec![1, 2]);
    assert_eq!(queue.policy(), OverflowPolicy::DropNewest);
}

#[test]
fn test_length_never_exceeds_capacity() {
    let queue = EventQueue::new(10, OverflowPolicy::DropOldest);
    for value in 0..1000u32 {
        queue.push(value);
        assert!(queue.len() <= queue.capacity());
    }

    assert_eq!(queue.len(), 10);
    assert_eq!(queue.pop(), Some(990));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_producers_single_consumer() {
    let queue = Arc::new(EventQueue::new(10, OverflowPolicy::DropOldest));
    let producers: Vec<_> = (0..4u32)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..500u32 {
                    queue.push(id * 1000 + n);
                }
            })
        })
        .collect();

    let mut popped = 0u64;
    for _ in 0..2000 {
        if queue.pop().is_some() {
            popped += 1;
        }
        assert!(queue.len() <= 10);
    }

    for producer in producers {
        producer.join().unwrap();
    }
    while queue.pop().is_some() {
        popped += 1;
    }

    assert_eq!(popped + queue.dropped(), 2000);
}

#[test]
fn test_per_producer_order_preserved() {
    let queue = Arc::new(EventQueue::new(1000, OverflowPolicy::DropOldest));
    let producers: Vec<_> = (0..2u32)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..200u32 {
                    queue.push((id, n));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let records = queue.snapshot();
    for id in 0..2u32 {
        let seq: Vec<u32> = records.iter().filter(|(p, _)| *p == id).map(|(_, n)| *n).collect();
        assert_eq!(seq, (0..200).collect::<Vec<_>>());
    }
}
