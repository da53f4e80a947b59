//! Integration tests for collections module

#![cfg(feature = "foundation")]

use std::sync::{Arc, Mutex};
use std::thread;

use porter_common::collections::BoundedStack;

/// Validates the stack never exceeds its capacity and keeps the newest half
/// on every overflow.
///
/// # Test Steps
/// 1. Push 1000 sequential values into a 64-slot stack
/// 2. After every push verify `len <= 64`
/// 3. Verify the values still held are a contiguous run ending at 999
#[test]
fn test_bounded_stack_capacity_under_load() {
    let mut stack = BoundedStack::new(64);

    for n in 0..1000u32 {
        let before = stack.len();
        stack.push(n);
        assert!(stack.len() <= 64);
        if before == 64 {
            assert_eq!(stack.len(), 33);
        }
    }

    let held: Vec<u32> = stack.iter().copied().collect();
    let first = held[0];
    assert_eq!(held, (first..1000).collect::<Vec<_>>());
    assert_eq!(stack.peek(), Some(&999));
}

/// Validates draining pops values newest first.
#[test]
fn test_bounded_stack_drain_order() {
    let mut stack = BoundedStack::new(4);
    for word in ["a", "b", "c"] {
        stack.push(word.to_string());
    }

    let drained: Vec<String> = std::iter::from_fn(|| stack.pop()).collect();
    assert_eq!(drained, vec!["c", "b", "a"]);
    assert!(stack.is_empty());
}

/// Validates a mutex-wrapped stack shared by producer threads stays bounded.
///
/// # Test Steps
/// 1. Spawn 8 threads pushing 100 values each into a shared 64-slot stack
/// 2. Join all threads
/// 3. Verify the final size is within capacity and non-empty
#[test]
fn test_bounded_stack_shared_between_threads() {
    let stack = Arc::new(Mutex::new(BoundedStack::new(64)));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                for n in 0..100 {
                    stack.lock().expect("lock").push(t * 100 + n);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("producer thread");
    }

    let stack = stack.lock().expect("lock");
    assert!(!stack.is_empty());
    assert!(stack.len() <= 64);
}
