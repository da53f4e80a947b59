//! A capacity-bounded LIFO stack that sheds its oldest half on overflow.
//!
//! A [`BoundedStack`] stores items in insertion order and hands them back
//! newest first. When [`push`](BoundedStack::push) finds the stack at
//! capacity, the oldest `capacity - capacity / 2` items are discarded before
//! the new value is appended, so the newest `capacity / 2` entries survive.
//! Bursty producers therefore cost at most one drain per `capacity / 2`
//! pushes.
//!
//! # Complexity
//! - `pop`, `peek`, `len`, `is_empty`, `is_full` and `capacity` are **O(1)**.
//! - `push` is amortised **O(1)**; the overflow drain is **O(capacity)**.
//!
//! # Thread Safety
//! - No interior mutability. Wrap in a mutex to share between threads.

use std::collections::VecDeque;

/// A fixed-capacity stack returning the most recently pushed item first.
///
/// # Examples
///
/// ```rust
/// use porter_common::collections::BoundedStack;
///
/// let mut stack = BoundedStack::new(4);
/// for n in 1..=4 {
///     stack.push(n);
/// }
/// stack.push(5); // drops 1 and 2, keeps 3 and 4
///
/// assert_eq!(stack.len(), 3);
/// assert_eq!(stack.pop(), Some(5));
/// assert_eq!(stack.pop(), Some(4));
/// assert_eq!(stack.pop(), Some(3));
/// assert_eq!(stack.pop(), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedStack<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedStack<T> {
    /// Creates a new stack with the provided capacity.
    ///
    /// A capacity of zero is clamped to `1`.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    /// Pushes an item, first dropping the oldest half when full.
    #[inline]
    pub fn push(&mut self, item: T) {
        if self.is_full() {
            let keep = self.capacity / 2;
            let drop = self.buf.len() - keep;
            self.buf.drain(..drop);
        }
        self.buf.push_back(item);
    }

    /// Removes and returns the newest item.
    #[inline]
    #[must_use]
    pub fn pop(&mut self) -> Option<T> {
        self.buf.pop_back()
    }

    /// Returns the newest item without removing it.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.buf.back()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns `true` when the stack reached its capacity.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes all elements, leaving the capacity unchanged.
    #[inline]
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Iterates from oldest to newest.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_newest_first() {
        let mut stack = BoundedStack::new(8);
        stack.push("a");
        stack.push("b");
        stack.push("c");

        assert_eq!(stack.peek(), Some(&"c"));
        assert_eq!(stack.pop(), Some("c"));
        assert_eq!(stack.pop(), Some("b"));
        assert_eq!(stack.pop(), Some("a"));
        assert!(stack.pop().is_none());
    }

    #[test]
    fn overflow_keeps_newest_half() {
        let mut stack = BoundedStack::new(64);
        for n in 0..64 {
            stack.push(n);
        }
        assert!(stack.is_full());

        stack.push(64);

        assert_eq!(stack.len(), 33);
        let kept: Vec<_> = stack.iter().copied().collect();
        let expected: Vec<_> = (32..=64).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut stack = BoundedStack::new(0);
        assert_eq!(stack.capacity(), 1);

        stack.push(1);
        stack.push(2);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.pop(), Some(2));
    }

    #[test]
    fn clear_empties_stack() {
        let mut stack = BoundedStack::new(4);
        stack.push(1);
        stack.clear();
        assert!(stack.is_empty());
        assert_eq!(stack.capacity(), 4);
    }
}
