use super::{Direction, IdFactory, MonotonicIdFactory};
use crate::model::OwnerId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ids 0, 1, 2, ... shifted left by `shift`
#[derive(Debug)]
pub struct SequentialIdFactory {
    shift: u32,
    counter: AtomicU64,
}

impl SequentialIdFactory {
    pub fn new(shift: u32) -> Self {
        Self::starting_at(shift, 0)
    }

    /// Resume after `next` unshifted values were already used
    pub fn starting_at(shift: u32, next: u64) -> Self {
        Self {
            shift,
            counter: AtomicU64::new(next),
        }
    }
}

impl IdFactory for SequentialIdFactory {
    fn next_id(&self) -> OwnerId {
        self.counter.fetch_add(1, Ordering::Relaxed) << self.shift
    }

    fn shift(&self) -> u32 {
        self.shift
    }
}

impl MonotonicIdFactory for SequentialIdFactory {
    fn direction(&self) -> Direction {
        Direction::Increasing
    }
}

/// Counts down from `i64::MAX >> shift`, shifted left by `shift`
#[derive(Debug)]
pub struct DecreasingIdFactory {
    shift: u32,
    counter: AtomicU64,
}

impl DecreasingIdFactory {
    pub fn new(shift: u32) -> Self {
        Self::starting_below(shift, (i64::MAX as u64) >> shift)
    }

    /// Next id handed out is `(ceiling - 1) << shift`
    pub fn starting_below(shift: u32, ceiling: u64) -> Self {
        Self {
            shift,
            counter: AtomicU64::new(ceiling),
        }
    }
}

impl IdFactory for DecreasingIdFactory {
    fn next_id(&self) -> OwnerId {
        (self.counter.fetch_sub(1, Ordering::Relaxed) - 1) << self.shift
    }

    fn shift(&self) -> u32 {
        self.shift
    }
}

impl MonotonicIdFactory for DecreasingIdFactory {
    fn direction(&self) -> Direction {
        Direction::Decreasing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential() {
        let ids = SequentialIdFactory::new(12);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 4096);
        assert_eq!(ids.next_id(), 8192);
        assert_eq!(ids.direction(), Direction::Increasing);
    }

    #[test]
    fn test_decreasing() {
        let ids = DecreasingIdFactory::new(0);
        assert_eq!(ids.next_id(), i64::MAX as u64 - 1);
        assert_eq!(ids.next_id(), i64::MAX as u64 - 2);

        let shifted = DecreasingIdFactory::new(12);
        let first = shifted.next_id();
        let second = shifted.next_id();
        assert_eq!(first - second, 4096);
        assert!(first <= i64::MAX as u64);
    }

    #[test]
    fn test_resume() {
        let ids = SequentialIdFactory::starting_at(2, 10);
        assert_eq!(ids.next_id(), 40);

        let ids = DecreasingIdFactory::starting_below(0, 100);
        assert_eq!(ids.next_id(), 99);
    }
}
