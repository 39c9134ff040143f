use super::{Direction, IdFactory};
use crate::model::OwnerId;
use parking_lot::Mutex;
use rand::seq::SliceRandom;

/// Values per shuffled bucket
pub const BUCKET_SIZE: usize = 16 * 1024;

/// Hands out consecutive counter values in shuffled buckets of [`BUCKET_SIZE`]
///
/// Ids are unique but only ordered bucket by bucket, so this factory is not
/// monotonic.
#[derive(Debug)]
pub struct RandomBucketIdFactory {
    shift: u32,
    direction: Direction,
    state: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    counter: u64,
    values: Vec<u64>,
}

impl RandomBucketIdFactory {
    pub fn new(shift: u32, direction: Direction) -> Self {
        let counter = match direction {
            Direction::Increasing => 0,
            Direction::Decreasing => (i64::MAX as u64) >> shift,
        };
        Self {
            shift,
            direction,
            state: Mutex::new(Bucket {
                counter,
                values: Vec::with_capacity(BUCKET_SIZE),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        bucket.values.clear();
        for _ in 0..BUCKET_SIZE {
            let value = match self.direction {
                Direction::Increasing => {
                    let v = bucket.counter;
                    bucket.counter += 1;
                    v
                }
                Direction::Decreasing => {
                    bucket.counter -= 1;
                    bucket.counter
                }
            };
            bucket.values.push(value);
        }
        bucket.values.shuffle(&mut rand::thread_rng());
    }
}

impl IdFactory for RandomBucketIdFactory {
    fn next_id(&self) -> OwnerId {
        let mut bucket = self.state.lock();
        let value = match bucket.values.pop() {
            Some(value) => value,
            None => {
                self.refill(&mut bucket);
                bucket.values.pop().unwrap_or_default()
            }
        };
        value << self.shift
    }

    fn shift(&self) -> u32 {
        self.shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_covers_range() {
        let ids = RandomBucketIdFactory::new(0, Direction::Increasing);
        let mut first: Vec<_> = (0..BUCKET_SIZE).map(|_| ids.next_id()).collect();
        first.sort_unstable();
        assert_eq!(first, (0..BUCKET_SIZE as u64).collect::<Vec<_>>());

        // Second bucket continues after the first
        assert!(ids.next_id() >= BUCKET_SIZE as u64);
    }

    #[test]
    fn test_decreasing_bucket() {
        let ids = RandomBucketIdFactory::new(12, Direction::Decreasing);
        let top = (i64::MAX as u64) >> 12;
        let id = ids.next_id() >> 12;
        assert!(id < top && id >= top - BUCKET_SIZE as u64);
    }
}
