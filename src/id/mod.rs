//! Owner id generation
//!
//! Every owner (log, trace, event, nested attribute set) gets a 64-bit id
//! from an [`IdFactory`]. Ids are always multiples of
//! `interval_capacity() = 1 << shift`, leaving the low `shift` bits free for
//! attribute key ids in the ordered store.
//!
//! Strategies:
//! - [`SequentialIdFactory`]: 0, 1, 2, ... shifted
//! - [`DecreasingIdFactory`]: counts down from `i64::MAX >> shift`
//! - [`RandomBucketIdFactory`]: sequential values handed out in shuffled buckets
//! - [`RandomPermutationIdFactory`]: quadratic-residue permutation of the counter
//!
//! Only the first two are [`MonotonicIdFactory`] and can feed a bulk import.

mod permutation;
mod random_bucket;
mod sequential;

pub use permutation::RandomPermutationIdFactory;
pub use random_bucket::RandomBucketIdFactory;
pub use sequential::{DecreasingIdFactory, SequentialIdFactory};

use crate::model::OwnerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Source of unique owner ids
pub trait IdFactory: Send + Sync + fmt::Debug {
    /// Next unique id; never repeats for the lifetime of the factory
    fn next_id(&self) -> OwnerId;

    /// Number of low bits left free in every id
    fn shift(&self) -> u32;

    fn interval_capacity(&self) -> u64 {
        1u64 << self.shift()
    }
}

/// Direction in which a monotonic factory hands out ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increasing,
    Decreasing,
}

/// Factories whose successive ids are strictly ordered
pub trait MonotonicIdFactory: IdFactory {
    fn direction(&self) -> Direction;
}

impl<T: IdFactory + ?Sized> IdFactory for Arc<T> {
    fn next_id(&self) -> OwnerId {
        (**self).next_id()
    }

    fn shift(&self) -> u32 {
        (**self).shift()
    }
}

impl<T: MonotonicIdFactory + ?Sized> MonotonicIdFactory for Arc<T> {
    fn direction(&self) -> Direction {
        (**self).direction()
    }
}

/// Configurable id strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    #[default]
    Sequential,
    SequentialDecreasing,
    RandomBucket,
    RandomBucketDecreasing,
    RandomPermutation,
}

impl IdStrategy {
    /// Build a factory for this strategy
    pub fn build(self, shift: u32) -> Arc<dyn IdFactory> {
        tracing::debug!(strategy = ?self, shift, "Creating id factory");
        match self {
            IdStrategy::Sequential => Arc::new(SequentialIdFactory::new(shift)),
            IdStrategy::SequentialDecreasing => Arc::new(DecreasingIdFactory::new(shift)),
            IdStrategy::RandomBucket => {
                Arc::new(RandomBucketIdFactory::new(shift, Direction::Increasing))
            }
            IdStrategy::RandomBucketDecreasing => {
                Arc::new(RandomBucketIdFactory::new(shift, Direction::Decreasing))
            }
            IdStrategy::RandomPermutation => Arc::new(RandomPermutationIdFactory::new(shift)),
        }
    }

    /// True when ids stay close to zero and ascend, so they can index rows directly
    pub fn is_dense(self) -> bool {
        matches!(self, IdStrategy::Sequential | IdStrategy::RandomBucket)
    }
}
