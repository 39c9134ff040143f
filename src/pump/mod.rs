//! Bulk import ("data pump")
//!
//! A pump streams `(owner, attributes)` batches into a store much faster
//! than per-attribute puts. While a pump is active, the store rejects
//! ordinary map access; a store can be pumped once.
//!
//! - [`BufferedPump`] (in-heap store): groups values per key and flushes
//!   them as sorted batches every `block_size` owners.
//! - [`OrderedPump`](crate::ordered::OrderedPump) (ordered store): feeds a
//!   background bulk build with composite keys in one direction.
//!
//! In both, hot keys of event owners go straight into the owner's cache on
//! the calling thread.
//!
//! Dropping a pump without `finish_pump` marks the store failed.

mod buffered;

pub use buffered::BufferedPump;

use crate::error::Result;
use crate::model::{Attribute, Owner};

/// Bulk-import session of a store
pub trait PumpService {
    /// Queue every attribute of `owner`
    fn pump_attributes(&mut self, owner: &Owner, attributes: Vec<Attribute>) -> Result<()>;

    /// Flush buffered data, complete the build and return the store to normal use
    fn finish_pump(self) -> Result<()>
    where
        Self: Sized;
}
