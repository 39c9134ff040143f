//! Binary formats of the ordered store
//!
//! - [`AttributeCodec`]: one attribute value as stored under a composite key
//! - [`CompositeKey`]: `owner id + key id` row addressing
//! - [`SnapshotHeader`] and the snapshot frame written by
//!   [`OrderedStore::save_snapshot`](crate::ordered::OrderedStore::save_snapshot)

mod attribute;
mod composite_key;
mod snapshot;
pub mod varint;

pub use attribute::{AttributeCodec, DecodedAttribute, TIMESTAMP_REFERENCE};
pub use composite_key::CompositeKey;
pub use snapshot::{read_snapshot, write_snapshot, SnapshotFrame, SnapshotHeader, SNAPSHOT_VERSION};
