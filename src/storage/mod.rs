//! Columnar storage layer
//!
//! # Architecture
//!
//! ```text
//! AttributeStore
//!   ├─→ columns: key id → AttributeStorage { kind, extension, Volume }
//!   └─→ nested:  key id → AttributeStorage { Long volume of nested owner ids }
//!
//! Volume (one per column)
//!   └─→ [Block 0][Block 1]...           row = owner id
//!         └─→ [marker][payload][flags]  2 flags per row: exists, has-nested
//! ```
//!
//! ## Modes
//!
//! Each kind maps to a fixed payload width: booleans and containers use 1
//! bit, literals and lists a 32-bit literal-pool id, discrete, continuous
//! and timestamp values 64 bits, ids 128 bits.
//!
//! ## Compression
//!
//! Blocks are compressed as a whole with zstd, either by the background
//! [`CompressionWorker`] or on demand, and are inflated transparently on
//! the next access.

pub mod attribute_store;
pub mod block;
pub mod columns;
pub mod compression;
pub mod mode;
pub mod volume;
pub mod worker;

pub use attribute_store::{AttributeStore, ColumnStats};
pub use block::Block;
pub use columns::{AttributeStorage, ColumnLayout, ColumnRegistry};
pub use compression::{Compression, CompressionAlgorithm, CompressionStats};
pub use mode::Mode;
pub use volume::{RowValue, Volume, VolumeStats};
pub use worker::CompressionWorker;
