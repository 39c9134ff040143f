// attrstore - columnar attribute storage
// Stores the attributes of event/trace/log records in bit-packed volumes

#![warn(rust_2018_idioms)]

pub mod codec;
pub mod config;
pub mod id;
pub mod map;
pub mod model;
pub mod ordered;
pub mod pool;
pub mod pump;
pub mod storage;
pub mod store;

mod sync;

// Re-exports for convenience
pub use config::StoreConfig;
pub use map::{AttributeMap, CachingAttributeMap};
pub use model::{Attribute, AttributeKind, AttributeValue, Extension, Owner, OwnerId, OwnerKind};
pub use ordered::{BTreeBackend, OrderedBackend, OrderedStore};
pub use pool::StringPool;
pub use pump::PumpService;
pub use store::InMemoryStore;

/// attrstore error types
pub mod error {
    use crate::model::AttributeKind;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// A caller-supplied value cannot be accepted (empty key, key mismatch, row out of range)
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        /// An operation is not allowed in the current store state
        #[error("Usage error: {0}")]
        Usage(String),

        #[error("String pool exhausted: at most {capacity} distinct strings can be stored")]
        PoolExhausted { capacity: u32 },

        #[error("Inconsistent attribute '{key}': stored as {expected}, got {actual}")]
        Inconsistent {
            key: String,
            expected: AttributeKind,
            actual: AttributeKind,
        },

        #[error("Pump error: {0}")]
        Pump(String),

        #[error("Codec error: {0}")]
        Codec(String),

        #[error("Unsupported snapshot format: expected version {expected}, got {actual}")]
        Format { expected: u32, actual: u32 },

        #[error("Compression error: {0}")]
        Compression(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
