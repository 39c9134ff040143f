//! Record model
//!
//! Owners (logs, traces, events, nested attribute sets) carry attributes:
//! typed key/value pairs with an optional extension and optional
//! meta-attributes.
//!
//! ```text
//! Owner { id, kind, cache? }
//!   └── Attribute { key, value, extension?, meta }
//!         └── meta: Detached(Vec<Attribute>) | Stored(nested owner id)
//! ```

mod attribute;
mod extension;
mod hot_keys;
mod owner;

pub use attribute::{Attribute, AttributeKind, AttributeValue, Meta};
pub use extension::{Extension, ExtensionRegistry};
pub use hot_keys::{HotKey, HotKeyCache, HotKeySchema, ABSENT, ALIGNMENT_SCHEMA, STANDARD_SCHEMA};
pub use owner::{Owner, OwnerKind};

pub(crate) use attribute::{adopt, Origin};

use uuid::Uuid;

/// 64-bit owner identifier
pub type OwnerId = u64;

/// Identity of a store instance; attributes remember the store they were read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(Uuid);

impl StoreId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
