use super::{HotKeyCache, OwnerId, ALIGNMENT_SCHEMA, STANDARD_SCHEMA};

/// What an owner represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    Log,
    Trace,
    Event,
    /// Event of an alignment; caches the alignment vocabulary too
    AlignmentEvent,
    /// Holder of an attribute's meta-attributes
    Attribute,
}

impl OwnerKind {
    /// Events are the only owners whose literals get pooled by the binary codec
    pub fn is_event(self) -> bool {
        matches!(self, OwnerKind::Event | OwnerKind::AlignmentEvent)
    }
}

/// An entity that carries attributes
#[derive(Debug)]
pub struct Owner {
    id: OwnerId,
    kind: OwnerKind,
    cache: Option<HotKeyCache>,
}

impl Owner {
    /// Owner with the hot-key cache that fits its kind (events only)
    pub fn new(id: OwnerId, kind: OwnerKind) -> Self {
        let cache = match kind {
            OwnerKind::Event => Some(HotKeyCache::new(&STANDARD_SCHEMA)),
            OwnerKind::AlignmentEvent => Some(HotKeyCache::new(&ALIGNMENT_SCHEMA)),
            _ => None,
        };
        Self { id, kind, cache }
    }

    /// Owner whose attributes all go to the columnar store
    pub fn uncached(id: OwnerId, kind: OwnerKind) -> Self {
        Self {
            id,
            kind,
            cache: None,
        }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn kind(&self) -> OwnerKind {
        self.kind
    }

    pub fn cache(&self) -> Option<&HotKeyCache> {
        self.cache.as_ref()
    }
}
