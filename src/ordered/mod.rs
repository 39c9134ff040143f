//! Ordered store over composite keys
//!
//! Every attribute is one record in an [`OrderedBackend`], keyed by
//! [`CompositeKey`] (`owner id + key id`) and encoded with the
//! [`AttributeCodec`]. Owner ids leave `interval_shift` low bits free, so
//! the key pool is bounded by the interval capacity.
//!
//! ```text
//! OrderedStore<B, I> ─► OrderedCore<B>
//!                        ├─ keys / literals / extensions
//!                        ├─ codec        AttributeCodec
//!                        ├─ backend      Arc<B>  ◄── OrderedPump thread (bulk build)
//!                        └─ lifecycle
//! ```
//!
//! Bulk import needs ids that arrive in one direction, so
//! [`OrderedStore::start_pump`] exists only for stores built with a
//! [`MonotonicIdFactory`].

mod backend;
mod map;
mod pump;

pub use backend::{BTreeBackend, OrderedBackend};
pub use map::OrderedAttributeMap;
pub use pump::OrderedPump;

use crate::codec::{read_snapshot, write_snapshot, AttributeCodec, CompositeKey};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::id::{
    DecreasingIdFactory, IdFactory, IdStrategy, MonotonicIdFactory, SequentialIdFactory,
};
use crate::map::{CachingAttributeMap, HotCodec};
use crate::model::{
    adopt, Attribute, AttributeKind, Extension, ExtensionRegistry, Origin, Owner, OwnerId,
    OwnerKind, StoreId,
};
use crate::pool::{StringId, StringPool, RESERVED_KEYS};
use crate::store::{Lifecycle, PumpState};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Encoded attributes of one owner, by key id
pub(crate) type Records = Vec<(StringId, Bytes)>;

/// Ordered attribute map of one owner, behind its hot-key cache
pub type OrderedOwnerAttributes<'s, B> = CachingAttributeMap<'s, OrderedAttributeMap<'s, B>>;

#[derive(Debug, Clone, Serialize)]
pub struct OrderedStats {
    pub store: String,
    pub state: PumpState,
    pub records: usize,
    pub keys: usize,
    pub literals: usize,
    pub extensions: usize,
    pub interval_capacity: u64,
}

pub(crate) struct OrderedCore<B> {
    pub(crate) id: StoreId,
    pub(crate) config: StoreConfig,
    pub(crate) keys: Arc<StringPool>,
    pub(crate) literals: Arc<StringPool>,
    pub(crate) extensions: Arc<ExtensionRegistry>,
    pub(crate) codec: AttributeCodec,
    pub(crate) backend: Arc<B>,
    pub(crate) ids: Arc<dyn IdFactory>,
    pub(crate) kinds: DashMap<StringId, AttributeKind>,
    pub(crate) lifecycle: Lifecycle,
}

impl<B: OrderedBackend> OrderedCore<B> {
    pub(crate) fn interval(&self) -> u64 {
        self.ids.interval_capacity()
    }

    pub(crate) fn hot_codec(&self) -> HotCodec<'_> {
        HotCodec {
            store: self.id,
            keys: &self.keys,
            literals: &self.literals,
        }
    }

    pub(crate) fn composite(&self, owner: OwnerId, key: StringId) -> Result<u64> {
        Ok(CompositeKey::new(owner, key, self.interval())?.raw())
    }

    /// First kind written under a key sticks
    fn declare(&self, key: StringId, attribute: &Attribute) -> Result<()> {
        let kind = attribute.kind();
        let declared = *self.kinds.entry(key).or_insert(kind);
        if declared != kind {
            return Err(Error::Inconsistent {
                key: attribute.key().to_string(),
                expected: declared,
                actual: kind,
            });
        }
        Ok(())
    }

    /// Adopt and encode `attribute`
    ///
    /// Detached meta-attributes are encoded recursively and handed to `sink`
    /// under a freshly allocated nested owner id.
    pub(crate) fn encode(
        &self,
        attribute: Attribute,
        event: bool,
        sink: &mut dyn FnMut(OwnerId, Records) -> Result<()>,
    ) -> Result<(StringId, Bytes)> {
        let attribute = adopt(attribute, self.id, &self.keys, |children| {
            let nested = self.ids.next_id();
            let mut records = Vec::with_capacity(children.len());
            for child in children {
                records.push(self.encode(child, false, &mut *sink)?);
            }
            sink(nested, records)?;
            Ok(nested)
        })?;
        let key = attribute.key_id().ok_or_else(|| {
            Error::InvalidArgument(format!("attribute '{}' has no key id", attribute.key()))
        })?;
        self.declare(key, &attribute)?;
        let bytes = self
            .codec
            .encode(&attribute, event && self.codec.pools(key))?;
        Ok((key, bytes))
    }

    /// Write records of `owner` straight into the backend
    pub(crate) fn insert_records(&self, owner: OwnerId, records: Records) -> Result<()> {
        for (key, bytes) in records {
            self.backend.insert(self.composite(owner, key)?, bytes)?;
        }
        Ok(())
    }

    pub(crate) fn materialize(&self, key: StringId, bytes: &[u8]) -> Result<Attribute> {
        let decoded = self.codec.decode(bytes)?;
        let name = self
            .keys
            .get_value(key)
            .ok_or_else(|| Error::Codec(format!("Unknown key id {}", key)))?;
        Ok(Attribute::materialized(
            name,
            decoded.value,
            decoded.extension,
            decoded.nested,
            Origin { store: self.id, key },
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct ExtensionEntry {
    name: String,
    prefix: String,
    uri: String,
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    interval_shift: u32,
    id_strategy: IdStrategy,
    keys: Vec<(StringId, String)>,
    literals: Vec<(StringId, String)>,
    extensions: Vec<ExtensionEntry>,
    kinds: Vec<(StringId, AttributeKind)>,
}

/// Attribute store over an ordered key/value backend
pub struct OrderedStore<B, I = Arc<dyn IdFactory>> {
    core: Arc<OrderedCore<B>>,
    ids: Arc<I>,
}

impl<B, I> Clone for OrderedStore<B, I> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            ids: self.ids.clone(),
        }
    }
}

impl<B: OrderedBackend> OrderedStore<B, SequentialIdFactory> {
    /// Store with [`StoreConfig::ordered`] defaults and sequential ids
    pub fn new(backend: B) -> Result<Self> {
        let config = StoreConfig::ordered();
        let ids = SequentialIdFactory::new(config.interval_shift);
        Self::with_pump_ids(backend, config, ids)
    }
}

impl<B: OrderedBackend> OrderedStore<B> {
    /// Store whose ids come from the configured strategy; cannot be pumped
    pub fn with_config(backend: B, config: StoreConfig) -> Result<Self> {
        let ids = config.id_strategy.build(config.interval_shift);
        Self::build(backend, config, Arc::new(ids.clone()), ids, None)
    }

    /// Rebuild a store from [`save_snapshot`](Self::save_snapshot) output
    ///
    /// `backend` should be empty. The snapshot's id strategy and interval
    /// override `config`; only sequential strategies can resume.
    pub fn load_snapshot(backend: B, mut config: StoreConfig, data: &[u8]) -> Result<Self> {
        let frame = read_snapshot(data)?;
        let manifest: Manifest = serde_json::from_slice(&frame.manifest)
            .map_err(|e| Error::Codec(format!("Invalid snapshot manifest: {}", e)))?;
        config.interval_shift = manifest.interval_shift;
        config.id_strategy = manifest.id_strategy;

        let shift = manifest.interval_shift;
        let interval = 1u64 << shift;
        let owners = frame
            .records
            .iter()
            .map(|(raw, _)| CompositeKey::from_raw(*raw).owner(interval) >> shift);
        let ids: Arc<dyn IdFactory> = match manifest.id_strategy {
            IdStrategy::Sequential => Arc::new(SequentialIdFactory::starting_at(
                shift,
                owners.max().map_or(0, |max| max + 1),
            )),
            IdStrategy::SequentialDecreasing => Arc::new(match owners.min() {
                Some(min) => DecreasingIdFactory::starting_below(shift, min),
                None => DecreasingIdFactory::new(shift),
            }),
            other => {
                return Err(Error::Config(format!(
                    "Cannot resume id strategy {:?} from a snapshot",
                    other
                )))
            }
        };

        let key_capacity = Self::key_capacity(&config)?;
        let keys = StringPool::restore(true, Some(key_capacity), manifest.keys)?;
        let literals = StringPool::restore(false, config.literal_capacity, manifest.literals)?;
        let extensions = ExtensionRegistry::new();
        for (index, entry) in manifest.extensions.into_iter().enumerate() {
            let extension = Extension::new(entry.name, entry.prefix, entry.uri);
            if extensions.index_of(&extension)? as usize != index {
                return Err(Error::Codec(format!(
                    "Extension {} does not resolve to snapshot index {}",
                    extension.uri(),
                    index
                )));
            }
        }

        let store = Self::build(
            backend,
            config,
            Arc::new(ids.clone()),
            ids,
            Some((keys, literals, extensions)),
        )?;
        for (key, kind) in manifest.kinds {
            store.core.kinds.insert(key, kind);
        }
        let mut records = frame.records.into_iter().map(Ok);
        let loaded = store.core.backend.bulk_build(&mut records)?;
        store.core.backend.flush()?;
        info!(store = %store.id(), records = loaded, "Loaded snapshot");
        Ok(store)
    }
}

impl<B: OrderedBackend, I: MonotonicIdFactory + 'static> OrderedStore<B, I> {
    /// Store that can be pumped: `ids` hand out owner ids in one direction
    pub fn with_pump_ids(backend: B, config: StoreConfig, ids: I) -> Result<Self> {
        let ids = Arc::new(ids);
        let shared: Arc<dyn IdFactory> = ids.clone();
        Self::build(backend, config, ids, shared, None)
    }

    /// Begin the one bulk import this store allows
    pub fn start_pump(&self) -> Result<OrderedPump<B>> {
        OrderedPump::start(self.core.clone(), self.ids.direction())
    }
}

impl<B: OrderedBackend, I: IdFactory> OrderedStore<B, I> {
    fn key_capacity(config: &StoreConfig) -> Result<u32> {
        let interval = 1u64 << config.interval_shift;
        if interval <= RESERVED_KEYS.len() as u64 {
            return Err(Error::Config(format!(
                "interval_shift {} leaves no room for attribute keys",
                config.interval_shift
            )));
        }
        let capacity = interval.min(u64::from(u32::MAX)) as u32;
        Ok(config.key_capacity.map_or(capacity, |c| c.min(capacity)))
    }

    fn build(
        backend: B,
        config: StoreConfig,
        ids: Arc<I>,
        shared: Arc<dyn IdFactory>,
        pools: Option<(StringPool, StringPool, ExtensionRegistry)>,
    ) -> Result<Self> {
        config.validate()?;
        if shared.shift() != config.interval_shift {
            return Err(Error::Config(format!(
                "id factory shift {} does not match interval_shift {}",
                shared.shift(),
                config.interval_shift
            )));
        }
        let key_capacity = Self::key_capacity(&config)?;
        let (keys, literals, extensions) = match pools {
            Some(pools) => pools,
            None => (
                StringPool::keys(Some(key_capacity)),
                match config.literal_capacity {
                    Some(capacity) => StringPool::with_capacity(capacity),
                    None => StringPool::new(),
                },
                ExtensionRegistry::new(),
            ),
        };
        let literals = Arc::new(literals);
        let extensions = Arc::new(extensions);
        let codec = AttributeCodec::with_default_pooling(literals.clone(), extensions.clone());

        let id = StoreId::new();
        info!(
            store = %id,
            interval_capacity = shared.interval_capacity(),
            key_capacity,
            "Created ordered attribute store"
        );
        Ok(Self {
            core: Arc::new(OrderedCore {
                id,
                config,
                keys: Arc::new(keys),
                literals,
                extensions,
                codec,
                backend: Arc::new(backend),
                ids: shared,
                kinds: DashMap::new(),
                lifecycle: Lifecycle::new(),
            }),
            ids,
        })
    }

    pub fn id(&self) -> StoreId {
        self.core.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.core.config
    }

    pub fn backend(&self) -> &B {
        &self.core.backend
    }

    pub fn keys(&self) -> &StringPool {
        &self.core.keys
    }

    pub fn literals(&self) -> &StringPool {
        &self.core.literals
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.core.extensions
    }

    pub fn state(&self) -> PumpState {
        self.core.lifecycle.state()
    }

    pub fn is_pumping(&self) -> bool {
        self.state() == PumpState::Pumping
    }

    pub fn new_owner(&self, kind: OwnerKind) -> Owner {
        Owner::new(self.ids.next_id(), kind)
    }

    pub fn attributes<'s>(&'s self, owner: &'s Owner) -> Result<OrderedOwnerAttributes<'s, B>> {
        self.core.lifecycle.ensure_usable()?;
        Ok(CachingAttributeMap::new(
            OrderedAttributeMap::new(&self.core, owner),
            owner,
            self.core.hot_codec(),
            &self.core.lifecycle,
        ))
    }

    /// Owner holding the stored meta-attributes of `attribute`
    pub fn meta_owner(&self, attribute: &Attribute) -> Option<Owner> {
        if !attribute.is_from(self.id()) {
            return None;
        }
        attribute
            .nested_id()
            .map(|id| Owner::uncached(id, OwnerKind::Attribute))
    }

    /// Declared kind of every attribute key
    pub fn attribute_types(&self) -> Result<BTreeMap<String, AttributeKind>> {
        self.core
            .kinds
            .iter()
            .map(|entry| {
                self.core
                    .keys
                    .get_value(*entry.key())
                    .map(|name| (name.to_string(), *entry.value()))
                    .ok_or_else(|| Error::Codec(format!("Unknown key id {}", entry.key())))
            })
            .collect()
    }

    /// Flush the backend
    pub fn commit(&self) -> Result<()> {
        self.core.lifecycle.ensure_usable()?;
        self.core.backend.flush()
    }

    pub fn dispose(&self) -> Result<()> {
        self.core.lifecycle.dispose()?;
        self.core.backend.flush()?;
        info!(store = %self.id(), "Disposed ordered store");
        Ok(())
    }

    pub fn stats(&self) -> OrderedStats {
        OrderedStats {
            store: self.id().to_string(),
            state: self.state(),
            records: self.core.backend.len(),
            keys: self.core.keys.len(),
            literals: self.core.literals.len(),
            extensions: self.core.extensions.list().len(),
            interval_capacity: self.core.interval(),
        }
    }

    /// Serialize pools, extensions, declared kinds and every record
    ///
    /// Hot-key values live in the owners' caches and are not included.
    pub fn save_snapshot(&self) -> Result<Bytes> {
        self.core.lifecycle.ensure_usable()?;
        let entries = |pool: &StringPool| -> Vec<(StringId, String)> {
            pool.entries()
                .into_iter()
                .map(|(id, value)| (id, value.to_string()))
                .collect()
        };
        let manifest = Manifest {
            interval_shift: self.core.config.interval_shift,
            id_strategy: self.core.config.id_strategy,
            keys: entries(&self.core.keys),
            literals: entries(&self.core.literals),
            extensions: self
                .core
                .extensions
                .list()
                .iter()
                .map(|e| ExtensionEntry {
                    name: e.name().to_string(),
                    prefix: e.prefix().to_string(),
                    uri: e.uri().to_string(),
                })
                .collect(),
            kinds: self.core.kinds.iter().map(|e| (*e.key(), *e.value())).collect(),
        };
        let manifest = serde_json::to_vec(&manifest)
            .map_err(|e| Error::Codec(format!("Failed to serialize manifest: {}", e)))?;

        let records = self.core.backend.range(0..=u64::MAX)?;
        let data = write_snapshot(
            &manifest,
            records.iter().map(|(key, value)| (*key, value.as_ref())),
        );
        debug!(store = %self.id(), records = records.len(), bytes = data.len(), "Saved snapshot");
        Ok(data)
    }
}

impl<B, I> std::fmt::Debug for OrderedStore<B, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedStore")
            .field("id", &self.core.id)
            .field("state", &self.core.lifecycle.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::AttributeMap;
    use crate::model::AttributeValue;

    fn test_store() -> OrderedStore<BTreeBackend, SequentialIdFactory> {
        OrderedStore::new(BTreeBackend::new()).unwrap()
    }

    #[test]
    fn test_put_get_remove() -> Result<()> {
        let store = test_store();
        let trace = store.new_owner(OwnerKind::Trace);
        let map = store.attributes(&trace)?;

        assert!(map.insert(Attribute::literal("org:resource", "Pete"))?.is_none());
        let old = map.insert(Attribute::literal("org:resource", "Sue"))?;
        assert_eq!(old, Some(Attribute::literal("org:resource", "Pete")));
        map.insert(Attribute::continuous("cost", 2.5))?;

        assert_eq!(map.len()?, 2);
        assert!(map.contains_key("cost")?);
        assert_eq!(map.remove("cost")?, Some(Attribute::continuous("cost", 2.5)));
        assert!(!map.contains_key("cost")?);
        assert_eq!(store.backend().len(), 1);
        Ok(())
    }

    #[test]
    fn test_owners_do_not_overlap() -> Result<()> {
        let store = test_store();
        let a = store.new_owner(OwnerKind::Trace);
        let b = store.new_owner(OwnerKind::Trace);
        store.attributes(&a)?.insert(Attribute::discrete("n", 1))?;
        store.attributes(&b)?.insert(Attribute::discrete("n", 2))?;
        store.attributes(&b)?.insert(Attribute::discrete("m", 3))?;

        assert_eq!(store.attributes(&a)?.len()?, 1);
        store.attributes(&b)?.clear()?;
        assert_eq!(store.attributes(&a)?.get("n")?, Some(Attribute::discrete("n", 1)));
        assert_eq!(store.backend().len(), 1);
        Ok(())
    }

    #[test]
    fn test_type_stability() -> Result<()> {
        let store = test_store();
        let owner = store.new_owner(OwnerKind::Log);
        let map = store.attributes(&owner)?;
        map.insert(Attribute::discrete("size", 3))?;
        assert!(matches!(
            map.insert(Attribute::continuous("size", 3.0)),
            Err(Error::Inconsistent { .. })
        ));
        assert_eq!(store.attribute_types()?.get("size"), Some(&AttributeKind::Discrete));
        Ok(())
    }

    #[test]
    fn test_key_pool_bounded_by_interval() -> Result<()> {
        let config = StoreConfig::ordered().interval_shift(3);
        let store = OrderedStore::with_pump_ids(BTreeBackend::new(), config, SequentialIdFactory::new(3))?;
        let owner = store.new_owner(OwnerKind::Trace);
        let map = store.attributes(&owner)?;
        for key in ["a", "b", "c", "d", "e"] {
            map.insert(Attribute::boolean(key, true))?;
        }
        assert!(matches!(
            map.insert(Attribute::boolean("f", true)),
            Err(Error::PoolExhausted { capacity: 8 })
        ));
        Ok(())
    }

    #[test]
    fn test_mismatched_shift_rejected() {
        let result = OrderedStore::with_pump_ids(
            BTreeBackend::new(),
            StoreConfig::ordered(),
            SequentialIdFactory::new(4),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_meta_attributes() -> Result<()> {
        let store = test_store();
        let event = store.new_owner(OwnerKind::Event);
        store.attributes(&event)?.insert(
            Attribute::literal("org:resource", "Pete")
                .with_meta(vec![Attribute::id("uid", uuid::Uuid::nil())]),
        )?;
        let stored = store
            .attributes(&event)?
            .get("org:resource")?
            .ok_or_else(|| Error::Usage("missing".into()))?;
        let meta = store.meta_owner(&stored).ok_or_else(|| Error::Usage("no meta".into()))?;
        assert_eq!(
            store.attributes(&meta)?.get("uid")?.map(|a| a.into_value()),
            Some(AttributeValue::Id(uuid::Uuid::nil()))
        );
        Ok(())
    }

    #[test]
    fn test_snapshot_round_trip() -> Result<()> {
        let store = test_store();
        let event = store.new_owner(OwnerKind::Event);
        let trace = store.new_owner(OwnerKind::Trace);
        store.attributes(&event)?.insert(
            Attribute::literal("custom", "x").with_extension(Extension::new("Org", "org", "http://org")),
        )?;
        store.attributes(&trace)?.insert(Attribute::discrete("n", -4))?;
        let data = store.save_snapshot()?;

        let loaded = OrderedStore::load_snapshot(BTreeBackend::new(), StoreConfig::ordered(), &data)?;
        let trace_again = Owner::new(trace.id(), OwnerKind::Trace);
        assert_eq!(loaded.attributes(&trace_again)?.get("n")?, Some(Attribute::discrete("n", -4)));
        let event_again = Owner::new(event.id(), OwnerKind::Event);
        let custom = loaded
            .attributes(&event_again)?
            .get("custom")?
            .ok_or_else(|| Error::Usage("missing".into()))?;
        assert_eq!(custom.extension().map(|e| e.uri()), Some("http://org"));

        let next = loaded.new_owner(OwnerKind::Trace);
        assert!(next.id() > trace.id());
        assert_eq!(loaded.attribute_types()?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_snapshot_of_permuted_ids_cannot_resume() -> Result<()> {
        let config = StoreConfig::ordered().id_strategy(IdStrategy::RandomPermutation);
        let store = OrderedStore::with_config(BTreeBackend::new(), config.clone())?;
        let data = store.save_snapshot()?;
        assert!(matches!(
            OrderedStore::load_snapshot(BTreeBackend::new(), config, &data),
            Err(Error::Config(_))
        ));
        Ok(())
    }
}
