//! In-heap columnar store
//!
//! [`InMemoryStore`] keeps every attribute of every owner in the columnar
//! [`AttributeStore`], with hot keys of events served from the owners' own
//! caches. It is cheap to clone (all clones share one store).
//!
//! ```text
//! InMemoryStore ─► Inner
//!                   ├─ keys / literals   StringPool
//!                   ├─ ids               IdFactory (dense: rows index volumes)
//!                   ├─ attributes        Arc<AttributeStore> ◄─ weak ─ CompressionWorker
//!                   └─ lifecycle         Idle / Pumping / Pumped / Failed / Disposed
//! ```

mod lifecycle;

pub use lifecycle::{Lifecycle, PumpState};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::id::IdFactory;
use crate::map::{AttributeMap, CachingAttributeMap, ColumnarAttributeMap, HotCodec};
use crate::model::{adopt, Attribute, AttributeKind, Owner, OwnerId, OwnerKind, StoreId};
use crate::pool::StringPool;
use crate::pump::BufferedPump;
use crate::storage::{
    AttributeStore, ColumnLayout, ColumnStats, Compression, CompressionAlgorithm, CompressionStats,
    CompressionWorker,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Columnar attribute map of one owner, behind its hot-key cache
pub type OwnerAttributes<'s> = CachingAttributeMap<'s, ColumnarAttributeMap<'s>>;

/// Store-wide counters
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub store: String,
    pub state: PumpState,
    pub keys: usize,
    pub literals: usize,
    pub columns: ColumnStats,
    pub compression: CompressionStats,
}

pub(crate) struct Inner {
    pub(crate) id: StoreId,
    pub(crate) config: StoreConfig,
    pub(crate) keys: Arc<StringPool>,
    pub(crate) literals: Arc<StringPool>,
    pub(crate) ids: Arc<dyn IdFactory>,
    pub(crate) attributes: Arc<AttributeStore>,
    pub(crate) lifecycle: Lifecycle,
    worker: Mutex<Option<CompressionWorker>>,
}

impl Inner {
    /// Make `attribute` belong to this store, writing detached meta-attributes
    pub(crate) fn adopt(&self, attribute: Attribute) -> Result<Attribute> {
        adopt(attribute, self.id, &self.keys, |children| self.write_meta(children))
    }

    fn write_meta(&self, children: Vec<Attribute>) -> Result<OwnerId> {
        let nested = self.ids.next_id();
        for child in children {
            let child = self.adopt(child)?;
            self.attributes.set(nested, &child)?;
        }
        Ok(nested)
    }

    pub(crate) fn hot_codec(&self) -> HotCodec<'_> {
        HotCodec {
            store: self.id,
            keys: &self.keys,
            literals: &self.literals,
        }
    }

    fn start_compression(&self) -> Result<()> {
        let Some(period) = self.config.compression_period() else {
            return Ok(());
        };
        if self.config.compression == CompressionAlgorithm::None {
            return Ok(());
        }
        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(CompressionWorker::spawn(
                Arc::downgrade(&self.attributes),
                period,
            )?);
        }
        Ok(())
    }

    fn stop_compression(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.stop();
        }
    }

    /// Trim volumes and hand them to the background compressor
    pub(crate) fn commit(&self) -> Result<()> {
        self.attributes.trim_to_size()?;
        self.start_compression()
    }
}

/// In-heap columnar attribute store
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    /// Store with default configuration
    pub fn new() -> Self {
        Self::build(StoreConfig::default())
    }

    /// Store with a validated configuration; ids must be dense
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        if !config.id_strategy.is_dense() {
            return Err(Error::Config(format!(
                "id strategy {:?} is not dense; the in-heap store indexes rows by owner id",
                config.id_strategy
            )));
        }
        if config.interval_shift != 0 {
            return Err(Error::Config(format!(
                "interval_shift {} would space owner rows {} apart; the in-heap store needs 0",
                config.interval_shift,
                1u64 << config.interval_shift
            )));
        }
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        let id = StoreId::new();
        let keys = Arc::new(StringPool::keys(config.key_capacity));
        let literals = Arc::new(match config.literal_capacity {
            Some(capacity) => StringPool::with_capacity(capacity),
            None => StringPool::new(),
        });
        let layout = ColumnLayout {
            block_shift: config.block_shift,
            initial_blocks: config.initial_blocks,
            compression: Compression::new(config.compression, config.compression_level),
        };
        let attributes = Arc::new(AttributeStore::new(
            id,
            keys.clone(),
            literals.clone(),
            layout,
        ));
        let ids = config.id_strategy.build(config.interval_shift);

        info!(
            store = %id,
            block_size = config.block_size(),
            compression = ?config.compression,
            "Created in-heap attribute store"
        );
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                keys,
                literals,
                ids,
                attributes,
                lifecycle: Lifecycle::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn keys(&self) -> &StringPool {
        &self.inner.keys
    }

    pub fn literals(&self) -> &StringPool {
        &self.inner.literals
    }

    pub fn state(&self) -> PumpState {
        self.inner.lifecycle.state()
    }

    pub fn is_pumping(&self) -> bool {
        self.state() == PumpState::Pumping
    }

    /// Allocate an id and create an owner of `kind`
    pub fn new_owner(&self, kind: OwnerKind) -> Owner {
        Owner::new(self.inner.ids.next_id(), kind)
    }

    /// Attribute map of `owner`
    pub fn attributes<'s>(&'s self, owner: &'s Owner) -> Result<OwnerAttributes<'s>> {
        self.inner.lifecycle.ensure_usable()?;
        Ok(CachingAttributeMap::new(
            ColumnarAttributeMap::new(&self.inner, owner),
            owner,
            self.inner.hot_codec(),
            &self.inner.lifecycle,
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

    /// Copy of `attribute` with its stored meta-attributes read back as detached ones
    pub fn detach(&self, attribute: &Attribute) -> Result<Attribute> {
        let mut copy = Attribute::new(attribute.key_arc().clone(), attribute.value().clone());
        if let Some(extension) = attribute.extension() {
            copy = copy.with_extension(extension.clone());
        }
        if let Some(owner) = self.meta_owner(attribute) {
            let children = self
                .attributes(&owner)?
                .to_vec()?
                .iter()
                .map(|child| self.detach(child))
                .collect::<Result<Vec<_>>>()?;
            copy = copy.with_meta(children);
        }
        Ok(copy)
    }

    /// Replace all attributes of `owner` with `attributes`
    pub fn set_attributes(&self, owner: &Owner, attributes: Vec<Attribute>) -> Result<()> {
        let map = self.attributes(owner)?;
        let keep: HashSet<&str> = attributes.iter().map(|a| a.key()).collect();
        let stale: Vec<Arc<str>> = map
            .keys()?
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|key| !keep.contains(key.as_ref()))
            .collect();
        for key in stale {
            map.remove(&key)?;
        }
        map.put_all(attributes)
    }

    /// Remove and return all attributes of `owner`
    pub fn remove_attributes(&self, owner: &Owner) -> Result<Vec<Attribute>> {
        let map = self.attributes(owner)?;
        let old = map.to_vec()?;
        map.clear()?;
        Ok(old)
    }

    pub fn has_attributes(&self, owner: &Owner) -> Result<bool> {
        Ok(!self.attributes(owner)?.is_empty()?)
    }

    /// Begin the one bulk import this store allows
    pub fn start_pump(&self) -> Result<BufferedPump> {
        BufferedPump::start(self.clone())
    }

    /// Trim volumes and start background compression
    pub fn commit(&self) -> Result<()> {
        self.inner.lifecycle.ensure_usable()?;
        self.inner.commit()
    }

    /// Stop background work; the store rejects further use
    pub fn dispose(&self) -> Result<()> {
        self.inner.lifecycle.dispose()?;
        self.inner.stop_compression();
        info!(store = %self.id(), "Disposed attribute store");
        Ok(())
    }

    /// Declared kind of every attribute key
    pub fn attribute_types(&self) -> Result<BTreeMap<String, AttributeKind>> {
        self.inner
            .attributes
            .attribute_types()
            .into_iter()
            .map(|(key, kind)| {
                self.inner
                    .keys
                    .get_value(key)
                    .map(|name| (name.to_string(), kind))
                    .ok_or_else(|| Error::Codec(format!("Unknown key id {}", key)))
            })
            .collect()
    }

    pub fn trim_to_size(&self) -> Result<()> {
        self.inner.lifecycle.ensure_usable()?;
        self.inner.attributes.trim_to_size()
    }

    pub fn compress_all(&self) -> Result<usize> {
        self.inner.attributes.compress_all()
    }

    pub fn decompress_all(&self) -> Result<usize> {
        let inflated = self.inner.attributes.decompress_all()?;
        debug!(store = %self.id(), inflated, "Inflated all blocks");
        Ok(inflated)
    }

    pub fn stats(&self) -> StoreStats {
        let columns = self.inner.attributes.stats();
        StoreStats {
            store: self.id().to_string(),
            state: self.state(),
            keys: self.inner.keys.len(),
            literals: self.inner.literals.len(),
            compression: CompressionStats::from_volumes(&columns.volumes),
            columns,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
