use super::{OrderedBackend, OrderedCore};
use crate::codec::CompositeKey;
use crate::error::Result;
use crate::map::{check_put, AttributeIter, AttributeMap};
use crate::model::{Attribute, Owner};
use crate::pool::StringId;

/// Attributes of one owner as a composite-key range of the ordered backend
pub struct OrderedAttributeMap<'s, B> {
    core: &'s OrderedCore<B>,
    owner: &'s Owner,
}

impl<'s, B: OrderedBackend> OrderedAttributeMap<'s, B> {
    pub(crate) fn new(core: &'s OrderedCore<B>, owner: &'s Owner) -> Self {
        Self { core, owner }
    }

    pub fn owner(&self) -> &Owner {
        self.owner
    }

    fn record_key(&self, key: &str) -> Result<Option<u64>> {
        match self.core.keys.get_index(key) {
            Some(id) => Ok(Some(self.core.composite(self.owner.id(), id)?)),
            None => Ok(None),
        }
    }

    fn owner_records(&self) -> Result<Vec<(u64, bytes::Bytes)>> {
        self.core.backend.range(CompositeKey::owner_range(
            self.owner.id(),
            self.core.interval(),
        ))
    }
}

impl<B: OrderedBackend> AttributeMap for OrderedAttributeMap<'_, B> {
    fn get(&self, key: &str) -> Result<Option<Attribute>> {
        self.core.lifecycle.ensure_usable()?;
        let Some(raw) = self.record_key(key)? else {
            return Ok(None);
        };
        match self.core.backend.get(raw)? {
            Some(bytes) => Ok(Some(
                self.core.materialize(CompositeKey::from_raw(raw).key(self.core.interval()), &bytes)?,
            )),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, attribute: Attribute) -> Result<Option<Attribute>> {
        self.core.lifecycle.ensure_usable()?;
        check_put(key, &attribute)?;
        let core = self.core;
        let (id, bytes) = core.encode(attribute, self.owner.kind().is_event(), &mut |nested, records| {
            core.insert_records(nested, records)
        })?;
        match core.backend.insert(core.composite(self.owner.id(), id)?, bytes)? {
            Some(old) => Ok(Some(core.materialize(id, &old)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<Option<Attribute>> {
        self.core.lifecycle.ensure_usable()?;
        let Some(raw) = self.record_key(key)? else {
            return Ok(None);
        };
        match self.core.backend.remove(raw)? {
            Some(old) => Ok(Some(
                self.core.materialize(CompositeKey::from_raw(raw).key(self.core.interval()), &old)?,
            )),
            None => Ok(None),
        }
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        self.core.lifecycle.ensure_usable()?;
        match self.record_key(key)? {
            Some(raw) => Ok(self.core.backend.get(raw)?.is_some()),
            None => Ok(false),
        }
    }

    fn len(&self) -> Result<usize> {
        self.core.lifecycle.ensure_usable()?;
        Ok(self.owner_records()?.len())
    }

    fn clear(&self) -> Result<()> {
        self.core.lifecycle.ensure_usable()?;
        for (raw, _) in self.owner_records()? {
            self.core.backend.remove(raw)?;
        }
        Ok(())
    }

    fn values(&self) -> Result<AttributeIter<'_>> {
        self.core.lifecycle.ensure_usable()?;
        let interval = self.core.interval();
        let core = self.core;
        Ok(Box::new(self.owner_records()?.into_iter().map(move |(raw, bytes)| {
            core.materialize(CompositeKey::from_raw(raw).key(interval), &bytes)
        })))
    }

    fn key_id(&self, key: &str) -> Result<StringId> {
        self.core.keys.put(key)
    }
}
