use super::{check_put, AttributeIter, AttributeMap};
use crate::error::Result;
use crate::model::{Attribute, Owner};
use crate::pool::StringId;
use crate::store::Inner;

/// Attributes of one owner in the in-heap columnar store
///
/// Every operation fails with a usage error while the store is pumping.
pub struct ColumnarAttributeMap<'s> {
    core: &'s Inner,
    owner: &'s Owner,
}

impl<'s> ColumnarAttributeMap<'s> {
    pub(crate) fn new(core: &'s Inner, owner: &'s Owner) -> Self {
        Self { core, owner }
    }

    pub fn owner(&self) -> &Owner {
        self.owner
    }
}

impl AttributeMap for ColumnarAttributeMap<'_> {
    fn get(&self, key: &str) -> Result<Option<Attribute>> {
        self.core.lifecycle.ensure_usable()?;
        match self.core.keys.get_index(key) {
            Some(id) => self.core.attributes.get(id, self.owner.id()),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, attribute: Attribute) -> Result<Option<Attribute>> {
        self.core.lifecycle.ensure_usable()?;
        check_put(key, &attribute)?;
        let attribute = self.core.adopt(attribute)?;
        self.core.attributes.put(self.owner.id(), &attribute)
    }

    fn remove(&self, key: &str) -> Result<Option<Attribute>> {
        self.core.lifecycle.ensure_usable()?;
        match self.core.keys.get_index(key) {
            Some(id) => self.core.attributes.remove(id, self.owner.id()),
            None => Ok(None),
        }
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        self.core.lifecycle.ensure_usable()?;
        match self.core.keys.get_index(key) {
            Some(id) => self.core.attributes.contains(id, self.owner.id()),
            None => Ok(false),
        }
    }

    fn len(&self) -> Result<usize> {
        self.core.lifecycle.ensure_usable()?;
        self.core.attributes.len(self.owner.id())
    }

    fn clear(&self) -> Result<()> {
        self.core.lifecycle.ensure_usable()?;
        self.core.attributes.clear(self.owner.id())
    }

    fn values(&self) -> Result<AttributeIter<'_>> {
        self.core.lifecycle.ensure_usable()?;
        Ok(Box::new(self.core.attributes.values(self.owner.id())))
    }

    fn key_id(&self, key: &str) -> Result<StringId> {
        self.core.keys.put(key)
    }
}
