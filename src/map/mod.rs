//! Per-owner attribute maps
//!
//! An [`AttributeMap`] is a view of one owner's attributes backed by a
//! store. Two backings exist ([`ColumnarAttributeMap`] for the in-heap
//! store, [`OrderedAttributeMap`](crate::ordered::OrderedAttributeMap) for
//! the ordered store), and [`CachingAttributeMap`] layers the owner's
//! hot-key cache over either one.
//!
//! Maps never hold values themselves: every call goes to the store, and
//! attributes handed out are materialized copies that remember their store
//! and interned key id.

mod caching;
mod columnar;

pub use caching::CachingAttributeMap;
pub use columnar::ColumnarAttributeMap;

pub(crate) use caching::{divert_hot, HotCodec};

use crate::error::{Error, Result};
use crate::model::Attribute;
use crate::pool::StringId;
use std::sync::Arc;

/// Boxed iterator over materialized attributes
pub type AttributeIter<'a> = Box<dyn Iterator<Item = Result<Attribute>> + 'a>;

/// Map-like view of one owner's attributes
pub trait AttributeMap {
    fn get(&self, key: &str) -> Result<Option<Attribute>>;

    /// Store `attribute` under `key` (which must be the attribute's own key),
    /// returning the previous value
    fn put(&self, key: &str, attribute: Attribute) -> Result<Option<Attribute>>;

    fn remove(&self, key: &str) -> Result<Option<Attribute>>;

    fn contains_key(&self, key: &str) -> Result<bool>;

    fn len(&self) -> Result<usize>;

    fn clear(&self) -> Result<()>;

    fn values(&self) -> Result<AttributeIter<'_>>;

    /// Interned id of `key`, interning it if needed
    fn key_id(&self, key: &str) -> Result<StringId>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Store `attribute` under its own key
    fn insert(&self, attribute: Attribute) -> Result<Option<Attribute>> {
        let key = attribute.key_arc().clone();
        self.put(&key, attribute)
    }

    fn put_all(&self, attributes: Vec<Attribute>) -> Result<()> {
        for attribute in attributes {
            self.insert(attribute)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Box<dyn Iterator<Item = Result<Arc<str>>> + '_>> {
        Ok(Box::new(
            self.values()?
                .map(|r| r.map(|attribute| attribute.key_arc().clone())),
        ))
    }

    /// Entries whose value can be replaced in place
    fn entries(&self) -> Result<Box<dyn Iterator<Item = Result<AttributeEntry<'_, Self>>> + '_>>
    where
        Self: Sized,
    {
        Ok(Box::new(
            self.values()?
                .map(move |r| r.map(|attribute| AttributeEntry::new(self, attribute))),
        ))
    }

    /// Materialize every attribute
    fn to_vec(&self) -> Result<Vec<Attribute>> {
        self.values()?.collect()
    }
}

/// A key/value pair of a map; `set_value` writes through
pub struct AttributeEntry<'m, M: ?Sized> {
    map: &'m M,
    attribute: Attribute,
}

impl<'m, M: AttributeMap + ?Sized> AttributeEntry<'m, M> {
    fn new(map: &'m M, attribute: Attribute) -> Self {
        Self { map, attribute }
    }

    pub fn key(&self) -> &str {
        self.attribute.key()
    }

    pub fn value(&self) -> &Attribute {
        &self.attribute
    }

    pub fn into_value(self) -> Attribute {
        self.attribute
    }

    /// Replace the value; the new attribute must have the same key
    pub fn set_value(&mut self, attribute: Attribute) -> Result<Attribute> {
        let current = match self.attribute.key_id() {
            Some(id) => id,
            None => self.map.key_id(self.attribute.key())?,
        };
        if self.map.key_id(attribute.key())? != current {
            return Err(Error::Usage(
                "Cannot change the 'key' of an attribute with 'set_value'".to_string(),
            ));
        }
        let key = attribute.key_arc().clone();
        self.map.put(&key, attribute.clone())?;
        Ok(std::mem::replace(&mut self.attribute, attribute))
    }
}

/// Shared argument checks for `put`
pub(crate) fn check_put(key: &str, attribute: &Attribute) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument(
            "attribute key must not be empty".to_string(),
        ));
    }
    if key != attribute.key() {
        return Err(Error::InvalidArgument(format!(
            "key '{}' does not match attribute key '{}'",
            key,
            attribute.key()
        )));
    }
    Ok(())
}
