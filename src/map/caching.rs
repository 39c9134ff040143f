use super::{check_put, AttributeIter, AttributeMap};
use crate::error::{Error, Result};
use crate::model::{
    Attribute, AttributeKind, AttributeValue, HotKey, HotKeyCache, Origin, Owner, StoreId, ABSENT,
};
use crate::pool::{StringId, StringPool};
use crate::store::Lifecycle;
use std::sync::Arc;

/// Converts hot attributes to and from their cache slot encoding
///
/// Literal → literal-pool id, timestamp → millis, discrete → value,
/// boolean → 1/0. `-1` marks an empty slot, so a discrete or timestamp
/// value of -1 cannot be cached and is rejected.
#[derive(Clone, Copy)]
pub(crate) struct HotCodec<'a> {
    pub store: StoreId,
    pub keys: &'a StringPool,
    pub literals: &'a StringPool,
}

impl HotCodec<'_> {
    pub(crate) fn encode(&self, hot: &HotKey, attribute: &Attribute) -> Result<i64> {
        if attribute.kind() != hot.kind {
            return Err(Error::Inconsistent {
                key: hot.key.to_string(),
                expected: hot.kind,
                actual: attribute.kind(),
            });
        }
        if attribute.has_meta() {
            return Err(Error::Usage(format!(
                "Hot attribute '{}' cannot carry meta-attributes",
                hot.key
            )));
        }
        let raw = match attribute.value() {
            AttributeValue::Literal(s) => i64::from(self.literals.put(s)?),
            AttributeValue::Discrete(v) | AttributeValue::Timestamp(v) => *v,
            AttributeValue::Boolean(b) => i64::from(*b),
            other => {
                return Err(Error::Inconsistent {
                    key: hot.key.to_string(),
                    expected: hot.kind,
                    actual: other.kind(),
                })
            }
        };
        if raw == ABSENT {
            return Err(Error::InvalidArgument(format!(
                "Value -1 is reserved for hot attribute '{}'",
                hot.key
            )));
        }
        Ok(raw)
    }

    pub(crate) fn decode(&self, hot: &HotKey, raw: i64) -> Result<Option<Attribute>> {
        if raw == ABSENT {
            return Ok(None);
        }
        let value = match hot.kind {
            AttributeKind::Literal => {
                let literal = self.literals.get_value(raw as u32).ok_or_else(|| {
                    Error::Codec(format!("Unknown literal id {} for '{}'", raw, hot.key))
                })?;
                AttributeValue::Literal(literal.to_string())
            }
            AttributeKind::Timestamp => AttributeValue::Timestamp(raw),
            AttributeKind::Discrete => AttributeValue::Discrete(raw),
            AttributeKind::Boolean => AttributeValue::Boolean(raw == 1),
            other => {
                return Err(Error::Codec(format!(
                    "Hot key '{}' has uncacheable kind {}",
                    hot.key, other
                )))
            }
        };
        let key = self.keys.put(hot.key)?;
        Ok(Some(Attribute::materialized(
            Arc::from(hot.key),
            value,
            Some(hot.extension()),
            None,
            Origin {
                store: self.store,
                key,
            },
        )))
    }
}

/// Move hot attributes into the owner's cache, returning the others
pub(crate) fn divert_hot(
    owner: &Owner,
    attributes: Vec<Attribute>,
    codec: HotCodec<'_>,
) -> Result<Vec<Attribute>> {
    let Some(cache) = owner.cache() else {
        return Ok(attributes);
    };
    let schema = cache.schema();
    let mut rest = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        match schema
            .index_of(attribute.key())
            .and_then(|i| schema.get(i).map(|hot| (i, hot)))
        {
            Some((index, hot)) => {
                cache.swap(index, codec.encode(hot, &attribute)?);
            }
            None => rest.push(attribute),
        }
    }
    Ok(rest)
}

/// Serves an owner's hot keys from its cache and everything else from `inner`
///
/// Size and iteration combine both parts; a hot key is never written to the
/// backing map.
pub struct CachingAttributeMap<'s, M> {
    inner: M,
    owner: &'s Owner,
    codec: HotCodec<'s>,
    lifecycle: &'s Lifecycle,
}

impl<'s, M: AttributeMap> CachingAttributeMap<'s, M> {
    pub(crate) fn new(
        inner: M,
        owner: &'s Owner,
        codec: HotCodec<'s>,
        lifecycle: &'s Lifecycle,
    ) -> Self {
        Self {
            inner,
            owner,
            codec,
            lifecycle,
        }
    }

    /// The backing map, bypassing the cache
    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn hot(&self, key: &str) -> Option<(&'s HotKeyCache, usize, &'static HotKey)> {
        let cache = self.owner.cache()?;
        let schema = cache.schema();
        let index = schema.index_of(key)?;
        Some((cache, index, schema.get(index)?))
    }

    fn cached(&self) -> Result<Vec<Attribute>> {
        let Some(cache) = self.owner.cache() else {
            return Ok(Vec::new());
        };
        let mut attributes = Vec::new();
        for (index, hot) in cache.schema().keys().iter().enumerate() {
            if let Some(attribute) = self.codec.decode(hot, cache.load(index))? {
                attributes.push(attribute);
            }
        }
        Ok(attributes)
    }
}

impl<M: AttributeMap> AttributeMap for CachingAttributeMap<'_, M> {
    fn get(&self, key: &str) -> Result<Option<Attribute>> {
        match self.hot(key) {
            Some((cache, index, hot)) => {
                self.lifecycle.ensure_usable()?;
                self.codec.decode(hot, cache.load(index))
            }
            None => self.inner.get(key),
        }
    }

    fn put(&self, key: &str, attribute: Attribute) -> Result<Option<Attribute>> {
        match self.hot(key) {
            Some((cache, index, hot)) => {
                self.lifecycle.ensure_usable()?;
                check_put(key, &attribute)?;
                let raw = self.codec.encode(hot, &attribute)?;
                self.codec.decode(hot, cache.swap(index, raw))
            }
            None => self.inner.put(key, attribute),
        }
    }

    fn remove(&self, key: &str) -> Result<Option<Attribute>> {
        match self.hot(key) {
            Some((cache, index, hot)) => {
                self.lifecycle.ensure_usable()?;
                self.codec.decode(hot, cache.swap(index, ABSENT))
            }
            None => self.inner.remove(key),
        }
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        match self.hot(key) {
            Some((cache, index, _)) => {
                self.lifecycle.ensure_usable()?;
                Ok(cache.load(index) != ABSENT)
            }
            None => self.inner.contains_key(key),
        }
    }

    fn len(&self) -> Result<usize> {
        let cached = self.owner.cache().map_or(0, |c| c.occupied());
        Ok(self.inner.len()? + cached)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()?;
        if let Some(cache) = self.owner.cache() {
            cache.clear();
        }
        Ok(())
    }

    fn values(&self) -> Result<AttributeIter<'_>> {
        let columnar = self.inner.values()?;
        let cached = self.cached()?;
        Ok(Box::new(columnar.chain(cached.into_iter().map(Ok))))
    }

    fn key_id(&self, key: &str) -> Result<StringId> {
        self.inner.key_id(key)
    }
}
