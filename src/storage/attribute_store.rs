use super::columns::{AttributeStorage, ColumnLayout, ColumnRegistry};
use super::volume::{RowValue, VolumeStats};
use crate::error::{Error, Result};
use crate::model::{Attribute, AttributeKind, AttributeValue, Origin, OwnerId, StoreId};
use crate::pool::{StringId, StringPool};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::vec;
use tracing::{debug, info};
use uuid::Uuid;

const LIST_SEPARATOR: char = '\u{1f}';

/// Columnar values of every owner, one column per attribute key
///
/// Rows are owner ids. Nested (meta-attribute) owner ids live in a second
/// registry of `Long` columns keyed like the main one; the main column's
/// nested flag says whether to look there.
pub struct AttributeStore {
    store: StoreId,
    keys: Arc<StringPool>,
    literals: Arc<StringPool>,
    columns: ColumnRegistry,
    nested: ColumnRegistry,
}

/// Size counters across all columns
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ColumnStats {
    pub columns: usize,
    pub nested_columns: usize,
    #[serde(flatten)]
    pub volumes: VolumeStats,
}

enum Encoded {
    Bool(bool),
    Int(i32),
    Long(i64),
    Uuid(u128),
}

impl AttributeStore {
    pub fn new(
        store: StoreId,
        keys: Arc<StringPool>,
        literals: Arc<StringPool>,
        layout: ColumnLayout,
    ) -> Self {
        let nested_layout = ColumnLayout {
            initial_blocks: 0,
            ..layout
        };
        Self {
            store,
            keys,
            literals,
            columns: ColumnRegistry::new(layout),
            nested: ColumnRegistry::new(nested_layout),
        }
    }

    fn column_for(&self, key: StringId, attribute: &Attribute) -> Result<Arc<AttributeStorage>> {
        let storage = self
            .columns
            .get_or_create(key, attribute.kind(), attribute.extension());
        if storage.kind() != attribute.kind() {
            return Err(Error::Inconsistent {
                key: attribute.key().to_string(),
                expected: storage.kind(),
                actual: attribute.kind(),
            });
        }
        Ok(storage)
    }

    fn key_of(attribute: &Attribute) -> Result<StringId> {
        attribute.key_id().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "attribute '{}' was not adopted by this store",
                attribute.key()
            ))
        })
    }

    fn encode(&self, value: &AttributeValue) -> Result<Encoded> {
        Ok(match value {
            AttributeValue::Boolean(b) => Encoded::Bool(*b),
            AttributeValue::Container => Encoded::Bool(true),
            AttributeValue::Literal(s) => Encoded::Int(self.literals.put(s)? as i32),
            AttributeValue::List(keys) => Encoded::Int(self.literals.put(&encode_list(keys))? as i32),
            AttributeValue::Discrete(v) | AttributeValue::Timestamp(v) => Encoded::Long(*v),
            AttributeValue::Continuous(v) => Encoded::Long(v.to_bits() as i64),
            AttributeValue::Id(id) => Encoded::Uuid(id.as_u128()),
        })
    }

    fn literal(&self, id: i32) -> Result<String> {
        self.literals
            .get_value(id as u32)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Codec(format!("Unknown literal id {}", id as u32)))
    }

    fn read(&self, storage: &AttributeStorage, row: OwnerId) -> Result<Option<Attribute>> {
        let volume = storage.volume();
        let found = match storage.kind() {
            AttributeKind::Boolean => volume
                .get_bool(row)?
                .map(|r| (AttributeValue::Boolean(r.value), r.nested)),
            AttributeKind::Container => volume
                .get_bool(row)?
                .map(|r| (AttributeValue::Container, r.nested)),
            AttributeKind::Literal => match volume.get_int(row)? {
                Some(r) => Some((AttributeValue::Literal(self.literal(r.value)?), r.nested)),
                None => None,
            },
            AttributeKind::List => match volume.get_int(row)? {
                Some(r) => Some((
                    AttributeValue::List(decode_list(&self.literal(r.value)?)?),
                    r.nested,
                )),
                None => None,
            },
            AttributeKind::Discrete => volume
                .get_long(row)?
                .map(|r| (AttributeValue::Discrete(r.value), r.nested)),
            AttributeKind::Timestamp => volume
                .get_long(row)?
                .map(|r| (AttributeValue::Timestamp(r.value), r.nested)),
            AttributeKind::Continuous => volume
                .get_long(row)?
                .map(|r| (AttributeValue::Continuous(f64::from_bits(r.value as u64)), r.nested)),
            AttributeKind::Id => volume
                .get_uuid(row)?
                .map(|r| (AttributeValue::Id(Uuid::from_u128(r.value)), r.nested)),
        };
        let Some((value, has_nested)) = found else {
            return Ok(None);
        };

        let nested = if has_nested {
            self.nested_id(storage.key(), row)?
        } else {
            None
        };
        let key = self
            .keys
            .get_value(storage.key())
            .ok_or_else(|| Error::Codec(format!("Unknown key id {}", storage.key())))?;
        Ok(Some(Attribute::materialized(
            key,
            value,
            storage.extension().cloned(),
            nested,
            Origin {
                store: self.store,
                key: storage.key(),
            },
        )))
    }

    fn nested_id(&self, key: StringId, row: OwnerId) -> Result<Option<OwnerId>> {
        match self.nested.get(key) {
            Some(storage) => Ok(storage.volume().get_long(row)?.map(|r| r.value as OwnerId)),
            None => Ok(None),
        }
    }

    fn write(&self, storage: &AttributeStorage, row: OwnerId, attribute: &Attribute) -> Result<()> {
        let encoded = self.encode(attribute.value())?;
        let nested = attribute.nested_id();
        if let Some(id) = nested {
            self.nested
                .get_or_create(storage.key(), AttributeKind::Discrete, None)
                .volume()
                .put_long(row, id as i64, false)?;
        }

        let volume = storage.volume();
        let has_nested = nested.is_some();
        match encoded {
            Encoded::Bool(v) => volume.put_bool(row, v, has_nested),
            Encoded::Int(v) => volume.put_int(row, v, has_nested),
            Encoded::Long(v) => volume.put_long(row, v, has_nested),
            Encoded::Uuid(v) => volume.put_uuid(row, v, has_nested),
        }
    }

    /// Value of `key` for `row`
    pub fn get(&self, key: StringId, row: OwnerId) -> Result<Option<Attribute>> {
        match self.columns.get(key) {
            Some(storage) => self.read(&storage, row),
            None => Ok(None),
        }
    }

    /// Store an adopted attribute, returning the previous value
    pub fn put(&self, row: OwnerId, attribute: &Attribute) -> Result<Option<Attribute>> {
        let storage = self.column_for(Self::key_of(attribute)?, attribute)?;
        let old = self.read(&storage, row)?;
        self.write(&storage, row, attribute)?;
        Ok(old)
    }

    /// Store an adopted attribute without reading the previous value
    pub fn set(&self, row: OwnerId, attribute: &Attribute) -> Result<()> {
        let storage = self.column_for(Self::key_of(attribute)?, attribute)?;
        self.write(&storage, row, attribute)
    }

    /// Store many values of one key; rows are sorted so each block is locked once
    pub fn set_batch(&self, key: StringId, values: &mut [(OwnerId, Attribute)]) -> Result<()> {
        let Some((_, first)) = values.first() else {
            return Ok(());
        };
        let storage = self.column_for(key, first)?;
        values.sort_by_key(|(row, _)| *row);

        let mut nested = Vec::new();
        let mut bools = Vec::new();
        let mut ints = Vec::new();
        let mut longs = Vec::new();
        let mut uuids = Vec::new();
        for (row, attribute) in values.iter() {
            if attribute.kind() != storage.kind() {
                return Err(Error::Inconsistent {
                    key: attribute.key().to_string(),
                    expected: storage.kind(),
                    actual: attribute.kind(),
                });
            }
            let id = attribute.nested_id();
            if let Some(id) = id {
                nested.push(RowValue::new(*row, id as i64, false));
            }
            let has_nested = id.is_some();
            match self.encode(attribute.value())? {
                Encoded::Bool(v) => bools.push(RowValue::new(*row, v, has_nested)),
                Encoded::Int(v) => ints.push(RowValue::new(*row, v, has_nested)),
                Encoded::Long(v) => longs.push(RowValue::new(*row, v, has_nested)),
                Encoded::Uuid(v) => uuids.push(RowValue::new(*row, v, has_nested)),
            }
        }

        if !nested.is_empty() {
            self.nested
                .get_or_create(key, AttributeKind::Discrete, None)
                .volume()
                .put_longs(&nested)?;
        }
        let volume = storage.volume();
        volume.put_bools(&bools)?;
        volume.put_ints(&ints)?;
        volume.put_longs(&longs)?;
        volume.put_uuids(&uuids)?;
        Ok(())
    }

    /// Remove `key` from `row`, returning the removed value
    pub fn remove(&self, key: StringId, row: OwnerId) -> Result<Option<Attribute>> {
        let Some(storage) = self.columns.get(key) else {
            return Ok(None);
        };
        let old = self.read(&storage, row)?;
        if old.is_some() {
            storage.volume().remove(row)?;
        }
        Ok(old)
    }

    pub fn contains(&self, key: StringId, row: OwnerId) -> Result<bool> {
        match self.columns.get(key) {
            Some(storage) => storage.volume().has_value(row),
            None => Ok(false),
        }
    }

    /// Lazily materialize every value of `row`, in key id order
    pub fn values(&self, row: OwnerId) -> Values<'_> {
        Values {
            store: self,
            row,
            columns: self.columns.columns().into_iter(),
        }
    }

    /// Number of keys holding a value for `row`
    pub fn len(&self, row: OwnerId) -> Result<usize> {
        let mut count = 0;
        for storage in self.columns.columns() {
            if storage.volume().has_value(row)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove every value of `row`
    pub fn clear(&self, row: OwnerId) -> Result<()> {
        for storage in self.columns.columns() {
            storage.volume().remove(row)?;
        }
        Ok(())
    }

    /// Declared kind of every column
    pub fn attribute_types(&self) -> Vec<(StringId, AttributeKind)> {
        self.columns
            .columns()
            .iter()
            .map(|c| (c.key(), c.kind()))
            .collect()
    }

    fn all_columns(&self) -> Vec<Arc<AttributeStorage>> {
        let mut all = self.columns.columns();
        all.extend(self.nested.columns());
        all
    }

    /// Drop trailing empty blocks of every volume
    pub fn trim_to_size(&self) -> Result<()> {
        for storage in self.all_columns() {
            storage.volume().trim_to_size()?;
        }
        debug!(store = %self.store, "Trimmed all volumes");
        Ok(())
    }

    /// Compress every block of every volume in parallel; returns blocks changed
    pub fn compress_all(&self) -> Result<usize> {
        let compressed = self
            .all_columns()
            .par_iter()
            .map(|storage| storage.volume().compress_storage())
            .try_reduce(|| 0, |a, b| Ok(a + b))?;
        info!(store = %self.store, compressed, "Compression pass finished");
        Ok(compressed)
    }

    /// Inflate every block of every volume in parallel; returns blocks changed
    pub fn decompress_all(&self) -> Result<usize> {
        self.all_columns()
            .par_iter()
            .map(|storage| storage.volume().decompress_storage())
            .try_reduce(|| 0, |a, b| Ok(a + b))
    }

    pub fn stats(&self) -> ColumnStats {
        let mut stats = ColumnStats {
            columns: self.columns.len(),
            nested_columns: self.nested.len(),
            ..Default::default()
        };
        for storage in self.all_columns() {
            stats.volumes += storage.volume().stats();
        }
        stats
    }
}

/// Iterator over the values of one row
pub struct Values<'a> {
    store: &'a AttributeStore,
    row: OwnerId,
    columns: vec::IntoIter<Arc<AttributeStorage>>,
}

impl Iterator for Values<'_> {
    type Item = Result<Attribute>;

    fn next(&mut self) -> Option<Self::Item> {
        for storage in self.columns.by_ref() {
            match self.store.read(&storage, self.row) {
                Ok(Some(attribute)) => return Some(Ok(attribute)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// `"<count>␟k1␟k2..."`; the count keeps `[]` and `[""]` apart
fn encode_list(keys: &[String]) -> String {
    let mut encoded = keys.len().to_string();
    for key in keys {
        encoded.push(LIST_SEPARATOR);
        encoded.push_str(key);
    }
    encoded
}

fn decode_list(encoded: &str) -> Result<Vec<String>> {
    let mut parts = encoded.split(LIST_SEPARATOR);
    let count: usize = parts
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| Error::Codec(format!("Malformed list encoding '{}'", encoded)))?;
    let keys: Vec<String> = parts.map(str::to_string).collect();
    if keys.len() != count {
        return Err(Error::Codec(format!(
            "List encoding declares {} keys, found {}",
            count,
            keys.len()
        )));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::adopt;
    use crate::storage::Compression;

    fn store() -> AttributeStore {
        AttributeStore::new(
            StoreId::new(),
            Arc::new(StringPool::keys(None)),
            Arc::new(StringPool::new()),
            ColumnLayout {
                block_shift: 4,
                initial_blocks: 1,
                compression: Compression::default(),
            },
        )
    }

    fn adopted(store: &AttributeStore, attribute: Attribute) -> Result<Attribute> {
        adopt(attribute, store.store, &store.keys, |_| Ok(999))
    }

    #[test]
    fn test_every_kind_round_trips() -> Result<()> {
        let store = store();
        let id = Uuid::new_v4();
        let attributes = vec![
            Attribute::boolean("b", true),
            Attribute::discrete("d", -5),
            Attribute::continuous("c", 2.75),
            Attribute::timestamp_millis("t", 1_000_000),
            Attribute::literal("l", "hello"),
            Attribute::id("i", id),
            Attribute::new("list", AttributeValue::List(vec!["x".into(), "".into()])),
            Attribute::new("box", AttributeValue::Container),
        ];
        for attribute in attributes {
            let attribute = adopted(&store, attribute)?;
            store.set(17, &attribute)?;
            let key = attribute.key_id().unwrap_or_default();
            assert_eq!(store.get(key, 17)?, Some(attribute));
        }
        assert_eq!(store.len(17)?, 8);
        assert_eq!(store.len(18)?, 0);
        Ok(())
    }

    #[test]
    fn test_kind_is_fixed_by_first_write() -> Result<()> {
        let store = store();
        store.set(1, &adopted(&store, Attribute::discrete("cost", 3))?)?;
        let result = store.set(2, &adopted(&store, Attribute::literal("cost", "high"))?);
        assert!(matches!(result, Err(Error::Inconsistent { .. })));
        Ok(())
    }

    #[test]
    fn test_put_returns_previous_and_remove() -> Result<()> {
        let store = store();
        let first = adopted(&store, Attribute::literal("org:resource", "Ann"))?;
        let key = first.key_id().unwrap_or_default();
        assert_eq!(store.put(4, &first)?, None);
        let second = adopted(&store, Attribute::literal("org:resource", "Bob"))?;
        assert_eq!(store.put(4, &second)?, Some(first));

        assert_eq!(store.remove(key, 4)?, Some(second));
        assert_eq!(store.remove(key, 4)?, None);
        assert!(!store.contains(key, 4)?);
        Ok(())
    }

    #[test]
    fn test_nested_id_is_kept() -> Result<()> {
        let store = store();
        let attribute = adopted(
            &store,
            Attribute::literal("note", "x").with_meta(vec![Attribute::discrete("y", 1)]),
        )?;
        store.set(40, &attribute)?;
        let key = attribute.key_id().unwrap_or_default();
        assert_eq!(store.get(key, 40)?.and_then(|a| a.nested_id()), Some(999));
        Ok(())
    }

    #[test]
    fn test_batch_and_values() -> Result<()> {
        let store = store();
        let mut batch = Vec::new();
        for row in [9u64, 3, 40, 1] {
            batch.push((row, adopted(&store, Attribute::discrete("n", row as i64 * 10))?));
        }
        let key = batch[0].1.key_id().unwrap_or_default();
        store.set_batch(key, &mut batch)?;
        store.set(40, &adopted(&store, Attribute::boolean("flag", true))?)?;

        let values: Vec<_> = store.values(40).collect::<Result<_>>()?;
        assert_eq!(
            values,
            vec![Attribute::discrete("n", 400), Attribute::boolean("flag", true)]
        );
        store.clear(40)?;
        assert_eq!(store.values(40).count(), 0);
        assert_eq!(store.get(key, 3)?.map(|a| a.into_value()), Some(AttributeValue::Discrete(30)));
        Ok(())
    }

    #[test]
    fn test_compress_then_read() -> Result<()> {
        let store = store();
        let attribute = adopted(&store, Attribute::literal("a", "b"))?;
        store.set(5, &attribute)?;
        assert!(store.compress_all()? > 0);
        assert!(store.stats().volumes.compressed_blocks > 0);
        assert_eq!(store.get(attribute.key_id().unwrap_or_default(), 5)?, Some(attribute));
        store.decompress_all()?;
        assert_eq!(store.stats().volumes.compressed_blocks, 0);
        Ok(())
    }

    #[test]
    fn test_list_encoding() -> Result<()> {
        assert_eq!(decode_list(&encode_list(&[]))?, Vec::<String>::new());
        let keys = vec![String::new()];
        assert_eq!(decode_list(&encode_list(&keys))?, keys);
        assert!(decode_list("2\u{1f}a").is_err());
        Ok(())
    }
}
