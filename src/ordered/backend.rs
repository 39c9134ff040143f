//! Ordered key/value backend trait

use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Ordered `u64 → bytes` map the ordered store keeps its records in
///
/// On-disk engines plug in by implementing this trait.
pub trait OrderedBackend: Send + Sync + 'static {
    fn get(&self, key: u64) -> Result<Option<Bytes>>;

    /// Store `value`, returning the previous one
    fn insert(&self, key: u64, value: Bytes) -> Result<Option<Bytes>>;

    fn remove(&self, key: u64) -> Result<Option<Bytes>>;

    /// Records with keys in `range`, in ascending key order
    fn range(&self, range: RangeInclusive<u64>) -> Result<Vec<(u64, Bytes)>>;

    /// Load records whose keys are strictly monotonic in one direction
    ///
    /// Returns the number of records written.
    fn bulk_build(&self, records: &mut dyn Iterator<Item = Result<(u64, Bytes)>>) -> Result<u64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make written records durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory backend over a `BTreeMap`
#[derive(Debug, Default)]
pub struct BTreeBackend {
    data: RwLock<BTreeMap<u64, Bytes>>,
}

impl BTreeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderedBackend for BTreeBackend {
    fn get(&self, key: u64) -> Result<Option<Bytes>> {
        Ok(self.data.read().get(&key).cloned())
    }

    fn insert(&self, key: u64, value: Bytes) -> Result<Option<Bytes>> {
        Ok(self.data.write().insert(key, value))
    }

    fn remove(&self, key: u64) -> Result<Option<Bytes>> {
        Ok(self.data.write().remove(&key))
    }

    fn range(&self, range: RangeInclusive<u64>) -> Result<Vec<(u64, Bytes)>> {
        Ok(self
            .data
            .read()
            .range(range)
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    fn bulk_build(&self, records: &mut dyn Iterator<Item = Result<(u64, Bytes)>>) -> Result<u64> {
        let mut previous: Option<u64> = None;
        let mut ascending: Option<bool> = None;
        let mut staged = Vec::new();
        for record in records {
            let (key, value) = record?;
            if let Some(prev) = previous {
                if key == prev {
                    return Err(Error::Pump(format!("duplicate key {} in bulk build", key)));
                }
                let up = key > prev;
                if *ascending.get_or_insert(up) != up {
                    return Err(Error::Pump(format!(
                        "key {} breaks the order of the bulk build after {}",
                        key, prev
                    )));
                }
            }
            previous = Some(key);
            staged.push((key, value));
        }

        let count = staged.len() as u64;
        let mut data = self.data.write();
        data.extend(staged);
        Ok(count)
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_ops() -> Result<()> {
        let backend = BTreeBackend::new();
        assert!(backend.insert(5, Bytes::from_static(b"a"))?.is_none());
        assert_eq!(backend.insert(5, Bytes::from_static(b"b"))?, Some(Bytes::from_static(b"a")));
        backend.insert(9, Bytes::from_static(b"c"))?;
        backend.insert(20, Bytes::from_static(b"d"))?;

        let keys: Vec<u64> = backend.range(5..=10)?.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![5, 9]);
        assert_eq!(backend.remove(9)?, Some(Bytes::from_static(b"c")));
        assert_eq!(backend.len(), 2);
        Ok(())
    }

    #[test]
    fn test_bulk_build_accepts_either_direction() -> Result<()> {
        let backend = BTreeBackend::new();
        let mut down = [30u64, 20, 10].into_iter().map(|k| Ok((k, Bytes::new())));
        assert_eq!(backend.bulk_build(&mut down)?, 3);
        let mut up = [40u64, 50].into_iter().map(|k| Ok((k, Bytes::new())));
        assert_eq!(backend.bulk_build(&mut up)?, 2);
        assert_eq!(backend.len(), 5);
        Ok(())
    }

    #[test]
    fn test_bulk_build_rejects_unsorted() {
        let backend = BTreeBackend::new();
        let mut records = [1u64, 3, 2].into_iter().map(|k| Ok((k, Bytes::new())));
        assert!(matches!(backend.bulk_build(&mut records), Err(Error::Pump(_))));
        assert!(backend.is_empty());
    }
}
