//! Lock-free string interning
//!
//! A [`StringPool`] assigns each distinct string a dense `u32` id and can
//! resolve ids back to strings. Two pools exist per store: one for
//! attribute keys and one for literal values.
//!
//! # Publication order
//!
//! ```text
//! put("x"):  forward["x"] = Inserting      <- reservation (exactly one winner)
//!            id = counter++                <- capacity checked here
//!            reverse[id] = "x"
//!            forward["x"] = Assigned(id)   <- published last
//! ```
//!
//! Readers that find `Inserting` back off until the assignment appears, so
//! any id handed out by `put` or `get_index` already resolves through
//! `get_value`.

use crate::error::{Error, Result};
use crate::sync::Backoff;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

pub type StringId = u32;

/// Keys with fixed ids in every key pool
pub const RESERVED_KEYS: [&str; 3] = ["concept:name", "time:timestamp", "lifecycle:transition"];

#[derive(Debug, Clone, Copy)]
enum Slot {
    Inserting,
    Assigned(StringId),
}

/// Bidirectional string ↔ id dictionary safe for concurrent use
#[derive(Debug)]
pub struct StringPool {
    forward: DashMap<Arc<str>, Slot>,
    reverse: DashMap<StringId, Arc<str>>,
    counter: AtomicU32,
    capacity: u32,
    reserved: &'static [&'static str],
}

impl StringPool {
    /// Unbounded pool without reserved entries (literal pool)
    pub fn new() -> Self {
        Self::build(&[], None)
    }

    /// Pool that fails once `capacity` distinct strings are stored
    pub fn with_capacity(capacity: u32) -> Self {
        Self::build(&[], Some(capacity))
    }

    /// Key pool: ids 0..=2 are pre-assigned to [`RESERVED_KEYS`]
    pub fn keys(capacity: Option<u32>) -> Self {
        Self::build(&RESERVED_KEYS, capacity)
    }

    fn build(reserved: &'static [&'static str], capacity: Option<u32>) -> Self {
        let start = reserved.len() as u32;
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
            counter: AtomicU32::new(start),
            capacity: capacity.unwrap_or(u32::MAX).max(start),
            reserved,
        }
    }

    /// Rebuild a pool from `(id, string)` pairs, e.g. a snapshot
    pub fn restore(
        reserved_keys: bool,
        capacity: Option<u32>,
        entries: impl IntoIterator<Item = (StringId, String)>,
    ) -> Result<Self> {
        let pool = if reserved_keys {
            Self::keys(capacity)
        } else {
            Self::build(&[], capacity)
        };
        let mut next = pool.counter.load(Ordering::Relaxed);
        for (id, value) in entries {
            if (id as usize) < pool.reserved.len() {
                continue;
            }
            if id >= pool.capacity {
                return Err(Error::PoolExhausted {
                    capacity: pool.capacity,
                });
            }
            let value: Arc<str> = Arc::from(value);
            pool.reverse.insert(id, value.clone());
            pool.forward.insert(value, Slot::Assigned(id));
            next = next.max(id + 1);
        }
        pool.counter.store(next, Ordering::Release);
        Ok(pool)
    }

    /// Intern `value`, returning its id (idempotent)
    pub fn put(&self, value: &str) -> Result<StringId> {
        if let Some(id) = self.reserved_index(value) {
            return Ok(id);
        }
        loop {
            if let Some(id) = self.lookup(value) {
                return Ok(id);
            }
            let key: Arc<str> = Arc::from(value);
            match self.forward.entry(key.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot::Inserting);
                }
            }

            let id = match self.allocate() {
                Ok(id) => id,
                Err(e) => {
                    self.forward.remove(value);
                    return Err(e);
                }
            };
            self.reverse.insert(id, key.clone());
            self.forward.insert(key, Slot::Assigned(id));
            metrics::counter!("attrstore_pool_strings_total").increment(1);
            return Ok(id);
        }
    }

    /// Id of `value` if it was interned, without inserting
    pub fn get_index(&self, value: &str) -> Option<StringId> {
        self.reserved_index(value).or_else(|| self.lookup(value))
    }

    /// String for `id`
    pub fn get_value(&self, id: StringId) -> Option<Arc<str>> {
        if let Some(reserved) = self.reserved.get(id as usize) {
            return Some(Arc::from(*reserved));
        }
        self.reverse.get(&id).map(|v| v.value().clone())
    }

    /// Number of ids handed out, reserved ones included
    pub fn len(&self) -> usize {
        self.counter.load(Ordering::Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive upper bound on ids (`u32::MAX` when unbounded)
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// All published entries ordered by id
    pub fn entries(&self) -> Vec<(StringId, Arc<str>)> {
        let mut entries: Vec<_> = self
            .reserved
            .iter()
            .enumerate()
            .map(|(i, s)| (i as StringId, Arc::from(*s)))
            .collect();
        entries.extend(self.reverse.iter().map(|e| (*e.key(), e.value().clone())));
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    fn reserved_index(&self, value: &str) -> Option<StringId> {
        self.reserved
            .iter()
            .position(|r| *r == value)
            .map(|i| i as StringId)
    }

    fn lookup(&self, value: &str) -> Option<StringId> {
        let mut backoff = Backoff::new();
        loop {
            match self.forward.get(value).map(|slot| *slot.value()) {
                None => return None,
                Some(Slot::Assigned(id)) => return Some(id),
                Some(Slot::Inserting) => backoff.snooze(),
            }
        }
    }

    fn allocate(&self) -> Result<StringId> {
        let capacity = self.capacity;
        self.counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next < capacity).then_some(next + 1)
            })
            .map_err(|_| {
                warn!(capacity, "String pool exhausted");
                Error::PoolExhausted { capacity }
            })
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_put_is_idempotent() -> Result<()> {
        let pool = StringPool::new();
        let a = pool.put("alpha")?;
        let b = pool.put("beta")?;
        assert_ne!(a, b);
        assert_eq!(pool.put("alpha")?, a);
        assert_eq!(pool.get_index("beta"), Some(b));
        assert_eq!(pool.get_value(a).as_deref(), Some("alpha"));
        assert_eq!(pool.len(), 2);
        Ok(())
    }

    #[test]
    fn test_get_index_does_not_insert() {
        let pool = StringPool::new();
        assert_eq!(pool.get_index("missing"), None);
        assert_eq!(pool.len(), 0);
        assert!(pool.get_value(0).is_none());
    }

    #[test]
    fn test_reserved_keys() -> Result<()> {
        let pool = StringPool::keys(None);
        assert_eq!(pool.get_index("concept:name"), Some(0));
        assert_eq!(pool.get_index("time:timestamp"), Some(1));
        assert_eq!(pool.get_index("lifecycle:transition"), Some(2));
        assert_eq!(pool.get_value(1).as_deref(), Some("time:timestamp"));
        assert_eq!(pool.put("org:resource")?, 3);
        Ok(())
    }

    #[test]
    fn test_capacity() -> Result<()> {
        let pool = StringPool::with_capacity(3);
        pool.put("a")?;
        pool.put("b")?;
        pool.put("c")?;

        assert!(matches!(
            pool.put("d"),
            Err(Error::PoolExhausted { capacity: 3 })
        ));
        // Failed insert leaves no reservation behind
        assert_eq!(pool.get_index("d"), None);
        assert_eq!(pool.put("b")?, 1);
        assert!(pool.put("d").is_err());
        Ok(())
    }

    #[test]
    fn test_concurrent_put_same_strings() {
        let pool = Arc::new(StringPool::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|i| pool.put(&format!("value-{}", i)).unwrap_or(u32::MAX))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<StringId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
        assert_eq!(pool.len(), 500);
        for (i, id) in results[0].iter().enumerate() {
            assert_eq!(pool.get_value(*id).as_deref(), Some(format!("value-{}", i).as_str()));
        }
    }

    #[test]
    fn test_restore_round_trip() -> Result<()> {
        let pool = StringPool::keys(None);
        pool.put("cost")?;
        pool.put("org:group")?;

        let entries = pool
            .entries()
            .into_iter()
            .map(|(id, s)| (id, s.to_string()));
        let restored = StringPool::restore(true, None, entries)?;
        assert_eq!(restored.get_index("org:group"), pool.get_index("org:group"));
        assert_eq!(restored.len(), pool.len());
        assert_eq!(restored.put("new")?, 5);
        Ok(())
    }
}
