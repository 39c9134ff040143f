//! Hot keys
//!
//! A handful of keys are read for nearly every event (name, lifecycle
//! transition, timestamp). Owners that carry a [`HotKeyCache`] keep those
//! values in an array of atomics instead of the columnar store; each slot
//! holds an `i64` encoding of the value or [`ABSENT`].

use super::{AttributeKind, Extension};
use std::sync::atomic::{AtomicI64, Ordering};

/// Slot value meaning "no attribute"
pub const ABSENT: i64 = -1;

/// A key served from the per-owner cache
#[derive(Debug, Clone, Copy)]
pub struct HotKey {
    pub key: &'static str,
    pub kind: AttributeKind,
    extension: fn() -> Extension,
}

impl HotKey {
    const fn new(key: &'static str, kind: AttributeKind, extension: fn() -> Extension) -> Self {
        Self {
            key,
            kind,
            extension,
        }
    }

    pub fn extension(&self) -> Extension {
        (self.extension)()
    }
}

/// Ordered set of hot keys; a key's position is its cache slot
#[derive(Debug)]
pub struct HotKeySchema {
    keys: &'static [HotKey],
}

impl HotKeySchema {
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.key == key)
    }

    pub fn get(&self, index: usize) -> Option<&HotKey> {
        self.keys.get(index)
    }

    pub fn keys(&self) -> &[HotKey] {
        self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

const STANDARD_KEYS: [HotKey; 3] = [
    HotKey::new("concept:name", AttributeKind::Literal, Extension::concept),
    HotKey::new("lifecycle:transition", AttributeKind::Literal, Extension::lifecycle),
    HotKey::new("time:timestamp", AttributeKind::Timestamp, Extension::time),
];

const ALIGNMENT_KEYS: [HotKey; 10] = [
    STANDARD_KEYS[0],
    STANDARD_KEYS[1],
    STANDARD_KEYS[2],
    HotKey::new("alignment:movetype", AttributeKind::Discrete, Extension::alignment),
    HotKey::new("dataalignment:movetype", AttributeKind::Discrete, Extension::data_alignment),
    HotKey::new("alignment:observable", AttributeKind::Boolean, Extension::alignment),
    HotKey::new("alignment:activityid", AttributeKind::Literal, Extension::alignment),
    HotKey::new("alignment:eventclassid", AttributeKind::Literal, Extension::alignment),
    HotKey::new("alignment:logmove", AttributeKind::Literal, Extension::alignment),
    HotKey::new("alignment:modelmove", AttributeKind::Literal, Extension::alignment),
];

/// Name, lifecycle transition, timestamp
pub static STANDARD_SCHEMA: HotKeySchema = HotKeySchema {
    keys: &STANDARD_KEYS,
};

/// Standard keys plus the alignment vocabulary
pub static ALIGNMENT_SCHEMA: HotKeySchema = HotKeySchema {
    keys: &ALIGNMENT_KEYS,
};

/// Per-owner slots for the keys of one schema
#[derive(Debug)]
pub struct HotKeyCache {
    schema: &'static HotKeySchema,
    slots: Box<[AtomicI64]>,
}

impl HotKeyCache {
    pub fn new(schema: &'static HotKeySchema) -> Self {
        Self {
            schema,
            slots: (0..schema.len()).map(|_| AtomicI64::new(ABSENT)).collect(),
        }
    }

    pub fn schema(&self) -> &'static HotKeySchema {
        self.schema
    }

    /// Raw slot content, `ABSENT` when empty
    pub fn load(&self, index: usize) -> i64 {
        self.slots
            .get(index)
            .map_or(ABSENT, |slot| slot.load(Ordering::Acquire))
    }

    /// Replace a slot, returning the previous raw value
    pub fn swap(&self, index: usize, value: i64) -> i64 {
        self.slots
            .get(index)
            .map_or(ABSENT, |slot| slot.swap(value, Ordering::AcqRel))
    }

    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.store(ABSENT, Ordering::Release);
        }
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire) != ABSENT)
            .count()
    }
}
