use super::compression::Compression;
use super::mode::Mode;
use super::volume::Volume;
use crate::model::{AttributeKind, Extension};
use crate::pool::StringId;
use crate::sync::Backoff;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// One attribute key's column: declared kind, extension and volume
#[derive(Debug)]
pub struct AttributeStorage {
    key: StringId,
    kind: AttributeKind,
    extension: Option<Extension>,
    volume: Volume,
}

impl AttributeStorage {
    pub fn key(&self) -> StringId {
        self.key
    }

    /// Kind fixed by the first write to this column
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    pub fn extension(&self) -> Option<&Extension> {
        self.extension.as_ref()
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }
}

#[derive(Clone)]
enum Slot {
    Reserved,
    Ready(Arc<AttributeStorage>),
}

/// Volume geometry shared by every column of a registry
#[derive(Debug, Clone, Copy)]
pub struct ColumnLayout {
    pub block_shift: u32,
    pub initial_blocks: usize,
    pub compression: Compression,
}

/// Key id → column, created on first use
///
/// Creation follows the same reservation idiom as the string pool: the
/// thread that claims the slot builds the column, others back off until it
/// is published. Building a column cannot fail, so a reservation is never
/// abandoned.
pub struct ColumnRegistry {
    columns: DashMap<StringId, Slot>,
    layout: ColumnLayout,
}

impl ColumnRegistry {
    pub fn new(layout: ColumnLayout) -> Self {
        Self {
            columns: DashMap::new(),
            layout,
        }
    }

    /// Column for `key`, if one was created
    pub fn get(&self, key: StringId) -> Option<Arc<AttributeStorage>> {
        let mut backoff = Backoff::new();
        loop {
            match self.columns.get(&key).map(|slot| slot.value().clone()) {
                None => return None,
                Some(Slot::Ready(storage)) => return Some(storage),
                Some(Slot::Reserved) => backoff.snooze(),
            }
        }
    }

    /// Column for `key`, created with `kind` if missing
    ///
    /// An existing column is returned as is; callers compare its kind.
    pub fn get_or_create(
        &self,
        key: StringId,
        kind: AttributeKind,
        extension: Option<&Extension>,
    ) -> Arc<AttributeStorage> {
        loop {
            if let Some(storage) = self.get(key) {
                return storage;
            }
            match self.columns.entry(key) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot::Reserved);
                }
            }

            let mode = Mode::for_kind(kind);
            let storage = Arc::new(AttributeStorage {
                key,
                kind,
                extension: extension.cloned(),
                volume: Volume::new(
                    mode,
                    self.layout.initial_blocks,
                    self.layout.block_shift,
                    self.layout.compression,
                ),
            });
            self.columns.insert(key, Slot::Ready(storage.clone()));
            debug!(key, %kind, ?mode, "Created attribute column");
            return storage;
        }
    }

    /// Published columns ordered by key id
    pub fn columns(&self) -> Vec<Arc<AttributeStorage>> {
        let mut columns: Vec<_> = self
            .columns
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(storage) => Some(storage.clone()),
                Slot::Reserved => None,
            })
            .collect();
        columns.sort_by_key(|c| c.key());
        columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn registry() -> ColumnRegistry {
        ColumnRegistry::new(ColumnLayout {
            block_shift: 4,
            initial_blocks: 1,
            compression: Compression::none(),
        })
    }

    #[test]
    fn test_create_once() {
        let registry = registry();
        assert!(registry.get(7).is_none());

        let first = registry.get_or_create(7, AttributeKind::Discrete, None);
        let second = registry.get_or_create(7, AttributeKind::Literal, None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.kind(), AttributeKind::Discrete);
        assert_eq!(second.volume().mode(), Mode::Long);
    }

    #[test]
    fn test_concurrent_creation_yields_one_column() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..64)
                        .map(|k| Arc::as_ptr(&registry.get_or_create(k, AttributeKind::Boolean, None)))
                        .map(|p| p as usize)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(registry.len(), 64);
        let keys: Vec<_> = registry.columns().iter().map(|c| c.key()).collect();
        assert_eq!(keys, (0..64).collect::<Vec<_>>());
    }
}
