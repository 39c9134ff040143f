//! Growable array of blocks holding one attribute column
//!
//! A row id maps to `(row >> block_shift, row & (block_size - 1))`. The
//! block array is published behind an `RwLock<Arc<[..]>>` that is only held
//! long enough to clone a block handle; growth builds a new array under a
//! separate grow lock (double-checked) and swaps it in, so readers never
//! wait on growth and a block handle stays valid across it.
//!
//! ```text
//! blocks: [B0][B1][B2]...        grow to max(index + 1, ⌈1.5 × len⌉)
//!           │
//!           └── Mutex<[marker][payload][flags]>
//! ```

use super::block::{Block, BlockGuard};
use super::compression::Compression;
use super::mode::Mode;
use crate::error::{Error, Result};
use crate::model::OwnerId;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on blocks per volume
pub const MAX_BLOCKS: usize = i32::MAX as usize - 8;

/// A row's payload plus its nested flag, for batched writes and reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowValue<T> {
    pub row: OwnerId,
    pub value: T,
    pub nested: bool,
}

impl<T> RowValue<T> {
    pub fn new(row: OwnerId, value: T, nested: bool) -> Self {
        Self { row, value, nested }
    }
}

/// Block counters of one or more volumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VolumeStats {
    pub blocks: usize,
    pub compressed_blocks: usize,
    /// Bytes currently held
    pub bytes: usize,
    /// Bytes if every block were inflated
    pub raw_bytes: usize,
}

impl std::ops::AddAssign for VolumeStats {
    fn add_assign(&mut self, other: Self) {
        self.blocks += other.blocks;
        self.compressed_blocks += other.compressed_blocks;
        self.bytes += other.bytes;
        self.raw_bytes += other.raw_bytes;
    }
}

pub struct Volume {
    mode: Mode,
    block_shift: u32,
    compression: Compression,
    blocks: RwLock<Arc<[Arc<Block>]>>,
    grow: Mutex<()>,
}

impl Volume {
    pub fn new(mode: Mode, initial_blocks: usize, block_shift: u32, compression: Compression) -> Self {
        let block_size = 1usize << block_shift;
        let blocks: Vec<Arc<Block>> = (0..initial_blocks.min(MAX_BLOCKS))
            .map(|_| Arc::new(Block::new(mode, block_size, compression)))
            .collect();
        Self {
            mode,
            block_shift,
            compression,
            blocks: RwLock::new(blocks.into()),
            grow: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn block_size(&self) -> usize {
        1 << self.block_shift
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    fn split(&self, row: OwnerId) -> Result<(usize, usize)> {
        let index = row >> self.block_shift;
        if index >= MAX_BLOCKS as u64 {
            return Err(Error::InvalidArgument(format!(
                "row {} is beyond the addressable range of a volume",
                row
            )));
        }
        let mask = (1u64 << self.block_shift) - 1;
        Ok((index as usize, (row & mask) as usize))
    }

    fn block(&self, index: usize) -> Option<Arc<Block>> {
        self.blocks.read().get(index).cloned()
    }

    fn block_or_create(&self, index: usize) -> Arc<Block> {
        if let Some(block) = self.block(index) {
            return block;
        }

        let _grow = self.grow.lock();
        let current = self.blocks.read().clone();
        if let Some(block) = current.get(index) {
            return block.clone();
        }

        let old_len = current.len();
        let new_len = (index + 1).max(old_len + old_len.div_ceil(2)).min(MAX_BLOCKS);
        let block_size = self.block_size();
        let mut grown: Vec<Arc<Block>> = Vec::with_capacity(new_len);
        grown.extend(current.iter().cloned());
        grown.resize_with(new_len, || {
            Arc::new(Block::new(self.mode, block_size, self.compression))
        });
        let block = grown[index].clone();
        *self.blocks.write() = grown.into();

        debug!(mode = ?self.mode, old_len, new_len, "Grew volume");
        block
    }

    fn read<T>(
        &self,
        row: OwnerId,
        get: impl FnOnce(&BlockGuard<'_>, usize) -> T,
    ) -> Result<Option<RowValue<T>>> {
        let (index, offset) = self.split(row)?;
        let Some(block) = self.block(index) else {
            return Ok(None);
        };
        let guard = block.lock()?;
        if !guard.exists(offset) {
            return Ok(None);
        }
        Ok(Some(RowValue::new(row, get(&guard, offset), guard.has_nested(offset))))
    }

    fn write(
        &self,
        row: OwnerId,
        nested: bool,
        put: impl FnOnce(&mut BlockGuard<'_>, usize),
    ) -> Result<()> {
        let (index, offset) = self.split(row)?;
        let block = self.block_or_create(index);
        let mut guard = block.lock()?;
        put(&mut guard, offset);
        guard.mark(offset, nested);
        Ok(())
    }

    /// Write rows grouped by block, locking each block once per run of rows
    fn write_batch<T: Copy>(
        &self,
        values: &[RowValue<T>],
        put: impl Fn(&mut BlockGuard<'_>, usize, T),
    ) -> Result<()> {
        let mask = (1u64 << self.block_shift) - 1;
        let mut iter = values.iter().peekable();
        while let Some(first) = iter.next() {
            let (index, offset) = self.split(first.row)?;
            let block = self.block_or_create(index);
            let mut guard = block.lock()?;
            put(&mut guard, offset, first.value);
            guard.mark(offset, first.nested);

            while let Some(next) =
                iter.next_if(|v| (v.row >> self.block_shift) == index as u64)
            {
                let offset = (next.row & mask) as usize;
                put(&mut guard, offset, next.value);
                guard.mark(offset, next.nested);
            }
        }
        Ok(())
    }

    pub fn has_value(&self, row: OwnerId) -> Result<bool> {
        let (index, offset) = self.split(row)?;
        match self.block(index) {
            Some(block) => Ok(block.lock()?.exists(offset)),
            None => Ok(false),
        }
    }

    pub fn has_nested(&self, row: OwnerId) -> Result<bool> {
        let (index, offset) = self.split(row)?;
        match self.block(index) {
            Some(block) => Ok(block.lock()?.has_nested(offset)),
            None => Ok(false),
        }
    }

    pub fn get_bool(&self, row: OwnerId) -> Result<Option<RowValue<bool>>> {
        self.read(row, |g, r| g.get_bool(r))
    }

    pub fn get_int(&self, row: OwnerId) -> Result<Option<RowValue<i32>>> {
        self.read(row, |g, r| g.get_int(r))
    }

    pub fn get_long(&self, row: OwnerId) -> Result<Option<RowValue<i64>>> {
        self.read(row, |g, r| g.get_long(r))
    }

    pub fn get_uuid(&self, row: OwnerId) -> Result<Option<RowValue<u128>>> {
        self.read(row, |g, r| g.get_uuid(r))
    }

    pub fn put_bool(&self, row: OwnerId, value: bool, nested: bool) -> Result<()> {
        self.write(row, nested, |g, r| g.put_bool(r, value))
    }

    pub fn put_int(&self, row: OwnerId, value: i32, nested: bool) -> Result<()> {
        self.write(row, nested, |g, r| g.put_int(r, value))
    }

    pub fn put_long(&self, row: OwnerId, value: i64, nested: bool) -> Result<()> {
        self.write(row, nested, |g, r| g.put_long(r, value))
    }

    pub fn put_uuid(&self, row: OwnerId, value: u128, nested: bool) -> Result<()> {
        self.write(row, nested, |g, r| g.put_uuid(r, value))
    }

    /// Batched writes; rows should be sorted so each block is locked once
    pub fn put_bools(&self, values: &[RowValue<bool>]) -> Result<()> {
        self.write_batch(values, |g, r, v| g.put_bool(r, v))
    }

    pub fn put_ints(&self, values: &[RowValue<i32>]) -> Result<()> {
        self.write_batch(values, |g, r, v| g.put_int(r, v))
    }

    pub fn put_longs(&self, values: &[RowValue<i64>]) -> Result<()> {
        self.write_batch(values, |g, r, v| g.put_long(r, v))
    }

    pub fn put_uuids(&self, values: &[RowValue<u128>]) -> Result<()> {
        self.write_batch(values, |g, r, v| g.put_uuid(r, v))
    }

    /// Clear a row's flags; returns whether it held a value
    pub fn remove(&self, row: OwnerId) -> Result<bool> {
        let (index, offset) = self.split(row)?;
        let Some(block) = self.block(index) else {
            return Ok(false);
        };
        let mut guard = block.lock()?;
        let existed = guard.exists(offset);
        guard.unmark(offset);
        Ok(existed)
    }

    /// Drop trailing blocks without any value; returns the new block count
    ///
    /// Must not run concurrently with writers: a write into a dropped block
    /// would be lost.
    pub fn trim_to_size(&self) -> Result<usize> {
        let _grow = self.grow.lock();
        let current = self.blocks.read().clone();
        let mut keep = current.len();
        while keep > 0 && !current[keep - 1].has_values()? {
            keep -= 1;
        }
        if keep < current.len() {
            *self.blocks.write() = current[..keep].iter().cloned().collect();
            debug!(mode = ?self.mode, from = current.len(), to = keep, "Trimmed volume");
        }
        Ok(keep)
    }

    /// Compress every block; returns how many changed
    pub fn compress_storage(&self) -> Result<usize> {
        let blocks = self.blocks.read().clone();
        let mut compressed = 0;
        for block in blocks.iter() {
            if block.compress()? {
                compressed += 1;
            }
        }
        if compressed > 0 {
            metrics::counter!("attrstore_blocks_compressed_total").increment(compressed as u64);
        }
        Ok(compressed)
    }

    /// Inflate every block; returns how many changed
    pub fn decompress_storage(&self) -> Result<usize> {
        let blocks = self.blocks.read().clone();
        let mut inflated = 0;
        for block in blocks.iter() {
            if block.decompress()? {
                inflated += 1;
            }
        }
        Ok(inflated)
    }

    /// Compress the block holding `row`
    pub fn compress_block(&self, row: OwnerId) -> Result<bool> {
        let (index, _) = self.split(row)?;
        match self.block(index) {
            Some(block) => block.compress(),
            None => Ok(false),
        }
    }

    /// Inflate the block holding `row`, creating it when it does not exist yet
    pub fn decompress_block(&self, row: OwnerId) -> Result<bool> {
        let (index, _) = self.split(row)?;
        self.block_or_create(index).decompress()
    }

    pub fn stats(&self) -> VolumeStats {
        let blocks = self.blocks.read().clone();
        let mut stats = VolumeStats {
            blocks: blocks.len(),
            ..Default::default()
        };
        for block in blocks.iter() {
            if block.is_compressed() {
                stats.compressed_blocks += 1;
            }
            stats.bytes += block.byte_len();
            stats.raw_bytes += block.capacity_bytes();
        }
        stats
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("mode", &self.mode)
            .field("block_size", &self.block_size())
            .field("blocks", &self.block_count())
            .finish()
    }
}
