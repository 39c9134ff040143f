//! Fixed-size block of rows
//!
//! # Layout
//!
//! ```text
//! [marker: 1 byte][payload: mode bits × rows / 8][flags: rows / 4]
//!
//! marker   0 = raw, 1 = compressed (the rest of the buffer is a zstd frame)
//! payload  row r at offset r << mode shift (booleans: byte r >> 3, bit r & 7)
//! flags    row r uses bits 2(r & 3) (exists) and 2(r & 3) + 1 (has nested)
//!          of byte r >> 2
//! ```
//!
//! All access goes through the block mutex. A compressed block is inflated
//! in place the first time it is locked, and compression swaps the whole
//! buffer under the same mutex, so a reader never sees a half-converted
//! block. Multi-byte values are big-endian.

use super::compression::{self, Compression};
use super::mode::Mode;
use crate::error::Result;
use parking_lot::{Mutex, MutexGuard};

const RAW: u8 = 0;
const COMPRESSED: u8 = 1;

const EXISTS: usize = 0;
const NESTED: usize = 1;

/// Flag bits of every "exists" flag in one flag byte
const EXISTS_MASK: u8 = 0b0101_0101;

pub struct Block {
    mode: Mode,
    block_size: usize,
    compression: Compression,
    bytes: Mutex<Vec<u8>>,
}

impl Block {
    pub fn new(mode: Mode, block_size: usize, compression: Compression) -> Self {
        let len = 1 + mode.value_bytes(block_size) + Mode::flag_bytes(block_size);
        Self {
            mode,
            block_size,
            compression,
            bytes: Mutex::new(vec![RAW; len]),
        }
    }

    fn raw_len(&self) -> usize {
        1 + self.mode.value_bytes(self.block_size) + Mode::flag_bytes(self.block_size)
    }

    /// Lock the block for reading or writing, inflating it first if needed
    pub fn lock(&self) -> Result<BlockGuard<'_>> {
        let mut bytes = self.bytes.lock();
        if bytes[0] == COMPRESSED {
            self.inflate(&mut bytes)?;
        }
        Ok(BlockGuard {
            mode: self.mode,
            value_bytes: self.mode.value_bytes(self.block_size),
            bytes,
        })
    }

    /// Compress the block; `false` when disabled, already compressed, or not smaller
    pub fn compress(&self) -> Result<bool> {
        if !self.compression.is_enabled() {
            return Ok(false);
        }
        let mut bytes = self.bytes.lock();
        if bytes[0] == COMPRESSED {
            return Ok(false);
        }
        let packed = compression::compress(&bytes[1..], self.compression)?;
        if packed.len() + 1 >= bytes.len() {
            return Ok(false);
        }
        let mut buffer = Vec::with_capacity(packed.len() + 1);
        buffer.push(COMPRESSED);
        buffer.extend_from_slice(&packed);
        *bytes = buffer;
        Ok(true)
    }

    /// Inflate a compressed block; `false` when it was raw already
    pub fn decompress(&self) -> Result<bool> {
        let mut bytes = self.bytes.lock();
        if bytes[0] != COMPRESSED {
            return Ok(false);
        }
        self.inflate(&mut bytes)?;
        Ok(true)
    }

    fn inflate(&self, bytes: &mut MutexGuard<'_, Vec<u8>>) -> Result<()> {
        let payload = compression::decompress(&bytes[1..], self.compression, self.raw_len() - 1)?;
        let mut buffer = Vec::with_capacity(payload.len() + 1);
        buffer.push(RAW);
        buffer.extend_from_slice(&payload);
        **bytes = buffer;
        Ok(())
    }

    pub fn is_compressed(&self) -> bool {
        self.bytes.lock()[0] == COMPRESSED
    }

    /// Bytes currently held, compressed or not
    pub fn byte_len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Uncompressed size
    pub fn capacity_bytes(&self) -> usize {
        self.raw_len()
    }

    /// Whether any row of the block holds a value
    pub fn has_values(&self) -> Result<bool> {
        Ok(self.lock()?.any_exists())
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("mode", &self.mode)
            .field("block_size", &self.block_size)
            .field("compressed", &self.is_compressed())
            .finish()
    }
}

/// Exclusive, inflated view of a block; rows are block-relative
pub struct BlockGuard<'a> {
    mode: Mode,
    value_bytes: usize,
    bytes: MutexGuard<'a, Vec<u8>>,
}

impl BlockGuard<'_> {
    fn flag_position(&self, row: usize, flag: usize) -> (usize, u8) {
        let byte = 1 + self.value_bytes + (row >> 2);
        let bit = ((row & 3) << 1) + flag;
        (byte, 1 << bit)
    }

    fn flag(&self, row: usize, flag: usize) -> bool {
        let (byte, mask) = self.flag_position(row, flag);
        self.bytes[byte] & mask != 0
    }

    fn set_flag(&mut self, row: usize, flag: usize, value: bool) {
        let (byte, mask) = self.flag_position(row, flag);
        if value {
            self.bytes[byte] |= mask;
        } else {
            self.bytes[byte] &= !mask;
        }
    }

    pub fn exists(&self, row: usize) -> bool {
        self.flag(row, EXISTS)
    }

    pub fn has_nested(&self, row: usize) -> bool {
        self.flag(row, NESTED)
    }

    /// Mark a row present; call after its payload is written
    pub fn mark(&mut self, row: usize, nested: bool) {
        self.set_flag(row, EXISTS, true);
        self.set_flag(row, NESTED, nested);
    }

    /// Clear both flags of a row
    pub fn unmark(&mut self, row: usize) {
        self.set_flag(row, EXISTS, false);
        self.set_flag(row, NESTED, false);
    }

    pub fn any_exists(&self) -> bool {
        let flags = 1 + self.value_bytes;
        self.bytes[flags..].iter().any(|b| b & EXISTS_MASK != 0)
    }

    fn read<const N: usize>(&self, row: usize) -> [u8; N] {
        let at = 1 + self.mode.offset(row);
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.bytes[at..at + N]);
        buf
    }

    fn write(&mut self, row: usize, data: &[u8]) {
        let at = 1 + self.mode.offset(row);
        self.bytes[at..at + data.len()].copy_from_slice(data);
    }

    pub fn get_bool(&self, row: usize) -> bool {
        self.bytes[1 + (row >> 3)] & (1 << (row & 7)) != 0
    }

    pub fn put_bool(&mut self, row: usize, value: bool) {
        let byte = 1 + (row >> 3);
        let mask = 1 << (row & 7);
        if value {
            self.bytes[byte] |= mask;
        } else {
            self.bytes[byte] &= !mask;
        }
    }

    pub fn get_int(&self, row: usize) -> i32 {
        i32::from_be_bytes(self.read(row))
    }

    pub fn put_int(&mut self, row: usize, value: i32) {
        self.write(row, &value.to_be_bytes());
    }

    pub fn get_long(&self, row: usize) -> i64 {
        i64::from_be_bytes(self.read(row))
    }

    pub fn put_long(&mut self, row: usize, value: i64) {
        self.write(row, &value.to_be_bytes());
    }

    pub fn get_uuid(&self, row: usize) -> u128 {
        u128::from_be_bytes(self.read(row))
    }

    pub fn put_uuid(&mut self, row: usize, value: u128) {
        self.write(row, &value.to_be_bytes());
    }
}
