//! Versioned snapshot framing
//!
//! ```text
//! [version u32 BE][manifest len u32 LE][manifest JSON][record count varint]
//! ([composite key u64 BE][len varint][encoded attribute])*
//! [checksum u32 LE]
//! ```
//!
//! The checksum XORs every byte between the header and itself.

use super::varint::{get_varint, put_varint};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Leading version tag of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u32,
}

impl SnapshotHeader {
    pub const LEN: usize = 4;

    pub fn current() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.version);
    }

    /// Read a header, rejecting any version but the current one
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::LEN {
            return Err(Error::Codec("Snapshot too short for header".to_string()));
        }
        let version = buf.get_u32();
        if version != SNAPSHOT_VERSION {
            return Err(Error::Format {
                expected: SNAPSHOT_VERSION,
                actual: version,
            });
        }
        Ok(Self { version })
    }
}

/// Decoded snapshot contents
#[derive(Debug)]
pub struct SnapshotFrame {
    pub manifest: Bytes,
    pub records: Vec<(u64, Bytes)>,
}

fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc ^ u32::from(b))
}

pub fn write_snapshot<'a>(
    manifest: &[u8],
    records: impl ExactSizeIterator<Item = (u64, &'a [u8])>,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(manifest.len() + 64);
    SnapshotHeader::current().encode(&mut buf);
    buf.put_u32_le(manifest.len() as u32);
    buf.put_slice(manifest);
    put_varint(&mut buf, records.len() as u64);
    for (key, value) in records {
        buf.put_u64(key);
        put_varint(&mut buf, value.len() as u64);
        buf.put_slice(value);
    }
    let sum = checksum(&buf[SnapshotHeader::LEN..]);
    buf.put_u32_le(sum);
    buf.freeze()
}

pub fn read_snapshot(data: &[u8]) -> Result<SnapshotFrame> {
    let mut header = data;
    SnapshotHeader::decode(&mut header)?;
    if data.len() < SnapshotHeader::LEN + 4 + 4 {
        return Err(Error::Codec("Snapshot truncated".to_string()));
    }

    let (body, mut trailer) =
        data[SnapshotHeader::LEN..].split_at(data.len() - SnapshotHeader::LEN - 4);
    let stored = trailer.get_u32_le();
    let computed = checksum(body);
    if stored != computed {
        return Err(Error::Codec(format!(
            "Snapshot checksum mismatch: stored {:#x}, computed {:#x}",
            stored, computed
        )));
    }

    let mut buf = Bytes::copy_from_slice(body);
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(Error::Codec(format!(
            "Incomplete manifest: expected {} bytes, got {}",
            len,
            buf.remaining()
        )));
    }
    let manifest = buf.split_to(len);

    let count = get_varint(&mut buf)? as usize;
    let mut records = Vec::with_capacity(count.min(buf.remaining() / 9));
    for _ in 0..count {
        if buf.remaining() < 8 {
            return Err(Error::Codec("Truncated snapshot record key".to_string()));
        }
        let key = buf.get_u64();
        let len = get_varint(&mut buf)? as usize;
        if buf.remaining() < len {
            return Err(Error::Codec("Truncated snapshot record".to_string()));
        }
        records.push((key, buf.split_to(len)));
    }
    if buf.has_remaining() {
        return Err(Error::Codec(format!(
            "{} trailing bytes in snapshot",
            buf.remaining()
        )));
    }
    Ok(SnapshotFrame { manifest, records })
}
