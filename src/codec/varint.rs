//! LEB128 varints, zig-zag signed mapping and length-prefixed strings

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

pub fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn get_varint(buf: &mut impl Buf) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(Error::Codec("Truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(Error::Codec("Varint overflows 64 bits".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::Codec("Varint overflows 64 bits".to_string()));
        }
    }
}

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn put_string(buf: &mut impl BufMut, value: &str) {
    put_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

pub fn get_string(buf: &mut impl Buf) -> Result<String> {
    let len = get_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::Codec(format!(
            "String of {} bytes truncated to {}",
            len,
            buf.remaining()
        )));
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::Codec(format!("Invalid UTF-8 in string: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_varint_sizes() -> Result<()> {
        for (value, len) in [(0u64, 1), (127, 1), (128, 2), (16_383, 2), (u64::MAX, 10)] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), len, "value {}", value);
            assert_eq!(get_varint(&mut buf.freeze())?, value);
        }
        Ok(())
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        for v in [i64::MIN, -7, 7, i64::MAX] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
    }

    #[test]
    fn test_truncated_input() {
        let mut data: &[u8] = &[0x80, 0x80];
        assert!(get_varint(&mut data).is_err());

        let mut data: &[u8] = &[5, b'a', b'b'];
        assert!(get_string(&mut data).is_err());

        let mut data: &[u8] = &[0xff; 11];
        assert!(get_varint(&mut data).is_err());
    }
}
