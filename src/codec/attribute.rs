//! Binary attribute encoding
//!
//! ```text
//! [meta][payload][extension index]?[nested owner id varint]?
//!
//! meta  bit 7  has nested owner
//!       bit 6  has extension
//!       bit 5  literal is a pool id
//!       0..4   type tag
//! ```
//!
//! | tag | kind          | payload                                  |
//! |-----|---------------|------------------------------------------|
//! | 0/1 | boolean       | none (tag is the value)                  |
//! | 2   | continuous    | 8-byte IEEE 754, big-endian              |
//! | 3   | discrete      | zig-zag varint                           |
//! | 4   | literal       | pool id varint, or length-prefixed UTF-8 |
//! | 5   | timestamp     | zig-zag varint of millis − reference     |
//! | 6   | id            | 16 bytes                                 |
//! | 7   | container     | none                                     |
//! | 8   | list          | varint count, length-prefixed keys       |

use super::varint::{get_string, get_varint, put_string, put_varint, unzigzag, zigzag};
use crate::error::{Error, Result};
use crate::model::{Attribute, AttributeValue, Extension, ExtensionRegistry, OwnerId};
use crate::pool::{StringId, StringPool, RESERVED_KEYS};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Subtracted from timestamps before encoding
pub const TIMESTAMP_REFERENCE: i64 = 946_684_800;

const TAG_TRUE: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_CONTINUOUS: u8 = 2;
const TAG_DISCRETE: u8 = 3;
const TAG_LITERAL: u8 = 4;
const TAG_TIMESTAMP: u8 = 5;
const TAG_ID: u8 = 6;
const TAG_CONTAINER: u8 = 7;
const TAG_LIST: u8 = 8;

const TAG_MASK: u8 = 0x1f;
const POOLED: u8 = 1 << 5;
const HAS_EXTENSION: u8 = 1 << 6;
const HAS_NESTED: u8 = 1 << 7;

/// Value, extension and nested owner read back from an encoding
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAttribute {
    pub value: AttributeValue,
    pub extension: Option<Extension>,
    pub nested: Option<OwnerId>,
}

pub struct AttributeCodec {
    literals: Arc<StringPool>,
    extensions: Arc<ExtensionRegistry>,
    pooled_keys: HashSet<StringId>,
}

impl AttributeCodec {
    pub fn new(
        literals: Arc<StringPool>,
        extensions: Arc<ExtensionRegistry>,
        pooled_keys: impl IntoIterator<Item = StringId>,
    ) -> Self {
        Self {
            literals,
            extensions,
            pooled_keys: pooled_keys.into_iter().collect(),
        }
    }

    /// Pools literals of `concept:name` and `lifecycle:transition`
    pub fn with_default_pooling(
        literals: Arc<StringPool>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        let pooled = ["concept:name", "lifecycle:transition"]
            .iter()
            .filter_map(|key| RESERVED_KEYS.iter().position(|r| r == key))
            .map(|i| i as StringId);
        Self::new(literals, extensions, pooled)
    }

    /// Whether literals of `key` go through the literal pool
    pub fn pools(&self, key: StringId) -> bool {
        self.pooled_keys.contains(&key)
    }

    pub fn encode(&self, attribute: &Attribute, pool_literal: bool) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(0);

        let mut meta = match attribute.value() {
            AttributeValue::Boolean(true) => TAG_TRUE,
            AttributeValue::Boolean(false) => TAG_FALSE,
            AttributeValue::Continuous(v) => {
                buf.put_f64(*v);
                TAG_CONTINUOUS
            }
            AttributeValue::Discrete(v) => {
                put_varint(&mut buf, zigzag(*v));
                TAG_DISCRETE
            }
            AttributeValue::Literal(s) if pool_literal => {
                put_varint(&mut buf, u64::from(self.literals.put(s)?));
                TAG_LITERAL | POOLED
            }
            AttributeValue::Literal(s) => {
                put_string(&mut buf, s);
                TAG_LITERAL
            }
            AttributeValue::Timestamp(millis) => {
                put_varint(&mut buf, zigzag(millis.wrapping_sub(TIMESTAMP_REFERENCE)));
                TAG_TIMESTAMP
            }
            AttributeValue::Id(id) => {
                buf.put_slice(id.as_bytes());
                TAG_ID
            }
            AttributeValue::Container => TAG_CONTAINER,
            AttributeValue::List(keys) => {
                put_varint(&mut buf, keys.len() as u64);
                for key in keys {
                    put_string(&mut buf, key);
                }
                TAG_LIST
            }
        };

        if let Some(extension) = attribute.extension() {
            buf.put_u8(self.extensions.index_of(extension)?);
            meta |= HAS_EXTENSION;
        }
        if let Some(nested) = attribute.nested_id() {
            put_varint(&mut buf, nested);
            meta |= HAS_NESTED;
        }
        buf[0] = meta;
        Ok(buf.freeze())
    }

    pub fn decode(&self, data: &[u8]) -> Result<DecodedAttribute> {
        let mut buf = data;
        if !buf.has_remaining() {
            return Err(Error::Codec("Empty attribute encoding".to_string()));
        }
        let meta = buf.get_u8();

        let value = match meta & TAG_MASK {
            TAG_TRUE => AttributeValue::Boolean(true),
            TAG_FALSE => AttributeValue::Boolean(false),
            TAG_CONTINUOUS => {
                require(&buf, 8, "continuous")?;
                AttributeValue::Continuous(buf.get_f64())
            }
            TAG_DISCRETE => AttributeValue::Discrete(unzigzag(get_varint(&mut buf)?)),
            TAG_LITERAL if meta & POOLED != 0 => {
                let id = get_varint(&mut buf)?;
                let literal = u32::try_from(id)
                    .ok()
                    .and_then(|id| self.literals.get_value(id))
                    .ok_or_else(|| Error::Codec(format!("Unknown literal id {}", id)))?;
                AttributeValue::Literal(literal.to_string())
            }
            TAG_LITERAL => AttributeValue::Literal(get_string(&mut buf)?),
            TAG_TIMESTAMP => AttributeValue::Timestamp(
                unzigzag(get_varint(&mut buf)?).wrapping_add(TIMESTAMP_REFERENCE),
            ),
            TAG_ID => {
                require(&buf, 16, "id")?;
                let mut bytes = [0u8; 16];
                buf.copy_to_slice(&mut bytes);
                AttributeValue::Id(Uuid::from_bytes(bytes))
            }
            TAG_CONTAINER => AttributeValue::Container,
            TAG_LIST => {
                let count = get_varint(&mut buf)? as usize;
                let mut keys = Vec::with_capacity(count.min(buf.remaining()));
                for _ in 0..count {
                    keys.push(get_string(&mut buf)?);
                }
                AttributeValue::List(keys)
            }
            tag => return Err(Error::Codec(format!("Unknown attribute type tag {}", tag))),
        };

        let extension = if meta & HAS_EXTENSION != 0 {
            require(&buf, 1, "extension index")?;
            let index = buf.get_u8();
            Some(
                self.extensions
                    .get(index)
                    .ok_or_else(|| Error::Codec(format!("Unknown extension index {}", index)))?,
            )
        } else {
            None
        };
        let nested = if meta & HAS_NESTED != 0 {
            Some(get_varint(&mut buf)?)
        } else {
            None
        };
        if buf.has_remaining() {
            return Err(Error::Codec(format!(
                "{} trailing bytes after attribute",
                buf.remaining()
            )));
        }

        Ok(DecodedAttribute {
            value,
            extension,
            nested,
        })
    }
}

fn require(buf: &&[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(Error::Codec(format!(
            "Truncated {} payload: need {} bytes, have {}",
            what,
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{adopt, StoreId};

    fn codec() -> AttributeCodec {
        AttributeCodec::with_default_pooling(
            Arc::new(StringPool::new()),
            Arc::new(ExtensionRegistry::new()),
        )
    }

    #[test]
    fn test_layout_of_simple_values() -> Result<()> {
        let codec = codec();
        assert_eq!(&codec.encode(&Attribute::boolean("b", true), false)?[..], &[TAG_TRUE]);
        assert_eq!(&codec.encode(&Attribute::discrete("d", -1), false)?[..], &[TAG_DISCRETE, 1]);
        assert_eq!(
            &codec.encode(&Attribute::literal("l", "ab"), false)?[..],
            &[TAG_LITERAL, 2, b'a', b'b']
        );
        assert_eq!(
            &codec.encode(&Attribute::timestamp_millis("t", TIMESTAMP_REFERENCE + 2), false)?[..],
            &[TAG_TIMESTAMP, 4]
        );
        Ok(())
    }

    #[test]
    fn test_extension_and_nested_flags() -> Result<()> {
        let codec = codec();
        let keys = StringPool::keys(None);
        let attribute = adopt(
            Attribute::literal("concept:name", "A")
                .with_extension(Extension::concept())
                .with_meta(vec![Attribute::boolean("x", true)]),
            StoreId::new(),
            &keys,
            |_| Ok(300),
        )?;

        let encoded = codec.encode(&attribute, true)?;
        assert_eq!(encoded[0], TAG_LITERAL | POOLED | HAS_EXTENSION | HAS_NESTED);
        let decoded = codec.decode(&encoded)?;
        assert_eq!(decoded.value, AttributeValue::Literal("A".to_string()));
        assert_eq!(decoded.extension, Some(Extension::concept()));
        assert_eq!(decoded.nested, Some(300));
        Ok(())
    }

    #[test]
    fn test_default_pooling() {
        let codec = codec();
        assert!(codec.pools(0));
        assert!(codec.pools(2));
        assert!(!codec.pools(1));
    }

    #[test]
    fn test_list_and_id() -> Result<()> {
        let codec = codec();
        let id = Uuid::new_v4();
        for value in [
            AttributeValue::Id(id),
            AttributeValue::List(vec!["a".into(), "".into(), "c".into()]),
            AttributeValue::Continuous(-0.125),
            AttributeValue::Container,
        ] {
            let encoded = codec.encode(&Attribute::new("k", value.clone()), false)?;
            assert_eq!(codec.decode(&encoded)?.value, value);
        }
        Ok(())
    }

    #[test]
    fn test_malformed_input() {
        let codec = codec();
        assert!(codec.decode(&[]).is_err());
        assert!(codec.decode(&[31]).is_err());
        assert!(codec.decode(&[TAG_CONTINUOUS, 1, 2]).is_err());
        assert!(codec.decode(&[TAG_TRUE, 0]).is_err());
        assert!(codec.decode(&[TAG_LITERAL | POOLED, 9]).is_err());
        assert!(codec.decode(&[TAG_TRUE | HAS_EXTENSION, 120]).is_err());
    }
}
