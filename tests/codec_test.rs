//! Binary attribute codec against the documented layout

use attrstore::codec::{AttributeCodec, CompositeKey, SnapshotHeader, TIMESTAMP_REFERENCE};
use attrstore::error::{Error, Result};
use attrstore::model::{AttributeValue, ExtensionRegistry};
use attrstore::{Attribute, Extension, StringPool};
use bytes::BytesMut;
use std::sync::Arc;
use uuid::Uuid;

fn codec() -> (AttributeCodec, Arc<StringPool>) {
    let literals = Arc::new(StringPool::new());
    let codec = AttributeCodec::with_default_pooling(
        literals.clone(),
        Arc::new(ExtensionRegistry::new()),
    );
    (codec, literals)
}

#[test]
fn test_every_kind_decodes_to_itself() -> Result<()> {
    let (codec, _) = codec();
    let values = [
        AttributeValue::Boolean(true),
        AttributeValue::Boolean(false),
        AttributeValue::Continuous(f64::MAX),
        AttributeValue::Discrete(i64::MIN),
        AttributeValue::Literal("héllo".to_string()),
        AttributeValue::Timestamp(TIMESTAMP_REFERENCE - 1),
        AttributeValue::Id(Uuid::new_v4()),
        AttributeValue::Container,
        AttributeValue::List(vec!["x".to_string(), "y".to_string()]),
    ];
    for value in values {
        let encoded = codec.encode(&Attribute::new("k", value.clone()), false)?;
        let decoded = codec.decode(&encoded)?;
        assert_eq!(decoded.value, value);
        assert_eq!(decoded.extension, None);
        assert_eq!(decoded.nested, None);
    }
    Ok(())
}

#[test]
fn test_pooled_literal_is_an_id() -> Result<()> {
    let (codec, literals) = codec();
    let attribute = Attribute::literal("concept:name", "register request")
        .with_extension(Extension::concept());
    let pooled = codec.encode(&attribute, true)?;
    let inline = codec.encode(&attribute, false)?;

    // meta byte, pool id 0, extension index 0
    assert_eq!(&pooled[..], &[0x64, 0, 0]);
    assert!(inline.len() > pooled.len());
    assert_eq!(literals.get_index("register request"), Some(0));
    assert_eq!(codec.decode(&pooled)?, codec.decode(&inline)?);
    Ok(())
}

#[test]
fn test_custom_extension_gets_next_index() -> Result<()> {
    let (codec, _) = codec();
    let org = Extension::new("Organizational", "org", "http://www.xes-standard.org/org.xesext");
    let encoded = codec.encode(&Attribute::boolean("org:x", true).with_extension(org.clone()), false)?;
    assert_eq!(&encoded[..], &[0x40, 5]);
    assert_eq!(codec.decode(&encoded)?.extension, Some(org));
    Ok(())
}

#[test]
fn test_corrupt_input_is_a_codec_error() {
    let (codec, _) = codec();
    for data in [&[][..], &[9][..], &[3, 0x80][..], &[6, 1, 2, 3][..]] {
        assert!(matches!(codec.decode(data), Err(Error::Codec(_))), "{:?}", data);
    }
}

#[test]
fn test_composite_keys_and_header() -> Result<()> {
    let key = CompositeKey::new(7 << 12, 42, 1 << 12)?;
    assert_eq!(key.owner(1 << 12), 7 << 12);
    assert_eq!(key.key(1 << 12), 42);

    let mut buf = BytesMut::new();
    SnapshotHeader::current().encode(&mut buf);
    assert_eq!(SnapshotHeader::decode(&mut buf.freeze())?, SnapshotHeader::current());
    Ok(())
}
