use super::{Extension, OwnerId, StoreId};
use crate::error::{Error, Result};
use crate::pool::{StringId, StringPool};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// The eight attribute kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Boolean,
    Discrete,
    Continuous,
    Timestamp,
    Literal,
    Id,
    List,
    Container,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeKind::Boolean => "boolean",
            AttributeKind::Discrete => "discrete",
            AttributeKind::Continuous => "continuous",
            AttributeKind::Timestamp => "timestamp",
            AttributeKind::Literal => "literal",
            AttributeKind::Id => "id",
            AttributeKind::List => "list",
            AttributeKind::Container => "container",
        };
        f.write_str(name)
    }
}

/// Attribute payload
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Boolean(bool),
    Discrete(i64),
    Continuous(f64),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    Literal(String),
    Id(Uuid),
    /// Key order of the list's child attributes (the children are meta-attributes)
    List(Vec<String>),
    /// Children live in the meta-attributes
    Container,
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Boolean(_) => AttributeKind::Boolean,
            AttributeValue::Discrete(_) => AttributeKind::Discrete,
            AttributeValue::Continuous(_) => AttributeKind::Continuous,
            AttributeValue::Timestamp(_) => AttributeKind::Timestamp,
            AttributeValue::Literal(_) => AttributeKind::Literal,
            AttributeValue::Id(_) => AttributeKind::Id,
            AttributeValue::List(_) => AttributeKind::List,
            AttributeValue::Container => AttributeKind::Container,
        }
    }

    /// Timestamp as a UTC date-time, if this is a timestamp in range
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Timestamp(millis) => Utc.timestamp_millis_opt(*millis).single(),
            _ => None,
        }
    }
}

/// Meta-attributes of an attribute
#[derive(Debug, Clone, Default)]
pub enum Meta {
    #[default]
    None,
    /// Owned children, written under a fresh nested owner when the attribute is stored
    Detached(Vec<Attribute>),
    /// Children already stored under this nested owner id
    Stored(OwnerId),
}

/// Where a materialized attribute came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Origin {
    pub store: StoreId,
    pub key: StringId,
}

/// Typed key/value pair
#[derive(Debug, Clone)]
pub struct Attribute {
    key: Arc<str>,
    value: AttributeValue,
    extension: Option<Extension>,
    meta: Meta,
    origin: Option<Origin>,
}

impl Attribute {
    pub fn new(key: impl Into<Arc<str>>, value: AttributeValue) -> Self {
        Self {
            key: key.into(),
            value,
            extension: None,
            meta: Meta::None,
            origin: None,
        }
    }

    pub fn literal(key: impl Into<Arc<str>>, value: impl Into<String>) -> Self {
        Self::new(key, AttributeValue::Literal(value.into()))
    }

    pub fn boolean(key: impl Into<Arc<str>>, value: bool) -> Self {
        Self::new(key, AttributeValue::Boolean(value))
    }

    pub fn discrete(key: impl Into<Arc<str>>, value: i64) -> Self {
        Self::new(key, AttributeValue::Discrete(value))
    }

    pub fn continuous(key: impl Into<Arc<str>>, value: f64) -> Self {
        Self::new(key, AttributeValue::Continuous(value))
    }

    pub fn timestamp(key: impl Into<Arc<str>>, value: DateTime<Utc>) -> Self {
        Self::new(key, AttributeValue::Timestamp(value.timestamp_millis()))
    }

    pub fn timestamp_millis(key: impl Into<Arc<str>>, millis: i64) -> Self {
        Self::new(key, AttributeValue::Timestamp(millis))
    }

    pub fn id(key: impl Into<Arc<str>>, value: Uuid) -> Self {
        Self::new(key, AttributeValue::Id(value))
    }

    /// Container whose children become meta-attributes
    pub fn container(key: impl Into<Arc<str>>, children: Vec<Attribute>) -> Self {
        Self::new(key, AttributeValue::Container).with_meta(children)
    }

    /// List whose element order is the order of `children`
    pub fn list(key: impl Into<Arc<str>>, children: Vec<Attribute>) -> Self {
        let order = children.iter().map(|c| c.key().to_string()).collect();
        Self::new(key, AttributeValue::List(order)).with_meta(children)
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_meta(mut self, children: Vec<Attribute>) -> Self {
        self.meta = Meta::Detached(children);
        self
    }

    pub(crate) fn materialized(
        key: Arc<str>,
        value: AttributeValue,
        extension: Option<Extension>,
        nested: Option<OwnerId>,
        origin: Origin,
    ) -> Self {
        Self {
            key,
            value,
            extension,
            meta: nested.map_or(Meta::None, Meta::Stored),
            origin: Some(origin),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn key_arc(&self) -> &Arc<str> {
        &self.key
    }

    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    pub fn into_value(self) -> AttributeValue {
        self.value
    }

    pub fn kind(&self) -> AttributeKind {
        self.value.kind()
    }

    pub fn extension(&self) -> Option<&Extension> {
        self.extension.as_ref()
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn has_meta(&self) -> bool {
        match &self.meta {
            Meta::None => false,
            Meta::Detached(children) => !children.is_empty(),
            Meta::Stored(_) => true,
        }
    }

    /// Nested owner id of stored meta-attributes
    pub fn nested_id(&self) -> Option<OwnerId> {
        match self.meta {
            Meta::Stored(id) => Some(id),
            _ => None,
        }
    }

    /// Interned key id, for attributes read from or adopted by a store
    pub fn key_id(&self) -> Option<StringId> {
        self.origin.map(|o| o.key)
    }

    pub(crate) fn origin(&self) -> Option<Origin> {
        self.origin
    }

    pub(crate) fn is_from(&self, store: StoreId) -> bool {
        self.origin.is_some_and(|o| o.store == store)
    }
}

/// Equality of key, value and extension; meta-attributes and origin are ignored
impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value && self.extension == other.extension
    }
}

/// Make `attribute` belong to `store`: intern its key and store detached meta-attributes
///
/// `write_meta` receives detached children and returns the nested owner id
/// they were written under. Stored meta of a foreign store cannot be
/// resolved and is dropped.
pub(crate) fn adopt(
    attribute: Attribute,
    store: StoreId,
    keys: &StringPool,
    write_meta: impl FnOnce(Vec<Attribute>) -> Result<OwnerId>,
) -> Result<Attribute> {
    if attribute.key.is_empty() {
        return Err(Error::InvalidArgument(
            "attribute key must not be empty".to_string(),
        ));
    }
    if attribute.is_from(store) {
        return Ok(attribute);
    }

    let key = keys.put(&attribute.key)?;
    let meta = match attribute.meta {
        Meta::None => Meta::None,
        Meta::Detached(children) if children.is_empty() => Meta::None,
        Meta::Detached(children) => Meta::Stored(write_meta(children)?),
        Meta::Stored(nested) => {
            warn!(
                key = %attribute.key,
                nested,
                "Dropping meta-attributes stored in another store; detach the attribute first"
            );
            Meta::None
        }
    };

    Ok(Attribute {
        key: attribute.key,
        value: attribute.value,
        extension: attribute.extension,
        meta,
        origin: Some(Origin { store, key }),
    })
}
