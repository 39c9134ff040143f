use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Highest extension index the binary codec can address
pub const MAX_EXTENSION_INDEX: u8 = 127;

/// Named vocabulary an attribute key belongs to, identified by its URI
#[derive(Clone)]
pub struct Extension(Arc<Definition>);

struct Definition {
    name: String,
    prefix: String,
    uri: String,
}

impl Extension {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self(Arc::new(Definition {
            name: name.into(),
            prefix: prefix.into(),
            uri: uri.into(),
        }))
    }

    pub fn concept() -> Self {
        Self::new("Concept", "concept", "http://www.xes-standard.org/concept.xesext")
    }

    pub fn time() -> Self {
        Self::new("Time", "time", "http://www.xes-standard.org/time.xesext")
    }

    pub fn lifecycle() -> Self {
        Self::new("Lifecycle", "lifecycle", "http://www.xes-standard.org/lifecycle.xesext")
    }

    pub fn alignment() -> Self {
        Self::new("Alignment", "alignment", "http://www.xes-standard.org/alignment.xesext")
    }

    pub fn data_alignment() -> Self {
        Self::new(
            "DataAlignment",
            "dataalignment",
            "http://www.xes-standard.org/dataalignment.xesext",
        )
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn prefix(&self) -> &str {
        &self.0.prefix
    }

    pub fn uri(&self) -> &str {
        &self.0.uri
    }
}

impl PartialEq for Extension {
    fn eq(&self, other: &Self) -> bool {
        self.uri() == other.uri()
    }
}

impl Eq for Extension {}

impl std::hash::Hash for Extension {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uri().hash(state);
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("prefix", &self.prefix())
            .field("uri", &self.uri())
            .finish()
    }
}

/// Assigns stable small indices to extensions (per store)
#[derive(Debug)]
pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Extension>>,
}

impl ExtensionRegistry {
    /// Registry pre-seeded with the standard extensions
    pub fn new() -> Self {
        Self {
            extensions: RwLock::new(vec![
                Extension::concept(),
                Extension::time(),
                Extension::lifecycle(),
                Extension::alignment(),
                Extension::data_alignment(),
            ]),
        }
    }

    /// Index of `extension`, registering it if unknown
    pub fn index_of(&self, extension: &Extension) -> Result<u8> {
        if let Some(i) = self.extensions.read().iter().position(|e| e == extension) {
            return Ok(i as u8);
        }
        let mut extensions = self.extensions.write();
        if let Some(i) = extensions.iter().position(|e| e == extension) {
            return Ok(i as u8);
        }
        if extensions.len() > MAX_EXTENSION_INDEX as usize {
            return Err(Error::Codec(format!(
                "Too many extensions: {} cannot be registered",
                extension.uri()
            )));
        }
        extensions.push(extension.clone());
        Ok((extensions.len() - 1) as u8)
    }

    pub fn get(&self, index: u8) -> Option<Extension> {
        self.extensions.read().get(index as usize).cloned()
    }

    /// Registered extensions in index order
    pub fn list(&self) -> Vec<Extension> {
        self.extensions.read().clone()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_uri() {
        let a = Extension::concept();
        let b = Extension::new("Other", "x", "http://www.xes-standard.org/concept.xesext");
        assert_eq!(a, b);
        assert_ne!(a, Extension::time());
    }

    #[test]
    fn test_registry_indices() -> Result<()> {
        let registry = ExtensionRegistry::new();
        assert_eq!(registry.index_of(&Extension::concept())?, 0);
        let org = Extension::new("Organizational", "org", "http://www.xes-standard.org/org.xesext");
        let index = registry.index_of(&org)?;
        assert_eq!(index, 5);
        assert_eq!(registry.index_of(&org)?, index);
        assert_eq!(registry.get(index), Some(org));
        Ok(())
    }

    #[test]
    fn test_registry_limit() {
        let registry = ExtensionRegistry::new();
        for i in 0..123 {
            let ext = Extension::new("e", "e", format!("urn:ext:{}", i));
            assert!(registry.index_of(&ext).is_ok());
        }
        let overflow = Extension::new("e", "e", "urn:ext:overflow");
        assert!(matches!(registry.index_of(&overflow), Err(Error::Codec(_))));
    }
}
