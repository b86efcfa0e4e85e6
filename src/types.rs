// Type identity for resources
//
// Every resource type has a `TypeKey`: a qualified name plus an optional
// distribution key identifying the packaged release a type ships in. The
// JSON rendering of a type key is its `TypeId`, the stable string used for
// registry lookups and the packed wire form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PackingError;

/// Identifies a versioned distribution a type is defined in.
///
/// Absent means "whatever definition the ambient process carries".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DistributionKey {
    pub name: String,
    pub version: String,
}

impl DistributionKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// The identity of a resource type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey {
    /// Fully qualified type name, e.g. `chronicle.invocation.Request`.
    pub name: String,
    /// Optional distribution namespace.
    pub distribution_key: Option<DistributionKey>,
}

impl TypeKey {
    /// A type key with no distribution namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            distribution_key: None,
        }
    }

    /// A type key scoped to a distribution.
    pub fn with_distribution(name: impl Into<String>, key: DistributionKey) -> Self {
        Self {
            name: name.into(),
            distribution_key: Some(key),
        }
    }

    /// The canonical string identifier for this type.
    ///
    /// Field order in the JSON object is fixed by declaration order, so the
    /// encoding is deterministic across processes.
    pub fn type_id(&self) -> TypeId {
        // Serialization of a struct with string/option fields cannot fail.
        TypeId(serde_json::to_string(self).expect("type key serialization is infallible"))
    }

    /// Parse a type key back out of its JSON identifier.
    pub fn from_type_id(id: &str) -> Result<Self, PackingError> {
        serde_json::from_str(id).map_err(|_| PackingError::MalformedTypeId(id.to_string()))
    }
}

impl fmt::Display for TypeKey {
    // Display shows the bare name; the distribution key only matters for
    // identity, not for rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.distribution_key {
            Some(key) => write!(f, "{} ({}@{})", self.name, key.name, key.version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The canonical JSON text identifying a type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(String);

impl TypeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_id_is_stable_json() {
        let key = TypeKey::new("tests.MyResource");
        assert_eq!(
            key.type_id().as_str(),
            r#"{"name":"tests.MyResource","distribution_key":null}"#
        );
    }

    #[test]
    fn type_id_round_trips() {
        let key = TypeKey::with_distribution(
            "tests.MyResource",
            DistributionKey::new("mypkg", "1.2.0"),
        );
        let id = key.type_id();
        assert_eq!(TypeKey::from_type_id(id.as_str()).unwrap(), key);
    }

    #[test]
    fn distribution_key_distinguishes_types() {
        let bare = TypeKey::new("tests.MyResource");
        let dist = TypeKey::with_distribution(
            "tests.MyResource",
            DistributionKey::new("mypkg", "1.2.0"),
        );
        assert_ne!(bare.type_id(), dist.type_id());
    }
}
