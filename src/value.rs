// The field value universe
//
// `Value` is the closed set of things a resource field can hold. It is
// modeled as a tagged sum rather than an open hierarchy: the packer, the
// registry and the replay engine all match exhaustively over it.

use std::collections::BTreeMap;
use std::fmt;

use crate::digest::Digest;
use crate::error::ResourceError;
use crate::types::TypeKey;

/// An untyped reference embedded in a field value: just the target digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefValue {
    pub digest: Digest,
}

impl RefValue {
    pub fn new(digest: Digest) -> Self {
        Self { digest }
    }
}

impl fmt::Debug for RefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefValue({})", self.digest)
    }
}

/// A recursive field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The single null value.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// An ordered sequence of values.
    List(Vec<Value>),
    /// A string-keyed mapping. Key order is canonical by construction.
    Map(BTreeMap<String, Value>),
    /// A nested resource, carried inline in dict form.
    Resource(Box<ResourceDict>),
    /// A reference to a registered type.
    TypeRef(TypeKey),
    /// A reference into a store.
    Ref(RefValue),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Resource(_) => "resource",
            Value::TypeRef(_) => "type",
            Value::Ref(_) => "ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Wrap a resource dict as a value.
    pub fn resource(dict: ResourceDict) -> Self {
        Value::Resource(Box::new(dict))
    }
}

impl fmt::Display for Value {
    /// Compact, JSON-ish rendering for summaries and error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Resource(dict) => write!(f, "{}", dict),
            Value::TypeRef(key) => write!(f, "<type {}>", key),
            Value::Ref(r) => write!(f, "<ref {}>", r.digest),
        }
    }
}

/// The dynamic form of a resource: its type plus named fields in declared
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDict {
    type_key: TypeKey,
    fields: Vec<(String, Value)>,
}

impl ResourceDict {
    pub fn new(type_key: TypeKey) -> Self {
        Self {
            type_key,
            fields: Vec::new(),
        }
    }

    /// Append a field, preserving declaration order.
    pub fn push_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Builder-style variant of [`push_field`](Self::push_field).
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push_field(name, value);
        self
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Consume into a by-name mapping for reconstruction.
    pub fn into_field_map(self) -> FieldMap {
        FieldMap {
            type_name: self.type_key.name,
            fields: self.fields.into_iter().collect(),
        }
    }
}

impl fmt::Display for ResourceDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_key)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

/// Field values keyed by name, consumed while reconstructing a resource.
#[derive(Debug)]
pub struct FieldMap {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl FieldMap {
    /// Remove and return a field, failing if it is absent.
    pub fn take(&mut self, name: &'static str) -> Result<Value, ResourceError> {
        self.fields
            .remove(name)
            .ok_or_else(|| ResourceError::MissingField {
                type_name: self.type_name.clone(),
                field: name,
            })
    }

    /// Remove a field and convert it to a typed value.
    pub fn take_as<T: crate::resource::FieldValue>(
        &mut self,
        name: &'static str,
    ) -> Result<T, ResourceError> {
        T::from_value(self.take(name)?)
    }
}
