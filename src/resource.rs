// The resource interface
//
// A resource is a typed record with named fields in declared order. Typed
// Rust structs implement [`Resource`]; the dynamic form used by the store
// and the journal is [`ResourceDict`]. The [`FieldValue`] trait is the
// boundary where plain Rust values become field values and back.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ResourceError;
use crate::types::TypeKey;
use crate::value::{FieldMap, ResourceDict, Value};

/// A typed, named-fields record; the atomic unit of persistence.
///
/// Two instances of the same type with equal field values are the same
/// resource: they pack to the same bytes and hash to the same digest.
pub trait Resource: Clone + fmt::Debug {
    /// The stable identity of this type.
    fn type_key() -> TypeKey
    where
        Self: Sized;

    /// Field names in declared order.
    fn field_names() -> &'static [&'static str]
    where
        Self: Sized;

    /// Field values aligned with [`field_names`](Resource::field_names).
    fn field_values(&self) -> Vec<Value>;

    /// Reconstruct an instance from a field mapping.
    fn from_fields(fields: &mut FieldMap) -> Result<Self, ResourceError>
    where
        Self: Sized;

    /// Decompose into the dynamic dict form.
    fn to_dict(&self) -> ResourceDict {
        let mut dict = ResourceDict::new(Self::type_key());
        for (name, value) in Self::field_names().iter().zip(self.field_values()) {
            dict.push_field(*name, value);
        }
        dict
    }

    /// Rebuild from the dynamic dict form, checking the type key.
    fn from_dict(dict: ResourceDict) -> Result<Self, ResourceError>
    where
        Self: Sized,
    {
        let expected = Self::type_key();
        if dict.type_key() != &expected {
            return Err(ResourceError::TypeMismatch {
                expected: expected.name,
                found: dict.type_key().name.clone(),
            });
        }
        Self::from_fields(&mut dict.into_field_map())
    }
}

/// Conversion between plain Rust values and the [`Value`] universe.
///
/// This is the typed rendition of the wrap/unwrap boundary: field accessors
/// see Rust types, the packer sees `Value`s.
pub trait FieldValue: Sized {
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Result<Self, ResourceError>;
}

fn unexpected(expected: &'static str, value: &Value) -> ResourceError {
    ResourceError::UnexpectedKind {
        expected,
        found: value.kind(),
    }
}

impl FieldValue for Value {
    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        Ok(value)
    }
}

impl FieldValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(unexpected("int", &other)),
        }
    }
}

impl FieldValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::Float(x) => Ok(x),
            other => Err(unexpected("float", &other)),
        }
    }
}

impl FieldValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(unexpected("bool", &other)),
        }
    }
}

impl FieldValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(unexpected("str", &other)),
        }
    }
}

impl FieldValue for TypeKey {
    fn into_value(self) -> Value {
        Value::TypeRef(self)
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::TypeRef(key) => Ok(key),
            other => Err(unexpected("type", &other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(inner) => inner.into_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::Null => Ok(None),
            other => Ok(Some(T::from_value(other)?)),
        }
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(FieldValue::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(unexpected("list", &other)),
        }
    }
}

impl<T: FieldValue> FieldValue for BTreeMap<String, T> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(key, value)| (key, value.into_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| Ok((key, T::from_value(value)?)))
                .collect(),
            other => Err(unexpected("map", &other)),
        }
    }
}

/// A resource of statically unknown type, carried in dict form.
///
/// Used wherever the journal handles values whose concrete type only the
/// registry knows: committed invokables, inputs, raised conditions.
#[derive(Clone, Debug, PartialEq)]
pub struct AnyResource(pub ResourceDict);

impl AnyResource {
    pub fn into_dict(self) -> ResourceDict {
        self.0
    }
}

impl Resource for AnyResource {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.resource.Any")
    }

    fn field_names() -> &'static [&'static str] {
        &[]
    }

    fn field_values(&self) -> Vec<Value> {
        self.0
            .fields()
            .iter()
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn from_fields(_fields: &mut FieldMap) -> Result<Self, ResourceError> {
        // Unreachable through the dict path; `from_dict` is overridden.
        Err(ResourceError::TypeMismatch {
            expected: "chronicle.resource.Any".to_string(),
            found: "field map".to_string(),
        })
    }

    // Any carries whatever dict it was given; no type check applies.
    fn to_dict(&self) -> ResourceDict {
        self.0.clone()
    }

    fn from_dict(dict: ResourceDict) -> Result<Self, ResourceError> {
        Ok(Self(dict))
    }
}

/// Lifts a bare [`Value`] into a committable resource.
///
/// Inputs and outputs of invocations are arbitrary field values; boxing
/// them gives them a digest and a place in the store.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueBox {
    pub wrapped: Value,
}

impl ValueBox {
    pub fn new(wrapped: Value) -> Self {
        Self { wrapped }
    }
}

impl Resource for ValueBox {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.resource.ValueBox")
    }

    fn field_names() -> &'static [&'static str] {
        &["wrapped"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![self.wrapped.clone()]
    }

    fn from_fields(fields: &mut FieldMap) -> Result<Self, ResourceError> {
        Ok(Self {
            wrapped: fields.take("wrapped")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
        label: Option<String>,
    }

    impl Resource for Point {
        fn type_key() -> TypeKey {
            TypeKey::new("tests.Point")
        }

        fn field_names() -> &'static [&'static str] {
            &["x", "y", "label"]
        }

        fn field_values(&self) -> Vec<Value> {
            vec![
                self.x.into_value(),
                self.y.into_value(),
                self.label.clone().into_value(),
            ]
        }

        fn from_fields(fields: &mut FieldMap) -> Result<Self, ResourceError> {
            Ok(Self {
                x: fields.take_as("x")?,
                y: fields.take_as("y")?,
                label: fields.take_as("label")?,
            })
        }
    }

    #[test]
    fn dict_round_trip() {
        let point = Point {
            x: 3,
            y: -4,
            label: Some("origin-ish".to_string()),
        };
        let dict = point.to_dict();
        assert_eq!(dict.type_key(), &TypeKey::new("tests.Point"));
        assert_eq!(Point::from_dict(dict).unwrap(), point);
    }

    #[test]
    fn from_dict_checks_type() {
        let dict = ResourceDict::new(TypeKey::new("tests.NotAPoint"));
        assert!(matches!(
            Point::from_dict(dict),
            Err(ResourceError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn option_fields_pack_to_null() {
        let point = Point {
            x: 0,
            y: 0,
            label: None,
        };
        let dict = point.to_dict();
        assert_eq!(dict.field("label"), Some(&Value::Null));
        assert_eq!(Point::from_dict(dict).unwrap().label, None);
    }

    #[test]
    fn any_resource_accepts_arbitrary_dicts() {
        let dict = ResourceDict::new(TypeKey::new("tests.Whatever"))
            .with_field("n", Value::Int(1));
        let any = AnyResource::from_dict(dict.clone()).unwrap();
        assert_eq!(any.to_dict(), dict);
    }
}
