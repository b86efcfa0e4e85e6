// Raised conditions
//
// A condition is any resource raised by user code during an invocation. It
// is journaled like every other value: committed to the store, referenced
// from the response that recorded it, and re-raised on replay unless an
// override substitutes a value.

use std::fmt;

use crate::error::{Error, PackingError, RegistryError, ResourceError, StorageError};
use crate::resource::Resource;
use crate::types::TypeKey;
use crate::value::{FieldMap, ResourceDict, Value};

/// A raised condition, carried in dict form so arbitrary registered types
/// can travel through the journal.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    dict: ResourceDict,
}

impl Condition {
    /// Raise a typed resource as a condition.
    pub fn new<T: Resource>(value: &T) -> Self {
        Self { dict: value.to_dict() }
    }

    /// Raise a plain error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(&RaisedError {
            message: message.into(),
        })
    }

    /// The cancellation condition.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(&Cancelled {
            reason: reason.into(),
        })
    }

    pub fn from_dict(dict: ResourceDict) -> Self {
        Self { dict }
    }

    pub fn type_key(&self) -> &TypeKey {
        self.dict.type_key()
    }

    pub fn dict(&self) -> &ResourceDict {
        &self.dict
    }

    pub fn into_dict(self) -> ResourceDict {
        self.dict
    }

    /// Whether this condition carries a resource of type `T`.
    pub fn is<T: Resource>(&self) -> bool {
        self.dict.type_key() == &T::type_key()
    }

    /// Recover the typed resource this condition carries.
    pub fn downcast<T: Resource>(&self) -> Option<T> {
        T::from_dict(self.dict.clone()).ok()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dict)
    }
}

/// Error type for tracked call bodies.
///
/// `Raised` is a domain condition: it is committed to the journal and
/// propagates to the caller as a recorded raise. `Fault` is a failure of
/// the framework itself (store I/O, packing, divergence); it aborts
/// journaling and surfaces as a plain error.
#[derive(Debug)]
pub enum CallError {
    Raised(Condition),
    Fault(Error),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Raised(condition) => write!(f, "raised {}", condition),
            CallError::Fault(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CallError {}

impl From<Condition> for CallError {
    fn from(condition: Condition) -> Self {
        CallError::Raised(condition)
    }
}

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        CallError::Fault(err)
    }
}

impl From<ResourceError> for CallError {
    fn from(err: ResourceError) -> Self {
        CallError::Fault(err.into())
    }
}

impl From<RegistryError> for CallError {
    fn from(err: RegistryError) -> Self {
        CallError::Fault(err.into())
    }
}

impl From<PackingError> for CallError {
    fn from(err: PackingError) -> Self {
        CallError::Fault(err.into())
    }
}

impl From<StorageError> for CallError {
    fn from(err: StorageError) -> Self {
        CallError::Fault(err.into())
    }
}

/// Result alias for invokable bodies.
pub type CallResult<T> = std::result::Result<T, CallError>;

/// A free-form error condition, the default wrapper for failures that have
/// no dedicated resource type.
#[derive(Clone, Debug, PartialEq)]
pub struct RaisedError {
    pub message: String,
}

impl Resource for RaisedError {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.condition.RaisedError")
    }

    fn field_names() -> &'static [&'static str] {
        &["message"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Str(self.message.clone())]
    }

    fn from_fields(fields: &mut FieldMap) -> Result<Self, ResourceError> {
        Ok(Self {
            message: fields.take_as("message")?,
        })
    }
}

/// Raised inside a body when its invocation is cancelled. The partial
/// invocation finalizes with this condition as an origin raise.
#[derive(Clone, Debug, PartialEq)]
pub struct Cancelled {
    pub reason: String,
}

impl Resource for Cancelled {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.condition.Cancelled")
    }

    fn field_names() -> &'static [&'static str] {
        &["reason"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Str(self.reason.clone())]
    }

    fn from_fields(fields: &mut FieldMap) -> Result<Self, ResourceError> {
        Ok(Self {
            reason: fields.take_as("reason")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_recovers_typed_condition() {
        let condition = Condition::error("boom");
        assert!(condition.is::<RaisedError>());
        assert!(!condition.is::<Cancelled>());
        assert_eq!(
            condition.downcast::<RaisedError>().unwrap().message,
            "boom"
        );
        assert!(condition.downcast::<Cancelled>().is_none());
    }
}
