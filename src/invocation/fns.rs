// Free functions as invokables
//
// A registered function is journaled under a resource that carries only
// its qualified name, so two callables are the same exactly when their
// names hash the same. The body lives in the registry and is looked up at
// call time, which is also what lets replay re-enter a function loaded
// from the store.

use crate::condition::CallResult;
use crate::error::{ResourceError, Result};
use crate::invocation::builder;
use crate::invocation::{Invocation, Invokable};
use crate::registry::{RawFn, Registry};
use crate::resource::Resource;
use crate::types::TypeKey;
use crate::value::{FieldMap, Value};

/// The resource form of a registered free function.
#[derive(Clone, Debug, PartialEq)]
pub struct FnInvokable {
    pub name: String,
}

impl FnInvokable {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Resource for FnInvokable {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.invocation.FnInvokable")
    }

    fn field_names() -> &'static [&'static str] {
        &["name"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Str(self.name.clone())]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            name: fields.take_as("name")?,
        })
    }
}

impl Invokable for FnInvokable {
    type Input = Value;
    type Output = Value;

    fn call(&self, input: Value) -> CallResult<Value> {
        let body = Registry::global().function(&self.name)?;
        body(input)
    }
}

/// Register a free function as an invokable under a qualified name.
pub fn register_fn(name: impl Into<String>, body: RawFn) -> Result<()> {
    Ok(Registry::global().register_fn(name, body)?)
}

/// Tracked call of a registered function (see [`builder::call`]).
pub fn call_fn(name: &str, input: Value) -> CallResult<Value> {
    builder::call(&FnInvokable::named(name), input)
}

/// Top-level invoke of a registered function (see [`builder::invoke`]).
pub fn invoke_fn(name: &str, input: Value) -> Result<Invocation> {
    builder::invoke(&FnInvokable::named(name), input)
}
