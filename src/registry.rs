// The process-wide type registry
//
// The registry maps type-ids to descriptors so packed resources can be
// checked at unpack time, foreign values can be wrapped table-driven, and
// invokables loaded from the store by digest can be dispatched back into
// executable code.

use std::any::{self, Any};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use futures::future::BoxFuture;

use crate::condition::{CallResult, Cancelled, RaisedError};
use crate::error::{Error, RegistryError, ResourceError};
use crate::invocation::fns::FnInvokable;
use crate::invocation::input::{InputRequest, RequestInput};
use crate::invocation::{AsyncInvokable, Invocation, Invokable, Request, Response};
use crate::resource::{AnyResource, FieldValue, Resource, ValueBox};
use crate::types::{TypeId, TypeKey};
use crate::value::{ResourceDict, Value};

/// What the registry knows about a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub type_key: TypeKey,
    pub field_names: Vec<String>,
    /// Name of the foreign type this resource wraps, if it is a wrapper.
    pub wraps: Option<&'static str>,
}

/// Dispatch shim for a registered sync invokable.
pub type InvokeFn = fn(&ResourceDict, Value) -> CallResult<Value>;

/// Dispatch shim for a registered async invokable.
pub type AsyncInvokeFn = fn(ResourceDict, Value) -> BoxFuture<'static, CallResult<Value>>;

/// Body of a registered free function.
pub type RawFn = fn(Value) -> CallResult<Value>;

/// A resource type that wraps a foreign Rust type, so foreign values can
/// cross the model boundary.
pub trait ResourceWrapper: Resource {
    type Wrapped: 'static;

    fn wrap(value: &Self::Wrapped) -> Self;
    fn unwrap(&self) -> Result<Self::Wrapped, ResourceError>;
}

struct WrapperSpec {
    wrapped: any::TypeId,
    wrapped_name: &'static str,
    wrap: fn(&dyn Any) -> Result<ResourceDict, Error>,
    unwrap: fn(&ResourceDict) -> Result<Box<dyn Any>, Error>,
}

struct TypeEntry {
    descriptor: TypeDescriptor,
    wrapper: Option<WrapperSpec>,
    invoke: Option<InvokeFn>,
    invoke_async: Option<AsyncInvokeFn>,
}

#[derive(Default)]
struct Inner {
    types: HashMap<TypeId, TypeEntry>,
    /// Foreign type -> type-id of its registered wrapper.
    wrappers: HashMap<any::TypeId, TypeId>,
    fns: HashMap<String, RawFn>,
    allow_reregistration: bool,
}

/// The registry of resource types, wrappers and invokables.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// The process-wide registry, with the framework's built-in types
    /// already registered.
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            let registry = Registry::new();
            registry
                .register_builtins()
                .expect("built-in type registration cannot conflict");
            registry
        })
    }

    fn register_builtins(&self) -> Result<(), RegistryError> {
        self.register::<AnyResource>()?;
        self.register::<ValueBox>()?;
        self.register::<Request>()?;
        self.register::<Response>()?;
        self.register::<Invocation>()?;
        self.register::<RaisedError>()?;
        self.register::<Cancelled>()?;
        self.register::<InputRequest>()?;
        self.register_invokable::<RequestInput>()?;
        self.register_invokable::<FnInvokable>()?;
        Ok(())
    }

    fn descriptor_of<T: Resource>() -> TypeDescriptor {
        TypeDescriptor {
            type_key: T::type_key(),
            field_names: T::field_names().iter().map(|s| s.to_string()).collect(),
            wraps: None,
        }
    }

    fn insert(&self, descriptor: TypeDescriptor, entry_init: TypeEntry) -> Result<(), RegistryError> {
        let type_id = descriptor.type_key.type_id();
        let mut inner = self.inner.write().unwrap();
        let allow_reregistration = inner.allow_reregistration;
        match inner.types.entry(type_id) {
            Entry::Vacant(slot) => {
                slot.insert(entry_init);
                Ok(())
            }
            Entry::Occupied(mut slot) => {
                if slot.get().descriptor != descriptor && !allow_reregistration {
                    return Err(RegistryError::Conflict(slot.key().as_str().to_string()));
                }
                // Idempotent re-registration may add capabilities the first
                // registration lacked.
                let existing = slot.get_mut();
                existing.descriptor = descriptor;
                if existing.invoke.is_none() {
                    existing.invoke = entry_init.invoke;
                }
                if existing.invoke_async.is_none() {
                    existing.invoke_async = entry_init.invoke_async;
                }
                if existing.wrapper.is_none() {
                    existing.wrapper = entry_init.wrapper;
                }
                Ok(())
            }
        }
    }

    /// Register a plain resource type.
    pub fn register<T: Resource>(&self) -> Result<(), RegistryError> {
        let descriptor = Self::descriptor_of::<T>();
        self.insert(
            descriptor.clone(),
            TypeEntry {
                descriptor,
                wrapper: None,
                invoke: None,
                invoke_async: None,
            },
        )
    }

    /// Register an invokable resource type, recording its dispatch shim.
    pub fn register_invokable<F: Invokable + 'static>(&self) -> Result<(), RegistryError> {
        let descriptor = Self::descriptor_of::<F>();
        self.insert(
            descriptor.clone(),
            TypeEntry {
                descriptor,
                wrapper: None,
                invoke: Some(invoke_shim::<F>),
                invoke_async: None,
            },
        )
    }

    /// Register an async invokable resource type.
    pub fn register_async_invokable<F: AsyncInvokable + 'static>(
        &self,
    ) -> Result<(), RegistryError> {
        let descriptor = Self::descriptor_of::<F>();
        self.insert(
            descriptor.clone(),
            TypeEntry {
                descriptor,
                wrapper: None,
                invoke: None,
                invoke_async: Some(async_invoke_shim::<F>),
            },
        )
    }

    /// Register a wrapper resource for its foreign type.
    pub fn register_wrapper<W: ResourceWrapper + 'static>(&self) -> Result<(), RegistryError> {
        let mut descriptor = Self::descriptor_of::<W>();
        descriptor.wraps = Some(any::type_name::<W::Wrapped>());
        let type_id = descriptor.type_key.type_id();
        self.insert(
            descriptor.clone(),
            TypeEntry {
                descriptor,
                wrapper: Some(WrapperSpec {
                    wrapped: any::TypeId::of::<W::Wrapped>(),
                    wrapped_name: any::type_name::<W::Wrapped>(),
                    wrap: wrap_shim::<W>,
                    unwrap: unwrap_shim::<W>,
                }),
                invoke: None,
                invoke_async: None,
            },
        )?;
        let mut inner = self.inner.write().unwrap();
        inner.wrappers.insert(any::TypeId::of::<W::Wrapped>(), type_id);
        Ok(())
    }

    /// Register a free function under a qualified name.
    pub fn register_fn(&self, name: impl Into<String>, body: RawFn) -> Result<(), RegistryError> {
        let name = name.into();
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner.fns.get(&name) {
            if *existing != body && !inner.allow_reregistration {
                return Err(RegistryError::Conflict(name));
            }
        }
        inner.fns.insert(name, body);
        Ok(())
    }

    /// Permit re-registration with a different descriptor. Off by default.
    pub fn set_allow_reregistration(&self, allow: bool) {
        self.inner.write().unwrap().allow_reregistration = allow;
    }

    /// Look up a type descriptor by id.
    pub fn lookup(&self, type_id: &TypeId) -> Result<TypeDescriptor, RegistryError> {
        let inner = self.inner.read().unwrap();
        inner
            .types
            .get(type_id)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| RegistryError::UnknownTypeId(type_id.as_str().to_string()))
    }

    pub fn is_registered(&self, type_id: &TypeId) -> bool {
        self.inner.read().unwrap().types.contains_key(type_id)
    }

    /// The dispatch shim for a registered sync invokable.
    pub fn invoke_shim(&self, type_id: &TypeId) -> Result<InvokeFn, RegistryError> {
        let inner = self.inner.read().unwrap();
        let entry = inner
            .types
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownTypeId(type_id.as_str().to_string()))?;
        entry
            .invoke
            .ok_or_else(|| RegistryError::NotInvokable(type_id.as_str().to_string()))
    }

    /// The dispatch shim for a registered async invokable.
    pub fn async_invoke_shim(&self, type_id: &TypeId) -> Result<AsyncInvokeFn, RegistryError> {
        let inner = self.inner.read().unwrap();
        let entry = inner
            .types
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownTypeId(type_id.as_str().to_string()))?;
        entry
            .invoke_async
            .ok_or_else(|| RegistryError::NotInvokable(type_id.as_str().to_string()))
    }

    /// The body of a registered free function.
    pub fn function(&self, name: &str) -> Result<RawFn, RegistryError> {
        let inner = self.inner.read().unwrap();
        inner
            .fns
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownFunction(name.to_string()))
    }

    /// The wrapper descriptor registered for a foreign type, if any.
    pub fn lookup_wrapper_for(&self, foreign: any::TypeId) -> Option<TypeDescriptor> {
        let inner = self.inner.read().unwrap();
        let type_id = inner.wrappers.get(&foreign)?;
        inner
            .types
            .get(type_id)
            .map(|entry| entry.descriptor.clone())
    }

    /// Wrap a foreign value into resource form via its registered wrapper.
    pub fn wrap_any(&self, value: &dyn Any) -> Result<ResourceDict, Error> {
        let inner = self.inner.read().unwrap();
        let type_id = inner
            .wrappers
            .get(&value.type_id())
            .ok_or_else(|| RegistryError::NoWrapper(format!("{:?}", value.type_id())))?;
        let entry = inner
            .types
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownTypeId(type_id.as_str().to_string()))?;
        let spec = entry
            .wrapper
            .as_ref()
            .ok_or_else(|| RegistryError::NoWrapper(type_id.as_str().to_string()))?;
        (spec.wrap)(value)
    }

    /// Unwrap a wrapper resource back into its foreign value.
    pub fn unwrap_any(&self, dict: &ResourceDict) -> Result<Box<dyn Any>, Error> {
        let type_id = dict.type_key().type_id();
        let inner = self.inner.read().unwrap();
        let entry = inner
            .types
            .get(&type_id)
            .ok_or_else(|| RegistryError::UnknownTypeId(type_id.as_str().to_string()))?;
        let spec = entry
            .wrapper
            .as_ref()
            .ok_or_else(|| RegistryError::NoWrapper(type_id.as_str().to_string()))?;
        (spec.unwrap)(dict)
    }
}

fn invoke_shim<F: Invokable>(dict: &ResourceDict, input: Value) -> CallResult<Value> {
    let invokable = F::from_dict(dict.clone())?;
    let input = F::Input::from_value(input)?;
    Ok(invokable.call(input)?.into_value())
}

fn async_invoke_shim<F: AsyncInvokable>(
    dict: ResourceDict,
    input: Value,
) -> BoxFuture<'static, CallResult<Value>> {
    Box::pin(async move {
        let invokable = F::from_dict(dict)?;
        let input = F::Input::from_value(input)?;
        Ok(invokable.call(input).await?.into_value())
    })
}

fn wrap_shim<W: ResourceWrapper + 'static>(value: &dyn Any) -> Result<ResourceDict, Error> {
    let concrete = value
        .downcast_ref::<W::Wrapped>()
        .ok_or_else(|| RegistryError::NoWrapper(any::type_name::<W::Wrapped>().to_string()))?;
    Ok(W::wrap(concrete).to_dict())
}

fn unwrap_shim<W: ResourceWrapper + 'static>(dict: &ResourceDict) -> Result<Box<dyn Any>, Error> {
    let wrapper = W::from_dict(dict.clone())?;
    Ok(Box::new(wrapper.unwrap()?))
}
