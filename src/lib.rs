//! Chronicle: a content-addressed resource store with a journaled,
//! replayable execution engine.
//!
//! Programs that orchestrate calls into models, humans, or other
//! nondeterministic oracles are only as useful as their executions are
//! inspectable. Chronicle makes every execution a value: registered
//! callables run through an interposing builder that records each call's
//! input, output, raised condition, and nested calls as content-addressed
//! resources in a store. Recorded runs can be checked out, rewound, and
//! replayed, with recorded child outputs reused wherever the call
//! sequence is deterministic and external inputs injected where it is
//! not.
//!
//! ## Subsystems
//!
//! - **`value` / `resource` / `types`** - the field value universe and the
//!   resource interface over it
//! - **`registry`** - the process-wide table of types, wrappers, and
//!   invokable dispatch shims
//! - **`digest` / `pack`** - canonical packing and 256-bit content digests
//! - **`store`** - memory and filesystem backends, refs, commit/checkout
//! - **`invocation`** - the builder, the replay engine, and the
//!   input-request protocol
//! - **`fmt`** - human-readable journal summaries

#![forbid(unsafe_code)]

pub mod condition;
pub mod digest;
pub mod error;
pub mod fmt;
pub mod invocation;
pub mod pack;
pub mod registry;
pub mod resource;
pub mod store;
pub mod types;
pub mod value;

mod context;

pub use condition::{CallError, CallResult, Cancelled, Condition, RaisedError};
pub use digest::Digest;
pub use error::{Error, PackingError, RegistryError, ReplayError, ResourceError, Result, StorageError};
pub use invocation::fns::{call_fn, invoke_fn, register_fn, FnInvokable};
pub use invocation::input::{request_input, InputRequest, InvocationGenerator, PendingRequest};
pub use invocation::{
    call, call_async, gather, invoke, invoke_async, AsyncInvokable, ExceptionOverride, Invocation,
    Invokable, ReplayOptions, Request, Response,
};
pub use registry::{Registry, ResourceWrapper, TypeDescriptor};
pub use resource::{AnyResource, FieldValue, Resource, ValueBox};
pub use store::{
    checkout, commit, FileBackend, FileBackendConfig, InMemoryBackend, Ref, StorageBackend, Store,
};
pub use types::{DistributionKey, TypeId, TypeKey};
pub use value::{FieldMap, RefValue, ResourceDict, Value};

/// Register a resource type with the global registry.
pub fn register<T: Resource>() -> Result<()> {
    Ok(Registry::global().register::<T>()?)
}

/// Register an invokable resource type with the global registry.
pub fn register_invokable<F: Invokable + 'static>() -> Result<()> {
    Ok(Registry::global().register_invokable::<F>()?)
}

/// Register an async invokable resource type with the global registry.
pub fn register_async_invokable<F: AsyncInvokable>() -> Result<()> {
    Ok(Registry::global().register_async_invokable::<F>()?)
}

/// Register a wrapper resource for its foreign type.
pub fn register_wrapper<W: ResourceWrapper + 'static>() -> Result<()> {
    Ok(Registry::global().register_wrapper::<W>()?)
}
