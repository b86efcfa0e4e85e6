// The input-request protocol
//
// `request_input` suspends an invocation by raising a distinguished
// condition through a dedicated child node. Because raised conditions are
// journaled, the suspended run commits cleanly; resolution is a replay
// whose exception override recognizes the recorded request and substitutes
// the supplied value as that node's output.

use std::collections::HashMap;
use std::sync::Arc;

use crate::condition::{CallError, CallResult, Condition};
use crate::context;
use crate::digest::Digest;
use crate::error::{Error, ResourceError, Result};
use crate::invocation::builder;
use crate::invocation::{ExceptionOverride, Invocation, Invokable, ReplayOptions};
use crate::resource::{FieldValue, Resource, ValueBox};
use crate::store::{Ref, Store};
use crate::types::TypeKey;
use crate::value::{FieldMap, Value};

/// The condition raised to suspend an invocation pending external input.
#[derive(Clone, Debug, PartialEq)]
pub struct InputRequest {
    /// The type of value being requested.
    pub requested_type: TypeKey,
    /// The value input is being requested for.
    pub for_value: Ref<ValueBox>,
    /// Free-form context for whoever resolves the request.
    pub context: Value,
}

impl InputRequest {
    /// Whether a supplied value plausibly satisfies the requested type.
    /// Primitive type names check the value variant; resource type names
    /// check the dict type; anything else is accepted.
    pub fn accepts(&self, value: &Value) -> bool {
        match self.requested_type.name.as_str() {
            "int" => matches!(value, Value::Int(_)),
            "float" => matches!(value, Value::Float(_)),
            "str" => matches!(value, Value::Str(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "bytes" => matches!(value, Value::Bytes(_)),
            "list" => matches!(value, Value::List(_)),
            "map" => matches!(value, Value::Map(_)),
            "null" => value.is_null(),
            _ => match value {
                Value::Resource(dict) => dict.type_key() == &self.requested_type,
                _ => true,
            },
        }
    }
}

impl Resource for InputRequest {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.invocation.InputRequest")
    }

    fn field_names() -> &'static [&'static str] {
        &["requested_type", "for_value", "context"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            self.requested_type.clone().into_value(),
            self.for_value.clone().into_value(),
            self.context.clone(),
        ]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            requested_type: fields.take_as("requested_type")?,
            for_value: fields.take_as("for_value")?,
            context: fields.take("context")?,
        })
    }
}

/// The built-in invokable whose body raises [`InputRequest`].
///
/// Routing the raise through a child call gives every request its own
/// invocation node, which is what resolution overrides: the substituted
/// value becomes that node's output and the surrounding body resumes
/// after it.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestInput {
    pub requested_type: TypeKey,
    pub context: Value,
}

impl Resource for RequestInput {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.invocation.RequestInput")
    }

    fn field_names() -> &'static [&'static str] {
        &["requested_type", "context"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![self.requested_type.clone().into_value(), self.context.clone()]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            requested_type: fields.take_as("requested_type")?,
            context: fields.take("context")?,
        })
    }
}

impl Invokable for RequestInput {
    type Input = Value;
    type Output = Value;

    fn call(&self, input: Value) -> CallResult<Value> {
        let store = Store::current()?;
        let for_value = store.commit(&ValueBox::new(input))?;
        Err(CallError::Raised(Condition::new(&InputRequest {
            requested_type: self.requested_type.clone(),
            for_value,
            context: self.context.clone(),
        })))
    }
}

/// Request a value of `requested_type` from an external system or user.
///
/// Never returns a value during normal execution: it raises
/// [`InputRequest`], which suspends the invocation until a replay override
/// injects the value.
pub fn request_input(
    requested_type: TypeKey,
    for_value: Value,
    context: Value,
) -> CallResult<Value> {
    if context::current_frame().is_none() {
        return Err(CallError::Fault(Error::InputRequestOutsideInvocation));
    }
    builder::call(
        &RequestInput {
            requested_type,
            context,
        },
        for_value,
    )
}

/// An input request recovered from a journal, with the digest of its
/// raised condition: the key a replay override answers to.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub request: InputRequest,
    pub digest: Digest,
}

impl Invocation {
    fn raised_condition(&self) -> Result<Option<(Condition, Digest)>> {
        let response = self.response.checkout()?;
        match response.raised {
            Some(raised) => {
                let store = Store::current()?;
                let dict = store.checkout_dict(&raised.digest())?;
                Ok(Some((Condition::from_dict(dict), raised.digest())))
            }
            None => Ok(None),
        }
    }

    /// Every input request raised at its origin anywhere in this
    /// invocation tree. Concurrent async requests each appear once,
    /// keyed by their own condition digest.
    pub fn pending_input_requests(&self) -> Result<Vec<PendingRequest>> {
        let mut out = Vec::new();
        self.collect_pending(&mut out)?;
        Ok(out)
    }

    fn collect_pending(&self, out: &mut Vec<PendingRequest>) -> Result<()> {
        let response = self.response.checkout()?;
        if response.raised_here {
            if let Some((condition, digest)) = self.raised_condition()? {
                if let Some(request) = condition.downcast::<InputRequest>() {
                    out.push(PendingRequest { request, digest });
                }
            }
        }
        for child in &response.children {
            child.checkout()?.collect_pending(out)?;
        }
        Ok(())
    }

    /// Resolve a single recorded input request and replay.
    pub fn resolve_input(&self, digest: Digest, value: Value) -> Result<Invocation> {
        let exception_override: ExceptionOverride =
            Arc::new(move |d: &Digest| (*d == digest).then(|| value.clone()));
        self.replay_with(ReplayOptions::strict().with_override(exception_override))
    }

    /// Resolve any number of recorded input requests, keyed by condition
    /// digest, and replay asynchronously.
    pub async fn continue_with(&self, inputs: HashMap<Digest, Value>) -> Result<Invocation> {
        let exception_override: ExceptionOverride =
            Arc::new(move |d: &Digest| inputs.get(d).cloned());
        self.replay_async_with(ReplayOptions::strict().with_override(exception_override))
            .await
    }
}

/// A lazy sequence of input requests driven off an invocation.
///
/// Each advance replays the journaled run with the most recent request
/// resolved to the supplied value, until the underlying invocation
/// completes or raises something that is not an input request.
pub struct InvocationGenerator {
    invocation: Invocation,
    pending_input: Option<Value>,
}

impl InvocationGenerator {
    /// Invoke `f` and position the generator at its first input request
    /// (or at completion).
    pub fn start<F: Invokable>(f: &F, input: F::Input) -> Result<Self> {
        Ok(Self {
            invocation: builder::invoke(f, input)?,
            pending_input: None,
        })
    }

    /// Drive an existing journaled invocation.
    pub fn from_invocation(invocation: Invocation) -> Self {
        Self {
            invocation,
            pending_input: None,
        }
    }

    /// The invocation as of the latest advance.
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Whether the run has finished: output produced, or raised something
    /// other than an input request.
    pub fn complete(&self) -> Result<bool> {
        if self.invocation.successful()? {
            return Ok(true);
        }
        match self.invocation.raised_condition()? {
            Some((condition, _)) => Ok(!condition.is::<InputRequest>()),
            None => Ok(false),
        }
    }

    /// The input request the run is currently suspended on.
    pub fn input_request(&self) -> Result<Option<PendingRequest>> {
        match self.invocation.raised_condition()? {
            Some((condition, digest)) => Ok(condition
                .downcast::<InputRequest>()
                .map(|request| PendingRequest { request, digest })),
            None => Ok(None),
        }
    }

    /// Supply the value for the current request; consumed by the next
    /// advance.
    pub fn set_input(&mut self, value: Value) {
        self.pending_input = Some(value);
    }

    /// Advance the run. If an input was supplied, the current request is
    /// resolved and the invocation replayed. Returns the next pending
    /// request, or `None` once complete.
    pub fn next_request(&mut self) -> Result<Option<PendingRequest>> {
        if let Some(value) = self.pending_input.take() {
            let pending = self.input_request()?.ok_or_else(|| {
                Error::IncompleteInvocation("no input request to resolve".to_string())
            })?;
            self.invocation = self.invocation.resolve_input(pending.digest, value)?;
        }
        if self.complete()? {
            return Ok(None);
        }
        self.input_request()
    }

    /// Type-checked combination of [`set_input`](Self::set_input) and
    /// [`next_request`](Self::next_request).
    pub fn send(&mut self, value: Value) -> Result<Option<PendingRequest>> {
        if let Some(pending) = self.input_request()? {
            if !pending.request.accepts(&value) {
                return Err(ResourceError::UnexpectedKind {
                    expected: "value matching the requested input type",
                    found: value.kind(),
                }
                .into());
            }
        }
        self.set_input(value);
        self.next_request()
    }
}
