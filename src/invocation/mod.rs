// Invocations: the journaled execution model
//
// An invocation records one call of a registered invokable: the request
// (callable + input, by reference), and the response (output or raised
// condition, plus the ordered child invocations made during the body).
// Invocations are ordinary resources, so a whole execution tree commits
// into the store and can be checked out, rewound and replayed later.

pub mod builder;
pub mod fns;
pub mod input;
pub mod replay;

use std::sync::Arc;

use crate::condition::{CallResult, Condition};
use crate::digest::Digest;
use crate::error::{Error, ResourceError, Result};
use crate::registry::Registry;
use crate::resource::{AnyResource, FieldValue, Resource, ValueBox};
use crate::store::{Ref, Store};
use crate::types::TypeKey;
use crate::value::{FieldMap, Value};

pub use builder::{call, call_async, gather, invoke, invoke_async};

/// A callable resource: the unit the journal interposes on.
///
/// `call` is also the plain-call escape hatch: invoking it directly runs
/// the body with no journaling, which is how deliberately unrecorded
/// nondeterminism (clock reads and the like) stays out of the journal.
/// Tracked execution goes through [`invoke`] and [`call`](builder::call).
pub trait Invokable: Resource {
    type Input: FieldValue;
    type Output: FieldValue;

    fn call(&self, input: Self::Input) -> CallResult<Self::Output>;
}

/// A callable resource whose body may suspend at await points.
#[async_trait::async_trait]
pub trait AsyncInvokable: Resource + Send + Sync + 'static {
    type Input: FieldValue + Send + 'static;
    type Output: FieldValue + Send + 'static;

    async fn call(&self, input: Self::Input) -> CallResult<Self::Output>;
}

/// The request half of an invocation: what was called, on what.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub invokable: Ref<AnyResource>,
    pub input: Ref<ValueBox>,
}

impl Resource for Request {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.invocation.Request")
    }

    fn field_names() -> &'static [&'static str] {
        &["invokable", "input"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            self.invokable.clone().into_value(),
            self.input.clone().into_value(),
        ]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            invokable: fields.take_as("invokable")?,
            input: fields.take_as("input")?,
        })
    }
}

/// The response half of an invocation.
///
/// Exactly one of `output` and `raised` is set once the invocation is
/// complete; both stay unset only while the builder is mid-flight or after
/// a rewind marked the node incomplete. Children are in call order for
/// synchronous execution and completion order for async execution.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub output: Option<Ref<ValueBox>>,
    pub raised: Option<Ref<AnyResource>>,
    /// Whether the condition originated here, as opposed to propagating
    /// up from a child.
    pub raised_here: bool,
    pub children: Vec<Ref<Invocation>>,
}

impl Response {
    pub fn is_complete(&self) -> bool {
        self.output.is_some() || self.raised.is_some()
    }
}

impl Resource for Response {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.invocation.Response")
    }

    fn field_names() -> &'static [&'static str] {
        &["output", "raised", "raised_here", "children"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            self.output.clone().into_value(),
            self.raised.clone().into_value(),
            self.raised_here.into_value(),
            self.children.clone().into_value(),
        ]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            output: fields.take_as("output")?,
            raised: fields.take_as("raised")?,
            raised_here: fields.take_as("raised_here")?,
            children: fields.take_as("children")?,
        })
    }
}

/// One recorded execution: request plus response.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub request: Ref<Request>,
    pub response: Ref<Response>,
}

impl Resource for Invocation {
    fn type_key() -> TypeKey {
        TypeKey::new("chronicle.invocation.Invocation")
    }

    fn field_names() -> &'static [&'static str] {
        &["request", "response"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            self.request.clone().into_value(),
            self.response.clone().into_value(),
        ]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            request: fields.take_as("request")?,
            response: fields.take_as("response")?,
        })
    }
}

/// Overrides a recorded origin raise during replay: given the digest of
/// the raised condition, optionally substitute the value the overridden
/// call should return.
pub type ExceptionOverride = Arc<dyn Fn(&Digest) -> Option<Value> + Send + Sync>;

/// How a replay should behave.
#[derive(Clone, Default)]
pub struct ReplayOptions {
    /// Non-strict replay discards the recorded tail at the first
    /// divergence instead of failing.
    pub non_strict: bool,
    pub exception_override: Option<ExceptionOverride>,
}

impl ReplayOptions {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn non_strict() -> Self {
        Self {
            non_strict: true,
            exception_override: None,
        }
    }

    pub fn with_override(mut self, exception_override: ExceptionOverride) -> Self {
        self.exception_override = Some(exception_override);
        self
    }
}

impl Invocation {
    /// Whether the invocation completed with an output.
    pub fn successful(&self) -> Result<bool> {
        Ok(self.response.checkout()?.output.is_some())
    }

    /// The input value the invokable was called on.
    pub fn input(&self) -> Result<Value> {
        let request = self.request.checkout()?;
        Ok(request.input.checkout()?.wrapped)
    }

    /// The dict form of the committed invokable.
    pub fn invokable_dict(&self) -> Result<crate::value::ResourceDict> {
        let request = self.request.checkout()?;
        Ok(request.invokable.checkout()?.into_dict())
    }

    /// The output value, failing if the invocation did not complete with
    /// one.
    pub fn output(&self) -> Result<Value> {
        let response = self.response.checkout()?;
        match response.output {
            Some(output) => Ok(output.checkout()?.wrapped),
            None => Err(Error::IncompleteInvocation(
                "no output was recorded".to_string(),
            )),
        }
    }

    /// The raised condition, if the invocation raised.
    pub fn raised(&self) -> Result<Option<Condition>> {
        let response = self.response.checkout()?;
        match response.raised {
            Some(raised) => {
                let store = Store::current()?;
                let dict = store.checkout_dict(&raised.digest())?;
                Ok(Some(Condition::from_dict(dict)))
            }
            None => Ok(None),
        }
    }

    /// Whether the recorded condition originated in this invocation.
    pub fn raised_here(&self) -> Result<bool> {
        Ok(self.response.checkout()?.raised_here)
    }

    /// The child invocations, checked out in recorded order.
    pub fn children(&self) -> Result<Vec<Invocation>> {
        let response = self.response.checkout()?;
        response
            .children
            .iter()
            .map(|child| child.checkout())
            .collect()
    }

    /// The `index`-th child invocation.
    pub fn child(&self, index: usize) -> Result<Invocation> {
        let response = self.response.checkout()?;
        let child = response.children.get(index).ok_or_else(|| {
            Error::IncompleteInvocation(format!("no child at index {}", index))
        })?;
        child.checkout()
    }

    /// A copy of this invocation with the last `num_calls` leaf calls
    /// removed, depth-first from the right, and every affected ancestor
    /// marked incomplete. `rewind(0)` clears only the root output.
    pub fn rewind(&self, num_calls: usize) -> Result<Invocation> {
        let store = Store::current()?;
        let mut response = self.response.checkout_in(&store)?;
        response.output = None;
        let mut current = Invocation {
            request: self.request.clone(),
            response: store.commit(&response)?,
        };
        for _ in 0..num_calls {
            match remove_rightmost_leaf(&store, &current)? {
                Some(updated) => current = updated,
                // The root has no children left; nothing more to remove.
                None => break,
            }
        }
        Ok(current)
    }

    /// Replay with default options: strict, no overrides.
    pub fn replay(&self) -> Result<Invocation> {
        self.replay_with(ReplayOptions::default())
    }

    /// Re-execute this invocation, reusing recorded children where the
    /// call sequence matches. See the module docs of
    /// [`replay`](crate::invocation::replay) for the match discipline.
    pub fn replay_with(&self, options: ReplayOptions) -> Result<Invocation> {
        let store = Store::current()?;
        let request = self.request.checkout_in(&store)?;
        let invokable = store.checkout_dict(&request.invokable.digest())?;
        let input = request.input.checkout_in(&store)?.wrapped;
        let shim = Registry::global().invoke_shim(&invokable.type_key().type_id())?;
        let recorded = store.commit(self)?;
        let body = {
            let invokable = invokable.clone();
            move |value: Value| -> CallResult<Value> { shim(&invokable, value) }
        };
        builder::invoke_dyn(&store, invokable, input, body, Some((recorded, options)))
    }

    /// Async variant of [`replay_with`](Self::replay_with) for invokables
    /// registered with [`Registry::register_async_invokable`].
    pub async fn replay_async_with(&self, options: ReplayOptions) -> Result<Invocation> {
        let store = Store::current()?;
        let request = self.request.checkout_in(&store)?;
        let invokable = store.checkout_dict(&request.invokable.digest())?;
        let input = request.input.checkout_in(&store)?.wrapped;
        let shim = Registry::global().async_invoke_shim(&invokable.type_key().type_id())?;
        let recorded = store.commit(self)?;
        let body = {
            let invokable = invokable.clone();
            move |value: Value| shim(invokable, value)
        };
        builder::invoke_dyn_async(&store, invokable, input, body, Some((recorded, options))).await
    }

    /// Async replay with default options.
    pub async fn replay_async(&self) -> Result<Invocation> {
        self.replay_async_with(ReplayOptions::default()).await
    }
}

/// Remove the rightmost leaf below `inv`, clearing completion state along
/// the path. Returns `None` when `inv` itself is a leaf, in which case the
/// caller owns the removal.
fn remove_rightmost_leaf(store: &Store, inv: &Invocation) -> Result<Option<Invocation>> {
    let mut response = inv.response.checkout_in(store)?;
    let last = match response.children.last() {
        None => return Ok(None),
        Some(child) => child.checkout_in(store)?,
    };
    match remove_rightmost_leaf(store, &last)? {
        None => {
            response.children.pop();
        }
        Some(updated) => {
            let updated_ref = store.commit(&updated)?;
            if let Some(slot) = response.children.last_mut() {
                *slot = updated_ref;
            }
        }
    }
    // The path to the removed leaf is incomplete now; a propagated raise
    // from that leaf no longer holds either.
    response.output = None;
    response.raised = None;
    response.raised_here = false;
    Ok(Some(Invocation {
        request: inv.request.clone(),
        response: store.commit(&response)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_know_completion() {
        let incomplete = Response {
            output: None,
            raised: None,
            raised_here: false,
            children: Vec::new(),
        };
        assert!(!incomplete.is_complete());
        let done = Response {
            output: Some(Ref::from_digest(Digest::of(b"out"))),
            ..incomplete.clone()
        };
        assert!(done.is_complete());
    }

    #[test]
    fn invocation_resource_round_trips() {
        let inv = Invocation {
            request: Ref::from_digest(Digest::of(b"request")),
            response: Ref::from_digest(Digest::of(b"response")),
        };
        let dict = inv.to_dict();
        assert_eq!(Invocation::from_dict(dict).unwrap(), inv);
    }
}
