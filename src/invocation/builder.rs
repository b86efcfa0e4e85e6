// The invocation builder
//
// The builder interposes on tracked calls: it commits the callable and the
// input, consults the parent's replay tape, runs the body under a fresh
// frame, and finalizes the node into the journal. Frames are the
// in-progress mirror of invocation nodes; the ambient current frame is
// what makes nested tracked calls attach to the right parent.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::condition::{CallError, CallResult};
use crate::context;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::invocation::replay::{self, ReplayState, Step};
use crate::invocation::{
    AsyncInvokable, ExceptionOverride, Invocation, Invokable, ReplayOptions, Request, Response,
};
use crate::resource::{AnyResource, FieldValue, Resource, ValueBox};
use crate::store::{Ref, Store};
use crate::value::{ResourceDict, Value};

/// The in-progress state of one invocation node.
pub struct Frame {
    async_mode: bool,
    exception_override: Option<ExceptionOverride>,
    pub(crate) state: Mutex<FrameState>,
}

pub(crate) struct FrameState {
    /// Finalized children, in completion order.
    pub(crate) children: Vec<Ref<Invocation>>,
    /// Children registered but not yet finalized.
    pub(crate) open: usize,
    /// Digests of conditions raised by immediate children. A condition
    /// finalized here that appears in this set was propagated, not
    /// originated.
    pub(crate) child_raised: HashSet<Digest>,
    pub(crate) replay: Option<ReplayState>,
}

impl Frame {
    fn new(
        tape: Option<ReplayState>,
        exception_override: Option<ExceptionOverride>,
        async_mode: bool,
    ) -> Self {
        Self {
            async_mode,
            exception_override,
            state: Mutex::new(FrameState {
                children: Vec::new(),
                open: 0,
                child_raised: HashSet::new(),
                replay: tape,
            }),
        }
    }

    /// The root holder frame for a top-level invoke, seeded with the
    /// recorded invocation when replaying.
    fn holder(replay: Option<(Ref<Invocation>, ReplayOptions)>, async_mode: bool) -> Self {
        match replay {
            None => Self::new(None, None, async_mode),
            Some((recorded, options)) => Self::new(
                Some(ReplayState::new(
                    vec![recorded],
                    options.non_strict,
                    !async_mode,
                )),
                options.exception_override,
                async_mode,
            ),
        }
    }

    /// A child frame, inheriting mode and override from its parent.
    fn child(parent: &Frame, tape: Option<ReplayState>) -> Self {
        Self::new(
            tape,
            parent.exception_override.clone(),
            parent.async_mode,
        )
    }

    pub(crate) fn exception_override(&self) -> Option<&ExceptionOverride> {
        self.exception_override.as_ref()
    }

    /// Reserve a child slot. Every reservation must be settled by exactly
    /// one `complete_child` or `abort_child`; a reservation left open is
    /// an incomplete subinvocation.
    pub(crate) fn register_open(&self) {
        self.state.lock().unwrap().open += 1;
    }

    pub(crate) fn complete_child(&self, child: Ref<Invocation>, raised: Option<Digest>) {
        let mut state = self.state.lock().unwrap();
        state.open -= 1;
        state.children.push(child);
        if let Some(digest) = raised {
            state.child_raised.insert(digest);
        }
    }

    pub(crate) fn abort_child(&self) {
        self.state.lock().unwrap().open -= 1;
    }
}

/// Invoke a registered callable on an input, journaling the execution.
/// Returns the committed root invocation whether the body returned or
/// raised; framework faults abort with an error.
pub fn invoke<F: Invokable>(f: &F, input: F::Input) -> Result<Invocation> {
    let store = Store::current()?;
    let dict = f.to_dict();
    let body = |value: Value| -> CallResult<Value> {
        let typed = F::Input::from_value(value)?;
        Ok(f.call(typed)?.into_value())
    };
    invoke_dyn(&store, dict, input.into_value(), body, None)
}

/// Call a registered callable as a tracked child of the current
/// invocation. Outside any invocation this is a plain call: the body runs
/// and nothing is journaled.
pub fn call<F: Invokable>(f: &F, input: F::Input) -> CallResult<F::Output> {
    match context::current_frame() {
        None => f.call(input),
        Some(parent) => {
            parent.register_open();
            let dict = f.to_dict();
            let body = |value: Value| -> CallResult<Value> {
                let typed = F::Input::from_value(value)?;
                Ok(f.call(typed)?.into_value())
            };
            let output = tracked_call_dyn(&parent, &dict, input.into_value(), body)?;
            Ok(F::Output::from_value(output)?)
        }
    }
}

/// Async variant of [`invoke`].
pub async fn invoke_async<F: AsyncInvokable>(f: &F, input: F::Input) -> Result<Invocation> {
    let store = Store::current()?;
    let dict = f.to_dict();
    let invokable = f.clone();
    let body = move |value: Value| {
        let invokable = invokable.clone();
        async move {
            let typed = F::Input::from_value(value)?;
            Ok(invokable.call(typed).await?.into_value())
        }
    };
    invoke_dyn_async(&store, dict, input.into_value(), body, None).await
}

/// Async variant of [`call`].
///
/// The child slot is reserved when the future is created, not when it is
/// first polled: a tracked child future that is dropped unawaited leaves
/// its reservation open and the parent fails to finalize with
/// [`Error::IncompleteSubinvocation`].
pub fn call_async<F: AsyncInvokable>(
    f: &F,
    input: F::Input,
) -> impl Future<Output = CallResult<F::Output>> + Send + 'static {
    let parent = context::current_frame();
    if let Some(parent) = &parent {
        parent.register_open();
    }
    let invokable = f.clone();
    async move {
        match parent {
            None => invokable.call(input).await,
            Some(parent) => {
                let dict = invokable.to_dict();
                let body = {
                    let invokable = invokable.clone();
                    move |value: Value| {
                        let invokable = invokable.clone();
                        async move {
                            let typed = F::Input::from_value(value)?;
                            Ok(invokable.call(typed).await?.into_value())
                        }
                    }
                };
                let output =
                    tracked_call_dyn_async(&parent, &dict, input.into_value(), body).await?;
                Ok(F::Output::from_value(output)?)
            }
        }
    }
}

/// Drive sibling sub-invocations concurrently. Their entries in the
/// parent's children list appear in the order they complete, and replay
/// matches them by request rather than by position.
pub async fn gather<T, F: Future<Output = T>>(tasks: Vec<F>) -> Vec<T> {
    futures::future::join_all(tasks).await
}

/// Dynamic-dispatch root invoke shared by typed invoke and replay.
pub(crate) fn invoke_dyn<B>(
    store: &Store,
    invokable: ResourceDict,
    input: Value,
    body: B,
    replay: Option<(Ref<Invocation>, ReplayOptions)>,
) -> Result<Invocation>
where
    B: FnOnce(Value) -> CallResult<Value>,
{
    let holder = Arc::new(Frame::holder(replay, false));
    holder.register_open();
    debug!(invokable = %invokable.type_key(), "invoke");
    let outcome = context::with_frame(holder.clone(), || {
        tracked_call_dyn(&holder, &invokable, input, body)
    });
    if let Err(CallError::Fault(err)) = outcome {
        return Err(err);
    }
    root_invocation(store, &holder)
}

/// Dynamic-dispatch async root invoke.
pub(crate) async fn invoke_dyn_async<B, Fut>(
    store: &Store,
    invokable: ResourceDict,
    input: Value,
    body: B,
    replay: Option<(Ref<Invocation>, ReplayOptions)>,
) -> Result<Invocation>
where
    B: FnOnce(Value) -> Fut,
    Fut: Future<Output = CallResult<Value>> + Send,
{
    let holder = Arc::new(Frame::holder(replay, true));
    holder.register_open();
    debug!(invokable = %invokable.type_key(), "invoke (async)");
    let outcome = tracked_call_dyn_async(&holder, &invokable, input, body).await;
    if let Err(CallError::Fault(err)) = outcome {
        return Err(err);
    }
    root_invocation(store, &holder)
}

fn root_invocation(store: &Store, holder: &Arc<Frame>) -> Result<Invocation> {
    let child = {
        let state = holder.state.lock().unwrap();
        state.children.first().cloned()
    };
    match child {
        Some(root) => root.checkout_in(store),
        None => Err(Error::IncompleteInvocation(
            "root invocation did not finalize".to_string(),
        )),
    }
}

/// Journal one tracked call against `parent`. The caller must have
/// reserved a child slot with `register_open`.
pub(crate) fn tracked_call_dyn<B>(
    parent: &Arc<Frame>,
    invokable: &ResourceDict,
    input: Value,
    body: B,
) -> CallResult<Value>
where
    B: FnOnce(Value) -> CallResult<Value>,
{
    let store = match Store::current() {
        Ok(store) => store,
        Err(err) => {
            parent.abort_child();
            return Err(err.into());
        }
    };
    match run_tracked(&store, parent, invokable, input, body) {
        Ok((result, child, raised)) => {
            parent.complete_child(child, raised);
            result
        }
        Err(err) => {
            parent.abort_child();
            Err(CallError::Fault(err))
        }
    }
}

fn run_tracked<B>(
    store: &Store,
    parent: &Arc<Frame>,
    invokable: &ResourceDict,
    input: Value,
    body: B,
) -> Result<(CallResult<Value>, Ref<Invocation>, Option<Digest>)>
where
    B: FnOnce(Value) -> CallResult<Value>,
{
    let invokable_digest = store.commit_dict(invokable)?;
    let input_ref = store.commit(&ValueBox::new(input.clone()))?;
    let request = Request {
        invokable: Ref::<AnyResource>::from_digest(invokable_digest),
        input: input_ref,
    };
    let request_ref = store.commit(&request)?;

    match replay::consume(store, parent, &request, &request_ref)? {
        Step::Replayed { output, recorded } => Ok((Ok(output), recorded, None)),
        Step::Reraise {
            condition,
            condition_digest,
            recorded,
        } => Ok((
            Err(CallError::Raised(condition)),
            recorded,
            Some(condition_digest),
        )),
        Step::Overridden { output, children } => {
            let child = commit_overridden(store, request_ref, &output, children)?;
            Ok((Ok(output), child, None))
        }
        Step::Execute { tape } => {
            let frame = Arc::new(Frame::child(parent, tape));
            let result = match context::with_frame(frame.clone(), || body(input)) {
                // Faults abort journaling and surface as plain errors.
                Err(CallError::Fault(err)) => return Err(err),
                other => other,
            };
            let (child, raised) = finalize_frame(store, &frame, request_ref, &result)?;
            Ok((result, child, raised))
        }
    }
}

/// Async twin of [`tracked_call_dyn`]; store writes go through the async
/// backend surface.
pub(crate) async fn tracked_call_dyn_async<B, Fut>(
    parent: &Arc<Frame>,
    invokable: &ResourceDict,
    input: Value,
    body: B,
) -> CallResult<Value>
where
    B: FnOnce(Value) -> Fut,
    Fut: Future<Output = CallResult<Value>> + Send,
{
    let store = match Store::current() {
        Ok(store) => store,
        Err(err) => {
            parent.abort_child();
            return Err(err.into());
        }
    };
    match run_tracked_async(&store, parent, invokable, input, body).await {
        Ok((result, child, raised)) => {
            parent.complete_child(child, raised);
            result
        }
        Err(err) => {
            parent.abort_child();
            Err(CallError::Fault(err))
        }
    }
}

async fn run_tracked_async<B, Fut>(
    store: &Store,
    parent: &Arc<Frame>,
    invokable: &ResourceDict,
    input: Value,
    body: B,
) -> Result<(CallResult<Value>, Ref<Invocation>, Option<Digest>)>
where
    B: FnOnce(Value) -> Fut,
    Fut: Future<Output = CallResult<Value>> + Send,
{
    let invokable_digest = store.commit_dict(invokable)?;
    let input_ref = store.commit_async(&ValueBox::new(input.clone())).await?;
    let request = Request {
        invokable: Ref::<AnyResource>::from_digest(invokable_digest),
        input: input_ref,
    };
    let request_ref = store.commit_async(&request).await?;

    match replay::consume(store, parent, &request, &request_ref)? {
        Step::Replayed { output, recorded } => Ok((Ok(output), recorded, None)),
        Step::Reraise {
            condition,
            condition_digest,
            recorded,
        } => Ok((
            Err(CallError::Raised(condition)),
            recorded,
            Some(condition_digest),
        )),
        Step::Overridden { output, children } => {
            let child = commit_overridden(store, request_ref, &output, children)?;
            Ok((Ok(output), child, None))
        }
        Step::Execute { tape } => {
            let frame = Arc::new(Frame::child(parent, tape));
            let fut = body(input);
            let result = match context::TASK_FRAME.scope(frame.clone(), fut).await {
                Err(CallError::Fault(err)) => return Err(err),
                other => other,
            };
            let (child, raised) = finalize_frame(store, &frame, request_ref, &result)?;
            Ok((result, child, raised))
        }
    }
}

/// Build the replacement node for an overridden raise: the substitute
/// output with the recorded grandchildren adopted unchanged.
fn commit_overridden(
    store: &Store,
    request_ref: Ref<Request>,
    output: &Value,
    children: Vec<Ref<Invocation>>,
) -> Result<Ref<Invocation>> {
    let output_ref = store.commit(&ValueBox::new(output.clone()))?;
    let response = Response {
        output: Some(output_ref),
        raised: None,
        raised_here: false,
        children,
    };
    let invocation = Invocation {
        request: request_ref,
        response: store.commit(&response)?,
    };
    store.commit(&invocation)
}

/// Turn a finished frame into a committed invocation node.
fn finalize_frame(
    store: &Store,
    frame: &Arc<Frame>,
    request_ref: Ref<Request>,
    result: &CallResult<Value>,
) -> Result<(Ref<Invocation>, Option<Digest>)> {
    let (children, open, child_raised) = {
        let mut state = frame.state.lock().unwrap();
        (
            std::mem::take(&mut state.children),
            state.open,
            std::mem::take(&mut state.child_raised),
        )
    };
    if open > 0 {
        return Err(Error::IncompleteSubinvocation {
            completed: children.len(),
            open,
        });
    }
    let (output, raised, raised_here, raised_digest) = match result {
        Ok(value) => {
            let output_ref = store.commit(&ValueBox::new(value.clone()))?;
            (Some(output_ref), None, false, None)
        }
        Err(CallError::Raised(condition)) => {
            let digest = store.commit_dict(condition.dict())?;
            let here = !child_raised.contains(&digest);
            (
                None,
                Some(Ref::<AnyResource>::from_digest(digest)),
                here,
                Some(digest),
            )
        }
        // Faults are filtered out before finalization.
        Err(CallError::Fault(_)) => unreachable!("faults do not finalize"),
    };
    let response = Response {
        output,
        raised,
        raised_here,
        children,
    };
    let invocation = Invocation {
        request: request_ref,
        response: store.commit(&response)?,
    };
    let invocation_ref = store.commit(&invocation)?;
    Ok((invocation_ref, raised_digest))
}
