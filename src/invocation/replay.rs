// Replay state and match discipline
//
// A replaying frame carries a tape: the recorded children of the node
// being re-executed. Each tracked call the body makes consumes from the
// tape. Matching is digest equality of the request refs, so no structural
// walk happens at replay time.
//
// Consuming a matched child takes one of four shapes:
//   - recorded output present: return it, body not run;
//   - recorded origin raise, override declines: re-raise the recording;
//   - recorded origin raise, override supplies a value: substitute it as
//     the call's output and adopt the recorded grandchildren;
//   - recorded propagated raise or incomplete node: re-enter the body with
//     the grandchildren as the new tape.
//
// Synchronous frames match positionally. Async frames match by scanning,
// because recorded order is completion order and a gathered sibling may
// ask out of turn. In strict mode an unmatched call is a divergence; in
// non-strict mode the remaining tape is discarded and execution continues
// fresh.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::warn;

use crate::condition::Condition;
use crate::digest::Digest;
use crate::error::{Error, ReplayError, Result};
use crate::invocation::builder::Frame;
use crate::invocation::{Invocation, Request};
use crate::store::{Ref, Store};
use crate::value::Value;

/// The recorded children still available to match against.
#[derive(Debug)]
pub(crate) struct ReplayState {
    remaining: VecDeque<Ref<Invocation>>,
    non_strict: bool,
    /// Positional matching (sync) versus scan matching (async).
    positional: bool,
    consumed: usize,
}

impl ReplayState {
    pub(crate) fn new(
        children: Vec<Ref<Invocation>>,
        non_strict: bool,
        positional: bool,
    ) -> Self {
        Self {
            remaining: children.into(),
            non_strict,
            positional,
            consumed: 0,
        }
    }
}

/// What a tracked call should do, given the parent's replay state.
pub(crate) enum Step {
    /// Run the body; `tape` is the replay state for the new frame.
    Execute { tape: Option<ReplayState> },
    /// Recorded output reused wholesale; the recorded node is re-journaled.
    Replayed {
        output: Value,
        recorded: Ref<Invocation>,
    },
    /// Recorded origin raise re-raised.
    Reraise {
        condition: Condition,
        condition_digest: Digest,
        recorded: Ref<Invocation>,
    },
    /// Origin raise overridden: substitute `output`, adopt the recorded
    /// grandchildren as this call's children.
    Overridden {
        output: Value,
        children: Vec<Ref<Invocation>>,
    },
}

/// Consume a recorded child of `parent` matching the observed request, or
/// decide how to proceed without one.
pub(crate) fn consume(
    store: &Store,
    parent: &Arc<Frame>,
    observed: &Request,
    request_ref: &Ref<Request>,
) -> Result<Step> {
    let mut state = parent.state.lock().unwrap();
    let replay = match state.replay.as_mut() {
        None => return Ok(Step::Execute { tape: None }),
        Some(replay) => replay,
    };
    // An exhausted tape is not a divergence: trailing calls run fresh.
    if replay.remaining.is_empty() {
        return Ok(Step::Execute { tape: None });
    }

    let candidates: usize = if replay.positional { 1 } else { replay.remaining.len() };
    let mut matched: Option<(usize, Invocation)> = None;
    for index in 0..candidates {
        let recorded = replay.remaining[index].checkout_in(store)?;
        if recorded.request.digest() == request_ref.digest() {
            matched = Some((index, recorded));
            break;
        }
    }

    let (index, recorded) = match matched {
        Some(found) => found,
        None => {
            let first = replay.remaining[0].checkout_in(store)?;
            let expected = first.request.checkout_in(store)?;
            let divergence = ReplayError {
                call_index: replay.consumed,
                expected_invokable: expected.invokable.digest(),
                expected_input: expected.input.digest(),
                observed_invokable: observed.invokable.digest(),
                observed_input: observed.input.digest(),
            };
            if replay.non_strict {
                warn!(%divergence, "discarding recorded tail");
                state.replay = None;
                return Ok(Step::Execute { tape: None });
            }
            return Err(Error::Replay(divergence));
        }
    };

    let non_strict = replay.non_strict;
    let positional = replay.positional;
    let recorded_ref = replay
        .remaining
        .remove(index)
        .expect("matched index is in bounds");
    replay.consumed += 1;
    drop(state);

    let response = recorded.response.checkout_in(store)?;
    if let Some(output) = &response.output {
        if response.raised.is_none() {
            return Ok(Step::Replayed {
                output: output.checkout_in(store)?.wrapped,
                recorded: recorded_ref,
            });
        }
    }
    if let Some(raised) = &response.raised {
        if response.raised_here {
            if let Some(exception_override) = parent.exception_override() {
                if let Some(substitute) = exception_override(&raised.digest()) {
                    return Ok(Step::Overridden {
                        output: substitute,
                        children: response.children,
                    });
                }
            }
            let dict = store.checkout_dict(&raised.digest())?;
            return Ok(Step::Reraise {
                condition: Condition::from_dict(dict),
                condition_digest: raised.digest(),
                recorded: recorded_ref,
            });
        }
    }
    // Propagated raise or incomplete node: descend into the body with the
    // recorded grandchildren as the tape.
    Ok(Step::Execute {
        tape: Some(ReplayState::new(response.children, non_strict, positional)),
    })
}
