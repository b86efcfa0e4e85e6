// Ambient execution context
//
// The current store and the current builder frame are explicit objects
// threaded through execution; this module is the thin ambient facade over
// them. Sync scopes use thread-local stacks and never span a suspension
// point. Async scopes use tokio task-locals, which follow the future they
// wrap, so gathered siblings each observe their own frame.
//
// Lookup order is innermost-first: a synchronous scope opened inside an
// async body shadows the task-local value for its extent.

use std::cell::RefCell;
use std::sync::Arc;

use crate::invocation::builder::Frame;
use crate::store::Store;

thread_local! {
    static STORE_STACK: RefCell<Vec<Store>> = RefCell::new(Vec::new());
    static FRAME_STACK: RefCell<Vec<Arc<Frame>>> = RefCell::new(Vec::new());
}

tokio::task_local! {
    pub(crate) static TASK_STORE: Store;
    pub(crate) static TASK_FRAME: Arc<Frame>;
}

/// The store active in the current scope, if any.
pub(crate) fn current_store() -> Option<Store> {
    let local = STORE_STACK.with(|stack| stack.borrow().last().cloned());
    if local.is_some() {
        return local;
    }
    TASK_STORE.try_with(|store| store.clone()).ok()
}

/// The builder frame active in the current scope, if any.
pub(crate) fn current_frame() -> Option<Arc<Frame>> {
    let local = FRAME_STACK.with(|stack| stack.borrow().last().cloned());
    if local.is_some() {
        return local;
    }
    TASK_FRAME.try_with(|frame| frame.clone()).ok()
}

struct StoreGuard;

impl Drop for StoreGuard {
    fn drop(&mut self) {
        STORE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` with `store` as the current store.
pub(crate) fn with_store<R>(store: Store, f: impl FnOnce() -> R) -> R {
    STORE_STACK.with(|stack| stack.borrow_mut().push(store));
    let _guard = StoreGuard;
    f()
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` with `frame` as the current builder frame.
pub(crate) fn with_frame<R>(frame: Arc<Frame>, f: impl FnOnce() -> R) -> R {
    FRAME_STACK.with(|stack| stack.borrow_mut().push(frame));
    let _guard = FrameGuard;
    f()
}
