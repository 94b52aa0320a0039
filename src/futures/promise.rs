// Futures/Promises core: a single-value-or-exception channel with FIFO
// continuation registration.
//
// Rust has no return-type overloading, so the original `then(fn)` — whose
// behavior depends on whether `fn` returns a plain value or a `Future<U>` —
// is split into two explicitly named methods here: `then` (plain value) and
// `then_flatten` (future-returning, unwrapped). Both implement the single
// spec'd contract; see DESIGN.md.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::error::{describe_panic, Result, ToolkitError};
use crate::futures::shared_state::{Continuation, SharedState, Slot};

/// The write side of a `SharedState<T>`. Satisfied at most once.
pub struct Promise<T> {
    shared: Arc<SharedState<T>>,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedState::empty()),
        }
    }

    pub fn future(&self) -> Future<T> {
        Future {
            shared: Some(self.shared.clone()),
        }
    }

    /// Moves the shared state from empty to value, then runs every pending
    /// continuation exactly once, on this thread, outside the lock.
    pub fn set_value(&self, value: T) -> Result<()> {
        self.satisfy(Slot::Value(value))
    }

    pub fn set_exception(&self, err: ToolkitError) -> Result<()> {
        self.satisfy(Slot::Exception(err))
    }

    fn satisfy(&self, slot: Slot<T>) -> Result<()> {
        let callbacks = {
            let mut cell = self.shared.cell.lock();
            if !matches!(cell.slot, Slot::Empty) {
                return Err(ToolkitError::AlreadySatisfied);
            }
            cell.slot = slot;
            std::mem::take(&mut cell.callbacks)
        };
        self.shared.condvar.notify_all();
        run_pending_callbacks(&self.shared, callbacks);
        Ok(())
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// The read side of a `SharedState<T>`.
pub struct Future<T> {
    pub(crate) shared: Option<Arc<SharedState<T>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Future<T> {
    /// An uninitialized future: every operation on it fails with `Uninitialized`.
    fn default() -> Self {
        Self { shared: None }
    }
}

/// Creates an already-satisfied future without a backing promise.
pub fn make_future<T: Send + 'static>(value: T) -> Future<T> {
    Future {
        shared: Some(Arc::new(SharedState::prompt(Slot::Value(value)))),
    }
}

/// Creates an already-failed future without a backing promise.
pub fn make_exceptional_future<T: Send + 'static>(err: ToolkitError) -> Future<T> {
    Future {
        shared: Some(Arc::new(SharedState::prompt(Slot::Exception(err)))),
    }
}

impl<T: Send + 'static> Future<T> {
    pub fn is_done(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.is_done())
    }

    pub fn has_value(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| matches!(s.cell.lock().slot, Slot::Value(_)))
    }

    pub fn has_exception(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| matches!(s.cell.lock().slot, Slot::Exception(_)))
    }

    /// Registers `callback` to run once the state is non-empty: synchronously
    /// on this thread if already done, otherwise on whatever thread satisfies
    /// it later.
    pub(crate) fn register_internal(&self, callback: Continuation<T>) {
        match &self.shared {
            Some(shared) => register(shared.clone(), callback),
            None => callback(Future { shared: None }),
        }
    }
}

fn register<T>(shared: Arc<SharedState<T>>, callback: Continuation<T>) {
    let mut cell = shared.cell.lock();
    if matches!(cell.slot, Slot::Empty) {
        cell.callbacks.push_back(callback);
    } else {
        drop(cell);
        callback(Future {
            shared: Some(shared),
        });
    }
}

/// Runs callbacks the library itself is driving; a panicking continuation
/// must never bring down the satisfier thread, so panics escaping `callback`
/// (as opposed to the user closure captured *inside* `then`, which is
/// already caught there) are logged and swallowed.
fn run_pending_callbacks<T>(shared: &Arc<SharedState<T>>, callbacks: std::collections::VecDeque<Continuation<T>>) {
    for callback in callbacks {
        let shared = shared.clone();
        let done = Future {
            shared: Some(shared),
        };
        if catch_unwind(AssertUnwindSafe(|| callback(done))).is_err() {
            warn!("continuation panicked outside its captured closure; swallowed");
        }
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Blocks until the state is non-empty, then returns the value or
    /// re-raises the stored exception.
    pub fn get(&self) -> Result<T> {
        let shared = self.shared.as_ref().ok_or(ToolkitError::Uninitialized)?;
        let mut cell = shared.cell.lock();
        loop {
            match &cell.slot {
                Slot::Empty => shared.condvar.wait(&mut cell),
                Slot::Value(v) => return Ok(v.clone()),
                Slot::Exception(e) => return Err(e.clone()),
            }
        }
    }

    /// `R = f(Future<T>)`. Runs `f` synchronously if this future is already
    /// done; otherwise runs it on the satisfying thread. A panic inside `f`
    /// becomes the downstream future's `UserException`.
    pub fn then<R, F>(&self, f: F) -> Future<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(Future<T>) -> R + Send + 'static,
    {
        let promise = Promise::<R>::new();
        let downstream = promise.future();
        let callback: Continuation<T> = Box::new(move |done: Future<T>| {
            match catch_unwind(AssertUnwindSafe(|| f(done))) {
                Ok(value) => {
                    let _ = promise.set_value(value);
                }
                Err(payload) => {
                    let _ = promise.set_exception(ToolkitError::UserException(describe_panic(payload)));
                }
            }
        });
        self.register_internal(callback);
        downstream
    }

    /// Like `then`, but `f` returns `Future<U>`: the downstream future is
    /// satisfied by that inner future's own completion ("unwrapping").
    pub fn then_flatten<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Future<T>) -> Future<U> + Send + 'static,
    {
        let promise = Promise::<U>::new();
        let downstream = promise.future();
        let callback: Continuation<T> = Box::new(move |done: Future<T>| {
            match catch_unwind(AssertUnwindSafe(|| f(done))) {
                Ok(inner) => {
                    let promise = promise.clone();
                    inner.register_internal(Box::new(move |resolved: Future<U>| match resolved.get() {
                        Ok(value) => {
                            let _ = promise.set_value(value);
                        }
                        Err(err) => {
                            let _ = promise.set_exception(err);
                        }
                    }));
                }
                Err(payload) => {
                    let _ = promise.set_exception(ToolkitError::UserException(describe_panic(payload)));
                }
            }
        });
        self.register_internal(callback);
        downstream
    }
}
