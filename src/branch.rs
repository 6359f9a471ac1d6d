//! Branch propagation primitive
//!
//! A *branch* is one logical tree of execution: a synchronous call, or a future and every
//! `.await` inside it. Each branch sees a [Snapshot] holding, for every context, the stack of
//! frames provided by its ancestors. The snapshot lives in a tokio task-local slot, so it follows
//! the future across suspension points and thread migrations of the work-stealing scheduler.
//!
//! Entering a scope never mutates the caller's snapshot: the snapshot is cloned, the new frame is
//! pushed onto the clone, and the continuation runs with the clone installed. Sibling branches
//! therefore never observe each other's frames.
//!
//! Tokio does not copy task-locals into newly spawned tasks. Use [spawn] and [spawn_blocking]
//! (or an explicit [Snapshot]) to hand the current branch over to a new task or thread.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Type-erased frame, downcast by the owning [crate::storage::StackStorage]
pub(crate) type ErasedFrame = Arc<dyn Any + Send + Sync>;

/// Process-wide unique identity of a context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

tokio::task_local! {
    /// Frames visible to the current branch. Unset outside of any scope.
    static BRANCH: RefCell<Snapshot>;
}

/// Frozen copy of the frames visible to a branch.
///
/// Capture it where a value is provided and [run](Snapshot::run) or [scope](Snapshot::scope)
/// work with it somewhere else, for example on a thread the runtime does not manage.
///
/// ```
/// # use ambit::*;
/// let config: Context<&'static str> = Context::new();
///
/// let snapshot = config.provide(|| "prod").run(Snapshot::capture);
/// let handle = std::thread::spawn(move || snapshot.run(|| config.resolve()));
/// assert_eq!(handle.join().unwrap(), Ok("prod"));
/// ```
#[derive(Clone, Default)]
pub struct Snapshot {
    stacks: HashMap<ContextId, Vec<ErasedFrame>>,
}

impl Snapshot {
    /// Copy the current branch, or an empty snapshot outside of any scope.
    pub fn capture() -> Self {
        BRANCH
            .try_with(|branch| branch.borrow().clone())
            .unwrap_or_default()
    }

    /// True if no frame of any context is visible in this snapshot.
    pub fn is_empty(&self) -> bool {
        self.stacks.values().all(Vec::is_empty)
    }

    /// Run a synchronous function in a new branch starting from this snapshot.
    pub fn run<R>(self, f: impl FnOnce() -> R) -> R {
        BRANCH.sync_scope(RefCell::new(self), f)
    }

    /// Drive a future in a new branch starting from this snapshot.
    ///
    /// The snapshot is installed each time the future is polled, including after every
    /// suspension point.
    pub fn scope<F: Future>(self, future: F) -> impl Future<Output = F::Output> {
        BRANCH.scope(RefCell::new(self), future)
    }

    pub(crate) fn push(&mut self, id: ContextId, frame: ErasedFrame) {
        self.stacks.entry(id).or_default().push(frame);
    }

    pub(crate) fn pop(&mut self, id: ContextId) -> Option<ErasedFrame> {
        self.stacks.get_mut(&id)?.pop()
    }

    pub(crate) fn frames(&self, id: ContextId) -> &[ErasedFrame] {
        self.stacks.get(&id).map(Vec::as_slice).unwrap_or_default()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frames: usize = self.stacks.values().map(Vec::len).sum();
        f.debug_struct("Snapshot")
            .field("contexts", &self.stacks.len())
            .field("frames", &frames)
            .finish()
    }
}

/// Read the current branch, if any.
pub(crate) fn with_current_ref<R>(f: impl FnOnce(&Snapshot) -> R) -> Option<R> {
    BRANCH
        .try_with(|branch| branch.try_borrow().ok().map(|b| f(&b)))
        .ok()
        .flatten()
}

/// Mutate the current branch in place, if any.
///
/// The closure must not call back into user code: the branch stays borrowed while it runs.
pub(crate) fn with_current<R>(f: impl FnOnce(&mut Snapshot) -> R) -> Option<R> {
    BRANCH
        .try_with(|branch| branch.try_borrow_mut().ok().map(|mut b| f(&mut b)))
        .ok()
        .flatten()
}

/// Spawn a tokio task that inherits the current branch.
///
/// Frames provided by the caller stay visible inside the task, and scoped values already
/// built by the caller are shared with it.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(Snapshot::capture().scope(future))
}

/// Run a blocking closure on tokio's blocking pool with the current branch.
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let snapshot = Snapshot::capture();
    tokio::task::spawn_blocking(move || snapshot.run(f))
}
