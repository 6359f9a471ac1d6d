//! Typed per-context view over the branch snapshot
//!
//! A [StackStorage] owns no data: it identifies one context inside the current [Snapshot] and
//! gives typed access to that context's stack of frames.
//!
//! The key operation is [StackStorage::peek_and_remove]. A frame's builder is allowed to resolve
//! its own context (e.g. to wrap the previous logger). If the frame stayed visible while building,
//! that call would recurse into itself. The frame is therefore removed while it is invoked and
//! pushed back when the returned [FrameGuard] is dropped.
//!
//! The guard must be dropped within the same synchronous resolution step: it restores the frame
//! into whichever branch is current when it is dropped, and holding it across an `.await` would
//! leak the frame into another branch. The guard is `!Send` and never escapes this crate.

use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::branch::{self, ContextId, ErasedFrame, Snapshot};

/// Shared constructor of a provided value
pub(crate) type Builder<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Caching policy of a provided value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// Built lazily on first resolve, then shared for the rest of the scope
    Scoped,
    /// Built again on every resolve
    Transient,
}

/// One provided value, pushed for the extent of one scope
pub(crate) enum Frame<T> {
    Scoped { builder: Builder<T>, cell: OnceCell<T> },
    Transient { builder: Builder<T> },
}

impl<T: Clone> Frame<T> {
    /// Fresh frame: scoped frames get a new empty cache cell every time.
    pub(crate) fn new(lifetime: Lifetime, builder: Builder<T>) -> Self {
        match lifetime {
            Lifetime::Scoped => Frame::Scoped {
                builder,
                cell: OnceCell::new(),
            },
            Lifetime::Transient => Frame::Transient { builder },
        }
    }

    pub(crate) fn lifetime(&self) -> Lifetime {
        match self {
            Frame::Scoped { .. } => Lifetime::Scoped,
            Frame::Transient { .. } => Lifetime::Transient,
        }
    }

    /// Obtain the value, building it if needed.
    ///
    /// A panicking builder leaves a scoped cell empty, the next call retries.
    pub(crate) fn invoke(&self) -> T {
        match self {
            Frame::Scoped { builder, cell } => cell.get_or_init(|| builder()).clone(),
            Frame::Transient { builder } => builder(),
        }
    }
}

/// Stack of frames of one context, stored in the current branch
pub(crate) struct StackStorage<T> {
    id: ContextId,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StackStorage<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StackStorage<T> {}

impl<T: Clone + Send + Sync + 'static> StackStorage<T> {
    pub(crate) fn new() -> Self {
        Self {
            id: ContextId::next(),
            marker: PhantomData,
        }
    }

    /// Frames of this context visible in the current branch, innermost last.
    pub(crate) fn current_stack(&self) -> Vec<Arc<Frame<T>>> {
        branch::with_current_ref(|snapshot| {
            snapshot
                .frames(self.id)
                .iter()
                .filter_map(|frame| frame.clone().downcast::<Frame<T>>().ok())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Remove the innermost frame from the current branch until the guard is dropped.
    pub(crate) fn peek_and_remove(&self) -> Option<FrameGuard<T>> {
        let erased = branch::with_current(|snapshot| snapshot.pop(self.id)).flatten()?;
        match erased.clone().downcast::<Frame<T>>() {
            Ok(frame) => Some(FrameGuard {
                id: self.id,
                erased,
                frame,
                not_send: PhantomData,
            }),
            Err(_) => {
                // ids are unique per context, a foreign frame is never stored under ours
                branch::with_current(|snapshot| snapshot.push(self.id, erased));
                None
            }
        }
    }

    /// Push a frame onto a snapshot that is about to become a new branch.
    pub(crate) fn install(&self, snapshot: &mut Snapshot, frame: Frame<T>) {
        snapshot.push(self.id, Arc::new(frame));
    }

    /// Run `f` in a new branch: the current one plus `frame`.
    pub(crate) fn run<R>(&self, frame: Frame<T>, f: impl FnOnce() -> R) -> R {
        let mut snapshot = Snapshot::capture();
        self.install(&mut snapshot, frame);
        snapshot.run(f)
    }

    /// Drive `future` in a new branch: the one current at first poll plus `frame`.
    pub(crate) fn scope<F: Future>(
        &self,
        frame: Frame<T>,
        future: F,
    ) -> impl Future<Output = F::Output> {
        let storage = *self;
        async move {
            let mut snapshot = Snapshot::capture();
            storage.install(&mut snapshot, frame);
            snapshot.scope(future).await
        }
    }
}

/// A frame temporarily removed from the current branch
pub(crate) struct FrameGuard<T> {
    id: ContextId,
    erased: ErasedFrame,
    frame: Arc<Frame<T>>,
    not_send: PhantomData<*const ()>,
}

impl<T> Deref for FrameGuard<T> {
    type Target = Frame<T>;

    fn deref(&self) -> &Frame<T> {
        &self.frame
    }
}

impl<T> Drop for FrameGuard<T> {
    fn drop(&mut self) {
        let erased = self.erased.clone();
        branch::with_current(|snapshot| snapshot.push(self.id, erased));
    }
}
