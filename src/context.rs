//! Contexts and their providers
//!
//! A [Context] identifies one injectable value. It is usually created once, in a static, and
//! shared by the code providing the value and the code resolving it.
//!
//! * [Context::provide] and [Context::provide_transient] create a reusable [Provision].
//!   Running a continuation with [Provision::run] or [Provision::scope] establishes a scope:
//!   the value is visible to everything the continuation does, including its asynchronous work.
//! * [Context::resolve] returns the value of the innermost active scope of the current branch.
//!   Without one, it falls back to the mock slot (see [Context::set_mock]), then to the
//!   resolution [Policy] of the context.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::mock::MockSlot;
use crate::storage::{Builder, Frame, Lifetime, StackStorage};
use crate::ContextError;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Required {}
    impl Sealed for super::Optional {}
}

/// What a resolve returns when no scope is active and no mock is set
pub trait Policy: sealed::Sealed + Send + Sync + 'static {
    /// True if resolving an unprovided context is an error
    const REQUIRED: bool;

    /// Result of [Context::resolve]
    type Resolved<T>;

    /// Turn the outcome of a lookup into the result of [Context::resolve].
    fn settle<T>(found: Option<T>, name: &'static str) -> Self::Resolved<T>;
}

/// Resolving an unprovided context fails with [ContextError::NotProvided]
#[derive(Debug)]
pub enum Required {}

/// Resolving an unprovided context returns `None`
#[derive(Debug)]
pub enum Optional {}

impl Policy for Required {
    const REQUIRED: bool = true;
    type Resolved<T> = Result<T, ContextError>;

    fn settle<T>(found: Option<T>, name: &'static str) -> Result<T, ContextError> {
        found.ok_or_else(|| {
            debug!(context = name, "required context not provided");
            ContextError::NotProvided { name }
        })
    }
}

impl Policy for Optional {
    const REQUIRED: bool = false;
    type Resolved<T> = Option<T>;

    fn settle<T>(found: Option<T>, _name: &'static str) -> Option<T> {
        found
    }
}

/// One injectable value.
///
/// The policy parameter is fixed at creation: [Context::new] builds a required context and
/// [Context::optional] an optional one.
pub struct Context<T, P = Required> {
    storage: StackStorage<T>,
    name: &'static str,
    pub(crate) mock: MockSlot<T>,
    policy: PhantomData<P>,
}

/// Context resolving to `None` when not provided
pub type OptionalContext<T> = Context<T, Optional>;

impl<T: Clone + Send + Sync + 'static> Context<T, Required> {
    /// Create a required context named after the value type.
    pub fn new() -> Self {
        Self::with_name(std::any::type_name::<T>())
    }

    /// Create a required context with a custom name used in errors and logs.
    pub fn named(name: &'static str) -> Self {
        Self::with_name(name)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Context<T, Required> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Context<T, Optional> {
    /// Create an optional context named after the value type.
    pub fn optional() -> Self {
        Self::with_name(std::any::type_name::<T>())
    }

    /// Create an optional context with a custom name used in logs.
    pub fn optional_named(name: &'static str) -> Self {
        Self::with_name(name)
    }
}

impl<T: Clone + Send + Sync + 'static, P: Policy> Context<T, P> {
    fn with_name(name: &'static str) -> Self {
        Self {
            storage: StackStorage::new(),
            name,
            mock: MockSlot::default(),
            policy: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_required(&self) -> bool {
        P::REQUIRED
    }

    /// Obtain the value provided by the innermost active scope.
    ///
    /// The frame being resolved is hidden while its builder runs: a builder resolving its own
    /// context gets the value of the enclosing scope (or the fallback), not itself.
    pub fn resolve(&self) -> P::Resolved<T> {
        P::settle(self.lookup(), self.name)
    }

    /// True if a resolve would currently find a value, from a scope or a mock.
    pub fn is_provided(&self) -> bool {
        self.depth() > 0 || self.is_mocked()
    }

    /// Number of scopes of this context active in the current branch.
    pub fn depth(&self) -> usize {
        self.storage.current_stack().len()
    }

    /// Prepare a scoped provision: the builder runs at most once per scope, on first resolve.
    pub fn provide<F>(&self, builder: F) -> Provision<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.provision(Lifetime::Scoped, Arc::new(builder))
    }

    /// Prepare a transient provision: the builder runs on every resolve.
    pub fn provide_transient<F>(&self, builder: F) -> Provision<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.provision(Lifetime::Transient, Arc::new(builder))
    }

    fn provision(&self, lifetime: Lifetime, builder: Builder<T>) -> Provision<T> {
        Provision {
            storage: self.storage,
            name: self.name,
            lifetime,
            builder,
        }
    }

    fn lookup(&self) -> Option<T> {
        if let Some(frame) = self.storage.peek_and_remove() {
            trace!(context = self.name, lifetime = ?frame.lifetime(), "resolving from scope");
            return Some(frame.invoke());
        }
        self.mock.get().map(|value| {
            trace!(context = self.name, "resolving from mock");
            value
        })
    }
}

impl<T, P: Policy> fmt::Debug for Context<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("required", &P::REQUIRED)
            .finish_non_exhaustive()
    }
}

/// A value ready to be provided to any number of independent scopes.
///
/// Obtained from [Context::provide] or [Context::provide_transient]. Every call to
/// [run](Provision::run) or [scope](Provision::scope) establishes a new scope; scoped
/// provisions get a fresh cache for each of them.
pub struct Provision<T> {
    storage: StackStorage<T>,
    name: &'static str,
    lifetime: Lifetime,
    builder: Builder<T>,
}

impl<T> Clone for Provision<T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage,
            name: self.name,
            lifetime: self.lifetime,
            builder: self.builder.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Provision<T> {
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Run a synchronous continuation inside a new scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        trace!(context = self.name, lifetime = ?self.lifetime, "entering scope");
        self.storage.run(self.frame(), f)
    }

    /// Drive a future inside a new scope.
    ///
    /// The scope starts from the branch current when the returned future is first polled, so
    /// a scoped future can be built ahead of time and still see the scopes it is awaited in.
    pub fn scope<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
        trace!(context = self.name, lifetime = ?self.lifetime, "entering async scope");
        self.storage.scope(self.frame(), future)
    }

    pub(crate) fn install_into(&self, snapshot: &mut crate::Snapshot) {
        self.storage.install(snapshot, self.frame());
    }

    fn frame(&self) -> Frame<T> {
        Frame::new(self.lifetime, self.builder.clone())
    }
}

impl<T> fmt::Debug for Provision<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provision")
            .field("context", &self.name)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}
