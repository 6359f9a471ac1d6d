//! Establish several scopes at once

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::{Provision, Snapshot};

/// Anything that can push frames onto a branch about to be entered.
///
/// Implemented by [Provision] and [Composition]. Implement it on your own types to bundle the
/// provisions a subsystem needs, then use them in a [Composition].
pub trait Establish: Send + Sync {
    /// Push frames onto `snapshot`, outermost first.
    fn install(&self, snapshot: &mut Snapshot);
}

impl<T: Clone + Send + Sync + 'static> Establish for Provision<T> {
    fn install(&self, snapshot: &mut Snapshot) {
        self.install_into(snapshot);
    }
}

/// Ordered list of scopes entered together.
///
/// The first scope is the outermost and the last one the innermost: when two of them provide
/// the same context, the later one shadows the earlier one. Running an empty composition calls
/// the continuation directly.
#[derive(Clone, Default)]
pub struct Composition {
    scopes: Vec<Arc<dyn Establish>>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an innermost scope.
    pub fn and(mut self, scope: impl Establish + 'static) -> Self {
        self.scopes.push(Arc::new(scope));
        self
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Run a synchronous continuation with every scope active.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.branch() {
            Some(snapshot) => snapshot.run(f),
            None => f(),
        }
    }

    /// Drive a future with every scope active.
    ///
    /// The scopes are installed on top of the branch current at first poll.
    pub fn scope<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
        let composition = self.clone();
        async move {
            match composition.branch() {
                Some(snapshot) => snapshot.scope(future).await,
                None => future.await,
            }
        }
    }

    fn branch(&self) -> Option<Snapshot> {
        if self.scopes.is_empty() {
            return None;
        }
        let mut snapshot = Snapshot::capture();
        self.install(&mut snapshot);
        Some(snapshot)
    }
}

impl Establish for Composition {
    fn install(&self, snapshot: &mut Snapshot) {
        for scope in &self.scopes {
            scope.install(snapshot);
        }
    }
}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composition")
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> From<Provision<T>> for Arc<dyn Establish> {
    fn from(provision: Provision<T>) -> Self {
        Arc::new(provision)
    }
}

impl From<Composition> for Arc<dyn Establish> {
    fn from(composition: Composition) -> Self {
        Arc::new(composition)
    }
}

/// Compose already prepared scopes, outermost first.
///
/// Accepts any list of provisions of one value type, or of `Arc<dyn Establish>`. For scopes of
/// different types, [contexts!] is the simpler entry point.
pub fn with_contexts<I>(scopes: I) -> Composition
where
    I: IntoIterator,
    I::Item: Into<Arc<dyn Establish>>,
{
    Composition {
        scopes: scopes.into_iter().map(Into::into).collect(),
    }
}

/// Build a [Composition] from a list of scopes, outermost first.
///
/// ```
/// # use ambit::*;
/// let user: Context<&'static str> = Context::new();
/// let tenant: Context<u32> = Context::new();
///
/// let both = contexts![user.provide(|| "alice"), tenant.provide(|| 7)];
/// both.run(|| {
///     assert_eq!(user.resolve(), Ok("alice"));
///     assert_eq!(tenant.resolve(), Ok(7));
/// });
/// ```
#[macro_export]
macro_rules! contexts {
    ($($scope:expr),* $(,)?) => {
        $crate::Composition::new()$(.and($scope))*
    };
}
