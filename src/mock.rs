//! Test-time override of a context
//!
//! The mock slot of a context is consulted only when the current branch has no active scope for
//! it: a real scope always wins. The slot is process-wide, shared by every branch and every
//! task, and nothing resets it automatically. A mock stays in place until it is replaced or
//! removed with [Context::clear_mock]; tests sharing a context must serialize their setup.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::context::Policy;
use crate::storage::Builder;
use crate::Context;

enum Slot<T> {
    Unset,
    Value(T),
    Factory(Builder<T>),
}

/// Fallback value or factory of one context
pub(crate) struct MockSlot<T>(RwLock<Slot<T>>);

impl<T> Default for MockSlot<T> {
    fn default() -> Self {
        Self(RwLock::new(Slot::Unset))
    }
}

impl<T: Clone> MockSlot<T> {
    fn replace(&self, slot: Slot<T>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = slot;
    }

    fn is_set(&self) -> bool {
        !matches!(
            *self.0.read().unwrap_or_else(PoisonError::into_inner),
            Slot::Unset
        )
    }

    /// Current fallback value, calling the factory outside of the lock.
    pub(crate) fn get(&self) -> Option<T> {
        let factory = match &*self.0.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Unset => return None,
            Slot::Value(value) => return Some(value.clone()),
            Slot::Factory(factory) => factory.clone(),
        };
        Some(factory())
    }
}

impl<T: Clone + Send + Sync + 'static, P: Policy> Context<T, P> {
    /// Use a single instance when resolving outside of any scope.
    ///
    /// The builder is called once, immediately; every fallback resolve returns a clone of its
    /// result.
    pub fn set_mock(&self, builder: impl FnOnce() -> T) {
        let value = builder();
        trace!(context = self.name(), "mock value set");
        self.mock.replace(Slot::Value(value));
    }

    /// Build a new instance on every resolve made outside of any scope.
    pub fn set_mock_transient<F>(&self, builder: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        trace!(context = self.name(), "mock factory set");
        self.mock.replace(Slot::Factory(Arc::new(builder)));
    }

    /// Remove the mock, restoring the policy of the context as the last fallback.
    pub fn clear_mock(&self) {
        trace!(context = self.name(), "mock cleared");
        self.mock.replace(Slot::Unset);
    }

    pub fn is_mocked(&self) -> bool {
        self.mock.is_set()
    }
}
