//! Scoped value injection for synchronous and asynchronous call trees.
//!
//! # Simple use case
//!
//! ```
//! # use std::sync::Arc;
//! # use ambit::*;
//! # use once_cell::sync::Lazy;
//! // Define the injected type
//! struct Database {
//!     url: String,
//! }
//!
//! // Declare a context, shared by providers and consumers
//! static DATABASE: Lazy<Context<Arc<Database>>> = Lazy::new(Context::new);
//!
//! // Deep inside the call tree, resolve it without passing it around
//! fn handler() -> Result<String, ContextError> {
//!     let db = DATABASE.resolve()?;
//!     Ok(db.url.clone())
//! }
//!
//! # fn main() -> Result<(), ContextError> {
//! // Provide a value for the extent of a call
//! let url = DATABASE
//!     .provide(|| Arc::new(Database { url: "postgres://localhost".into() }))
//!     .run(handler)?;
//! assert_eq!(url, "postgres://localhost");
//!
//! // Outside of the scope, the context is no longer provided
//! assert!(handler().is_err());
//! # Ok(())
//! # }
//! ```
//!
//! # Mechanism
//!
//! Each logical branch of execution carries a [Snapshot]: for every context, the stack of frames
//! provided by its ancestors. The snapshot lives in a tokio task-local, so it follows a future
//! through every `.await`, while concurrent siblings (`tokio::join!` arms, spawned tasks) keep
//! their own copy.
//!
//! * A [Context] identifies one value. [Context::new] creates a required context, whose
//!   resolution fails with [ContextError::NotProvided] outside of any scope;
//!   [Context::optional] creates one resolving to `None` instead.
//! * A [Provision] is a context paired with a builder. Scoped provisions ([Context::provide])
//!   build lazily, at most once per scope. Transient provisions ([Context::provide_transient])
//!   build on every resolve.
//! * [Provision::run] and [Provision::scope] push a frame for the extent of a synchronous
//!   function or of a future. Nested scopes of the same context shadow the outer one, and a
//!   builder resolving its own context sees the enclosing scope.
//! * A [Composition] enters several scopes at once (see [contexts!] and [with_contexts]).
//! * The mock slot ([Context::set_mock]) is a process-wide fallback used when no scope is active.
//!
//! Task-locals are not inherited by new tasks: use [spawn], [spawn_blocking] or an explicit
//! [Snapshot] to carry the current branch into them.

mod branch;
mod compose;
mod context;
mod error;
mod mock;
mod storage;

pub use branch::{spawn, spawn_blocking, Snapshot};
pub use compose::{with_contexts, Composition, Establish};
pub use context::{Context, Optional, OptionalContext, Policy, Provision, Required};
pub use error::ContextError;
pub use storage::Lifetime;
