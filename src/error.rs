use thiserror::Error;

/// Errors triggered while resolving a context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// A required context was resolved outside of any scope and without a mock.
    #[error("Context not provided: `{name}` was resolved outside of any scope and has no mock")]
    NotProvided {
        /// Diagnostic name of the context
        name: &'static str,
    },
}
