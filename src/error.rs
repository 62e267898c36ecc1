//! Error types for context and service resolution.

use thiserror::Error;

/// Main error type for service resolution.
///
/// Registry operations never fail; every variant here comes from resolving
/// or registering a service on a [`State`](crate::State).
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Service construction failed: {0}")]
    Construction(String),

    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),

    #[error("No factory registered for service: {0}")]
    NoFactory(String),

    #[error("Type mismatch for service {key}: expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Cyclic dependency while constructing service: {0}")]
    CyclicDependency(String),

    #[error("Service already resolved on this state: {0}")]
    AlreadyResolved(String),
}

impl ContextError {
    /// Wrap an arbitrary error raised by a service factory.
    pub fn custom(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ContextError::Custom(Box::new(err))
    }
}

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;
