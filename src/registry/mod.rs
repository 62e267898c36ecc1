//! Thread-to-state bindings.
//!
//! A [`ContextRegistry`] owns one root state and hands every thread its own
//! state, parented to that root, on first access. Bindings can be replaced
//! temporarily ([`ContextRegistry::enter`]) or permanently
//! ([`ContextRegistry::swap`]) and are released when the thread exits.

mod binding;
mod manager;

pub use manager::{ContextRegistry, RegistryConfig, StateGuard};
