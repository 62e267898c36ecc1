//! Parent-linked state nodes.
//!
//! A state is an isolated scope for resolved service instances. Every
//! thread's state is parented to the registry root; child states can be
//! created from any state and inherit its factory overrides.

mod node;

pub use node::{Ancestors, Instance, State};
