//! # Contextual
//!
//! Context-safe replacements for global variables and singletons.
//!
//! ## Core Concepts
//!
//! - **State**: A node in a parent-linked tree holding one context's
//!   resolved services
//! - **Root**: The single ancestor-less state shared by the whole process
//! - **Registry**: Binds each thread to its own state, created lazily and
//!   parented to the root
//! - **Services**: Lazily constructed, memoized per state, resolved with
//!   `lookup`
//!
//! ## Example
//!
//! ```ignore
//! use contextual::{lookup, Service, State, Result};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct RequestLog { lines: parking_lot::Mutex<Vec<String>> }
//!
//! impl Service for RequestLog {
//!     fn create(_state: &Arc<State>) -> Result<Self> {
//!         Ok(RequestLog::default())
//!     }
//! }
//!
//! // Same instance for every lookup on this thread...
//! let log = lookup::<RequestLog>()?;
//! assert!(Arc::ptr_eq(&log, &lookup::<RequestLog>()?));
//!
//! // ...and a separate one on every other thread.
//! assert_eq!(State::get().parent(), Some(&State::root()));
//! ```

pub mod error;
pub mod global;
pub mod registry;
pub mod services;
pub mod state;
pub mod types;

// Re-exports
pub use error::{ContextError, Result};
pub use global::{global, lookup, lookup_key};
pub use registry::{ContextRegistry, RegistryConfig, StateGuard};
pub use services::{Constructor, FnFactory, ParentDelegate, Service, ServiceFactory};
pub use state::{Ancestors, Instance, State};
pub use types::*;
