//! Lazy, per-state service resolution.
//!
//! A service is resolved against a [`State`](crate::State): the first
//! lookup constructs the instance and memoizes it on that state, later
//! lookups on the same state return the same `Arc`.
//!
//! Construction strategies are inherited through the parent chain,
//! instances are not. A child state therefore builds its own instance with
//! whatever factory its nearest ancestor registered, unless that factory is
//! a [`ParentDelegate`], which explicitly reuses the parent's instance.
//!
//! # Example
//!
//! ```ignore
//! struct Clock { started: Timestamp }
//!
//! impl Service for Clock {
//!     fn create(_state: &Arc<State>) -> Result<Self> {
//!         Ok(Clock { started: Timestamp::now() })
//!     }
//! }
//!
//! let clock = contextual::lookup::<Clock>()?;
//! assert!(Arc::ptr_eq(&clock, &contextual::lookup::<Clock>()?));
//! ```

mod factory;
mod resolver;

pub use factory::{Constructor, FnFactory, ParentDelegate, Service, ServiceFactory};
pub(crate) use resolver::resolve_with;
