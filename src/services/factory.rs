//! Construction strategies for services.

use crate::error::Result;
use crate::state::{Instance, State};
use std::marker::PhantomData;
use std::sync::Arc;

/// A service constructed on demand and memoized per state.
///
/// The type itself is the lookup key: `lookup::<S>()` resolves
/// `ServiceKey::of::<S>()` and falls back to `S::create` when no factory
/// override is registered on the state or its ancestors.
pub trait Service: Send + Sync + Sized + 'static {
    /// Build a fresh instance for `state`.
    ///
    /// Errors propagate unchanged to the caller of the lookup, and nothing
    /// is stored on the state.
    fn create(state: &Arc<State>) -> Result<Self>;
}

/// Plain constructor function for a service type.
pub type Constructor<S> = fn(&Arc<State>) -> Result<S>;

/// A type-erased construction strategy registered under a service key.
///
/// Factories registered on a state apply to that state and every
/// descendant that does not register its own.
pub trait ServiceFactory: Send + Sync {
    /// Produce the instance to memoize on `state`.
    fn create(&self, state: &Arc<State>) -> Result<Instance>;
}

/// Factory backed by a closure returning an owned value.
pub struct FnFactory<S, F> {
    f: F,
    _marker: PhantomData<fn() -> S>,
}

impl<S, F> FnFactory<S, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<S, F> ServiceFactory for FnFactory<S, F>
where
    S: Send + Sync + 'static,
    F: Fn(&Arc<State>) -> Result<S> + Send + Sync,
{
    fn create(&self, state: &Arc<State>) -> Result<Instance> {
        let instance: Instance = Arc::new((self.f)(state)?);
        Ok(instance)
    }
}

/// Factory that reuses the parent's instance instead of building one.
///
/// The parent resolves through its own factories, so registering this on
/// a state makes the whole subtree share whatever the nearest state without
/// a delegate produces. At a root it constructs with `S::create`.
pub struct ParentDelegate<S> {
    _marker: PhantomData<fn() -> S>,
}

impl<S> ParentDelegate<S> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<S> Default for ParentDelegate<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Service> ServiceFactory for ParentDelegate<S> {
    fn create(&self, state: &Arc<State>) -> Result<Instance> {
        let instance: Arc<S> = match state.parent() {
            Some(parent) => parent.resolve::<S>()?,
            None => Arc::new(S::create(state)?),
        };
        let erased: Instance = instance;
        Ok(erased)
    }
}
