//! State node implementation.

use crate::error::{ContextError, Result};
use crate::services::{self, FnFactory, ParentDelegate, Service, ServiceFactory};
use crate::types::{ServiceKey, StateId, StateOrigin, Timestamp};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type-erased service instance as stored on a state.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// One execution context's isolated scope for resolved service instances.
///
/// States form a parent-linked tree whose top is the registry root. Each
/// state owns the instances resolved on it; instances are never looked up
/// in ancestors. Factory overrides, on the other hand, are inherited by
/// every descendant.
///
/// Equality and hashing use identity only. Two states created from the same
/// parent are never equal.
pub struct State {
    /// Process-unique identity.
    id: StateId,

    /// The state that scoped-created this one. `None` only for a root.
    parent: Option<Arc<State>>,

    origin: StateOrigin,

    created: Timestamp,

    /// Memoized service instances.
    services: RwLock<HashMap<ServiceKey, Instance>>,

    /// Construction strategies registered on this state.
    factories: RwLock<HashMap<ServiceKey, Arc<dyn ServiceFactory>>>,
}

impl State {
    fn with_parent(parent: Option<Arc<State>>, origin: StateOrigin) -> Arc<Self> {
        Arc::new(Self {
            id: StateId::next(),
            parent,
            origin,
            created: Timestamp::now(),
            services: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
        })
    }

    /// Create a new ancestor-less root.
    pub(crate) fn new_root() -> Arc<Self> {
        Self::with_parent(None, StateOrigin::Root)
    }

    /// Create a state parented to `parent`.
    pub(crate) fn new_child(parent: &Arc<State>, origin: StateOrigin) -> Arc<Self> {
        Self::with_parent(Some(Arc::clone(parent)), origin)
    }

    /// Create a child scope of this state.
    ///
    /// The child starts without instances but inherits every factory
    /// registered on this state and its ancestors.
    pub fn child(self: &Arc<Self>) -> Arc<State> {
        Self::new_child(self, StateOrigin::Child(self.id))
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    /// The parent state, or `None` for a root.
    pub fn parent(&self) -> Option<&Arc<State>> {
        self.parent.as_ref()
    }

    pub fn origin(&self) -> StateOrigin {
        self.origin
    }

    pub fn created(&self) -> Timestamp {
        self.created
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Number of ancestors between this state and its root.
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Iterate over ancestors, nearest first, ending at the root.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent.as_ref(),
        }
    }

    /// Whether `other` is this state or one of its ancestors.
    pub fn descends_from(&self, other: &State) -> bool {
        self == other || self.ancestors().any(|a| **a == *other)
    }

    // --- Services ---

    /// Resolve `S` under its default key, constructing it on first use.
    pub fn resolve<S: Service>(self: &Arc<Self>) -> Result<Arc<S>> {
        let create: services::Constructor<S> = S::create;
        services::resolve_with(self, ServiceKey::of::<S>(), Some(create))
    }

    /// Resolve the service registered under `key`.
    ///
    /// Named keys have no built-in construction strategy: a factory must be
    /// registered on this state or an ancestor, or a value provided.
    pub fn resolve_key<S>(self: &Arc<Self>, key: ServiceKey) -> Result<Arc<S>>
    where
        S: Send + Sync + 'static,
    {
        services::resolve_with::<S>(self, key, None)
    }

    /// The instance already resolved under `key`, without constructing.
    pub fn get_resolved<S>(&self, key: ServiceKey) -> Option<Arc<S>>
    where
        S: Send + Sync + 'static,
    {
        self.cached(&key)
            .and_then(|instance| instance.downcast::<S>().ok())
    }

    pub fn is_resolved(&self, key: &ServiceKey) -> bool {
        self.services.read().contains_key(key)
    }

    /// Number of instances memoized on this state.
    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    /// Store a pre-built instance under `key`.
    ///
    /// This is the explicit way to share one instance between states.
    pub fn provide<S>(&self, key: ServiceKey, instance: Arc<S>) -> Result<()>
    where
        S: Send + Sync + 'static,
    {
        if !key.is::<S>() {
            return Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: key.type_name(),
            });
        }

        let mut services = self.services.write();
        if services.contains_key(&key) {
            return Err(ContextError::AlreadyResolved(key.to_string()));
        }
        services.insert(key, instance);
        Ok(())
    }

    /// Register a closure as the construction strategy for `key` on this
    /// state and its descendants.
    pub fn set_factory<S, F>(&self, key: ServiceKey, factory: F) -> Result<()>
    where
        S: Send + Sync + 'static,
        F: Fn(&Arc<State>) -> Result<S> + Send + Sync + 'static,
    {
        if !key.is::<S>() {
            return Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: key.type_name(),
            });
        }
        self.register_factory(key, Arc::new(FnFactory::new(factory)))
    }

    /// Register an arbitrary construction strategy for `key`.
    ///
    /// Fails if `key` was already resolved on this state, since existing
    /// callers already hold the old instance. A construction already in
    /// progress on another thread still stores its instance, so the new
    /// strategy only applies to lookups that start afterwards.
    pub fn register_factory(&self, key: ServiceKey, factory: Arc<dyn ServiceFactory>) -> Result<()> {
        // Held across the insert so a concurrent store cannot slip in between.
        let services = self.services.read();
        if services.contains_key(&key) {
            return Err(ContextError::AlreadyResolved(key.to_string()));
        }
        self.factories.write().insert(key, factory);
        drop(services);
        Ok(())
    }

    /// Make `S` on this state and its descendants reuse the instance of the
    /// nearest ancestor instead of constructing their own.
    pub fn delegate_to_parent<S: Service>(&self) -> Result<()> {
        self.register_factory(ServiceKey::of::<S>(), Arc::new(ParentDelegate::<S>::new()))
    }

    // --- Internal accessors for the resolver ---

    pub(crate) fn cached(&self, key: &ServiceKey) -> Option<Instance> {
        self.services.read().get(key).cloned()
    }

    /// Store `instance` unless another one won the race; return the winner.
    pub(crate) fn store_if_absent(&self, key: ServiceKey, instance: Instance) -> Instance {
        self.services
            .write()
            .entry(key)
            .or_insert(instance)
            .clone()
    }

    /// The nearest factory for `key`, searching this state then ancestors.
    pub(crate) fn find_factory(&self, key: &ServiceKey) -> Option<(StateId, Arc<dyn ServiceFactory>)> {
        if let Some(factory) = self.factories.read().get(key) {
            return Some((self.id, Arc::clone(factory)));
        }
        self.ancestors().find_map(|state| {
            state
                .factories
                .read()
                .get(key)
                .map(|factory| (state.id, Arc::clone(factory)))
        })
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .field("origin", &self.origin)
            .field("services", &self.service_count())
            .finish()
    }
}

/// Iterator over a state's ancestors, nearest first.
pub struct Ancestors<'a> {
    next: Option<&'a Arc<State>>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Arc<State>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent.as_ref();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    impl Service for Counter {
        fn create(_state: &Arc<State>) -> Result<Self> {
            Ok(Counter::default())
        }
    }

    #[test]
    fn test_root_has_no_parent() {
        let root = State::new_root();
        assert!(root.is_root());
        assert!(root.parent().is_none());
        assert_eq!(root.depth(), 0);
        assert_eq!(root.origin(), StateOrigin::Root);
    }

    #[test]
    fn test_child_links_to_parent() {
        let root = State::new_root();
        let child = root.child();
        let grandchild = child.child();

        assert_eq!(child.parent(), Some(&root));
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.origin(), StateOrigin::Child(child.id()));
        assert!(grandchild.descends_from(&root));
        assert!(!root.descends_from(&grandchild));

        let chain: Vec<StateId> = grandchild.ancestors().map(|s| s.id()).collect();
        assert_eq!(chain, vec![child.id(), root.id()]);
    }

    #[test]
    fn test_identity_equality() {
        let root = State::new_root();
        let a = root.child();
        let b = root.child();
        assert_ne!(a, b);
        assert_eq!(a, Arc::clone(&a));
    }

    #[test]
    fn test_resolve_memoizes() {
        let state = State::new_root().child();
        let first = state.resolve::<Counter>().unwrap();
        first.hits.fetch_add(1, Ordering::SeqCst);

        let second = state.resolve::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.hits.load(Ordering::SeqCst), 1);
        assert_eq!(state.service_count(), 1);
    }

    #[test]
    fn test_instances_not_inherited() {
        let root = State::new_root();
        let from_root = root.resolve::<Counter>().unwrap();
        let child = root.child();
        let from_child = child.resolve::<Counter>().unwrap();
        assert!(!Arc::ptr_eq(&from_root, &from_child));
    }

    #[test]
    fn test_get_resolved_does_not_construct() {
        let state = State::new_root();
        let key = ServiceKey::of::<Counter>();
        assert!(state.get_resolved::<Counter>(key).is_none());
        assert!(!state.is_resolved(&key));

        let resolved = state.resolve::<Counter>().unwrap();
        let peeked = state.get_resolved::<Counter>(key).unwrap();
        assert!(Arc::ptr_eq(&resolved, &peeked));
    }

    #[test]
    fn test_provide_shares_instance() {
        let root = State::new_root();
        let a = root.child();
        let b = root.child();

        let shared = a.resolve::<Counter>().unwrap();
        b.provide(ServiceKey::of::<Counter>(), Arc::clone(&shared)).unwrap();

        assert!(Arc::ptr_eq(&shared, &b.resolve::<Counter>().unwrap()));
    }

    #[test]
    fn test_provide_after_resolve_fails() {
        let state = State::new_root();
        state.resolve::<Counter>().unwrap();
        let result = state.provide(ServiceKey::of::<Counter>(), Arc::new(Counter::default()));
        assert!(matches!(result, Err(ContextError::AlreadyResolved(_))));
    }

    #[test]
    fn test_register_factory_after_resolve_on_other_thread() {
        let state = State::new_root().child();
        let key = ServiceKey::of::<Counter>();

        std::thread::scope(|scope| {
            scope.spawn(|| state.resolve::<Counter>().unwrap());
        });

        let result = state.set_factory(key, |_| Ok(Counter::default()));
        assert!(matches!(result, Err(ContextError::AlreadyResolved(_))));
    }

    #[test]
    fn test_racing_register_and_resolve_keep_one_instance() {
        let state = State::new_root().child();
        let key = ServiceKey::of::<Counter>();

        let (registered, resolved) = std::thread::scope(|scope| {
            let register = scope.spawn(|| state.set_factory(key, |_| Ok(Counter::default())));
            let resolve = scope.spawn(|| state.resolve::<Counter>().unwrap());
            (register.join().unwrap(), resolve.join().unwrap())
        });

        // Whichever side won, later lookups see the memoized instance and
        // further registration is refused.
        assert!(registered.is_ok() || matches!(registered, Err(ContextError::AlreadyResolved(_))));
        assert!(Arc::ptr_eq(&resolved, &state.resolve::<Counter>().unwrap()));
        assert!(matches!(
            state.set_factory(key, |_| Ok(Counter::default())),
            Err(ContextError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_provide_wrong_type() {
        let state = State::new_root();
        let result = state.provide(ServiceKey::of::<Counter>(), Arc::new(42u32));
        assert!(matches!(result, Err(ContextError::TypeMismatch { .. })));
    }
}
