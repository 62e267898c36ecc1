//! Service resolution against a state.

use crate::error::{ContextError, Result};
use crate::state::{Instance, State};
use crate::types::{ServiceKey, StateId};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::trace;

use super::factory::Constructor;

thread_local! {
    /// Keys currently under construction on this thread.
    static RESOLVING: RefCell<Vec<(StateId, ServiceKey)>> = const { RefCell::new(Vec::new()) };
}

/// Marks `(state, key)` as under construction for the current thread.
///
/// Untracked when the thread's locals are already torn down, e.g. for a
/// lookup made from another thread-local's destructor. Cycles are not
/// detected in that case.
struct ResolutionFrame {
    tracked: bool,
}

impl ResolutionFrame {
    fn enter(state: StateId, key: ServiceKey) -> Result<Self> {
        let pushed = RESOLVING.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&(state, key)) {
                let chain: Vec<&str> = stack
                    .iter()
                    .filter(|(id, _)| *id == state)
                    .map(|(_, k)| k.name())
                    .chain(std::iter::once(key.name()))
                    .collect();
                return Err(ContextError::CyclicDependency(chain.join(" -> ")));
            }
            stack.push((state, key));
            Ok(())
        });

        match pushed {
            Ok(result) => result.map(|()| ResolutionFrame { tracked: true }),
            Err(_) => Ok(ResolutionFrame { tracked: false }),
        }
    }
}

impl Drop for ResolutionFrame {
    fn drop(&mut self) {
        if self.tracked {
            let _ = RESOLVING.try_with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }
}

fn downcast<S>(key: ServiceKey, instance: Instance) -> Result<Arc<S>>
where
    S: Send + Sync + 'static,
{
    instance.downcast::<S>().map_err(|_| ContextError::TypeMismatch {
        key: key.to_string(),
        expected: std::any::type_name::<S>(),
    })
}

/// Return the instance memoized under `key` on `state`, constructing and
/// storing it first if absent.
///
/// The construction strategy is the nearest factory registered on `state`
/// or an ancestor, then `fallback`. Construction runs without holding any
/// state lock so factories may resolve other services; if another thread
/// stores an instance first, that one is returned.
pub(crate) fn resolve_with<S>(
    state: &Arc<State>,
    key: ServiceKey,
    fallback: Option<Constructor<S>>,
) -> Result<Arc<S>>
where
    S: Send + Sync + 'static,
{
    if let Some(existing) = state.cached(&key) {
        trace!(state = %state.id(), service = %key, "service lookup hit");
        return downcast(key, existing);
    }

    let _frame = ResolutionFrame::enter(state.id(), key)?;

    let instance: Instance = match state.find_factory(&key) {
        Some((owner, factory)) => {
            trace!(state = %state.id(), service = %key, factory_owner = %owner, "constructing from factory");
            factory.create(state)?
        }
        None => match fallback {
            Some(create) => {
                trace!(state = %state.id(), service = %key, "constructing with default constructor");
                let built: Instance = Arc::new(create(state)?);
                built
            }
            None => return Err(ContextError::NoFactory(key.to_string())),
        },
    };

    // Reject before storing so a bad factory leaves the state untouched.
    let typed = downcast::<S>(key, instance)?;
    let erased: Instance = typed;
    downcast(key, state.store_if_absent(key, erased))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ParentDelegate, Service};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct Tracked;

    impl Service for Tracked {
        fn create(_state: &Arc<State>) -> Result<Self> {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Ok(Tracked)
        }
    }

    struct Shared;

    impl Service for Shared {
        fn create(_state: &Arc<State>) -> Result<Self> {
            Ok(Shared)
        }
    }

    struct Loop;

    impl Service for Loop {
        fn create(state: &Arc<State>) -> Result<Self> {
            state.resolve::<Loop>()?;
            Ok(Loop)
        }
    }

    struct Failing;

    impl Service for Failing {
        fn create(_state: &Arc<State>) -> Result<Self> {
            Err(ContextError::Construction("backend unavailable".into()))
        }
    }

    #[derive(Debug, PartialEq)]
    struct Port(u16);

    #[test]
    fn test_constructs_once_per_state() {
        let state = State::new_root().child();
        let before = BUILDS.load(Ordering::SeqCst);
        state.resolve::<Tracked>().unwrap();
        state.resolve::<Tracked>().unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst) - before, 1);
    }

    #[test]
    fn test_cycle_detected() {
        let state = State::new_root();
        let result = state.resolve::<Loop>();
        match result {
            Err(ContextError::CyclicDependency(chain)) => assert!(chain.contains("->")),
            other => panic!("expected cycle error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(state.service_count(), 0);

        // The frame stack unwinds after the failure.
        RESOLVING.with(|stack| assert!(stack.borrow().is_empty()));
    }

    #[test]
    fn test_failure_stores_nothing() {
        let state = State::new_root();
        let result = state.resolve::<Failing>();
        assert!(matches!(result, Err(ContextError::Construction(_))));
        assert_eq!(state.service_count(), 0);
    }

    #[test]
    fn test_named_key_without_factory() {
        let state = State::new_root();
        let result = state.resolve_key::<Port>(ServiceKey::named::<Port>("http"));
        assert!(matches!(result, Err(ContextError::NoFactory(name)) if name == "http"));
    }

    #[test]
    fn test_factory_inherited_but_instance_local() {
        let root = State::new_root();
        let key = ServiceKey::named::<Port>("http");
        root.set_factory(key, |_| Ok(Port(8080))).unwrap();

        let child = root.child();
        let from_child = child.resolve_key::<Port>(key).unwrap();
        assert_eq!(*from_child, Port(8080));
        assert!(child.is_resolved(&key));
        assert!(!root.is_resolved(&key));
    }

    #[test]
    fn test_nearest_factory_wins() {
        let root = State::new_root();
        let key = ServiceKey::named::<Port>("http");
        root.set_factory(key, |_| Ok(Port(80))).unwrap();

        let child = root.child();
        child.set_factory(key, |_| Ok(Port(8443))).unwrap();
        let grandchild = child.child();

        assert_eq!(*grandchild.resolve_key::<Port>(key).unwrap(), Port(8443));
        assert_eq!(*root.resolve_key::<Port>(key).unwrap(), Port(80));
    }

    #[test]
    fn test_parent_delegate_shares_ancestor_instance() {
        let root = State::new_root();
        root.register_factory(
            ServiceKey::of::<Shared>(),
            Arc::new(ParentDelegate::<Shared>::new()),
        )
        .unwrap();

        let a = root.child();
        let b = root.child().child();

        let from_a = a.resolve::<Shared>().unwrap();
        let from_b = b.resolve::<Shared>().unwrap();
        let from_root = root.resolve::<Shared>().unwrap();
        assert!(Arc::ptr_eq(&from_a, &from_b));
        assert!(Arc::ptr_eq(&from_a, &from_root));
    }

    #[test]
    fn test_factory_may_resolve_other_services() {
        let root = State::new_root();
        let key = ServiceKey::named::<Port>("derived");
        root.set_factory(key, |state| {
            state.resolve::<Shared>()?;
            Ok(Port(9000))
        })
        .unwrap();

        let state = root.child();
        assert_eq!(*state.resolve_key::<Port>(key).unwrap(), Port(9000));
        assert_eq!(state.service_count(), 2);
    }
}
