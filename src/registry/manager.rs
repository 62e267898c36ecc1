//! Context registry implementation.

use crate::error::Result;
use crate::services::Service;
use crate::state::State;
use crate::types::{RegistryStats, ServiceKey, StateOrigin};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

use super::binding;

/// Registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name reported in logs and stats.
    pub name: String,

    /// Drop a thread's binding when the thread terminates.
    pub release_on_thread_exit: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            release_on_thread_exit: true,
        }
    }
}

pub(crate) struct RegistryInner {
    config: RegistryConfig,

    /// The single ancestor-less state of this registry.
    root: Arc<State>,

    /// Current state of each thread that has touched the registry.
    bindings: RwLock<HashMap<ThreadId, Arc<State>>>,

    states_created: AtomicU64,
    states_released: AtomicU64,
}

impl RegistryInner {
    /// Drop the binding for `thread`, returning the state it held.
    pub(crate) fn release(&self, thread: ThreadId) -> Option<Arc<State>> {
        let released = self.bindings.write().remove(&thread);
        if let Some(state) = &released {
            self.states_released.fetch_add(1, Ordering::Relaxed);
            debug!(registry = %self.config.name, thread = ?thread, state = %state.id(), "released thread state");
        }
        released
    }

    fn watch_thread(self: &Arc<Self>) {
        if self.config.release_on_thread_exit {
            binding::release_on_exit(self);
        }
    }
}

/// Maps each thread to its current [`State`], creating states lazily.
///
/// The registry owns one root. The first access from a thread creates a
/// state parented to that root and binds it to the thread; later accesses
/// return the same state until it is swapped, entered over, or released.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct ContextRegistry {
    inner: Arc<RegistryInner>,
}

impl ContextRegistry {
    /// Create a registry with a fresh root.
    pub fn new(config: RegistryConfig) -> Self {
        let root = State::new_root();
        debug!(registry = %config.name, root = %root.id(), "created context registry");

        Self {
            inner: Arc::new(RegistryInner {
                config,
                root,
                bindings: RwLock::new(HashMap::new()),
                states_created: AtomicU64::new(0),
                states_released: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// The registry root. Same identity on every call from every thread.
    pub fn get_root(&self) -> Arc<State> {
        Arc::clone(&self.inner.root)
    }

    /// The calling thread's current state, created and bound on first use.
    pub fn get_current(&self) -> Arc<State> {
        let thread = thread::current().id();

        let existing = self.inner.bindings.read().get(&thread).cloned();
        if let Some(state) = existing {
            return state;
        }

        let state = match self.inner.bindings.write().entry(thread) {
            Entry::Occupied(entry) => return Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let state = State::new_child(&self.inner.root, StateOrigin::Thread(thread));
                entry.insert(Arc::clone(&state));
                state
            }
        };

        self.inner.states_created.fetch_add(1, Ordering::Relaxed);
        self.inner.watch_thread();
        debug!(registry = %self.inner.config.name, thread = ?thread, state = %state.id(), "bound new state to thread");

        state
    }

    /// Create an unbound state parented to the root.
    ///
    /// Useful for preparing a context on one thread and entering it on
    /// another.
    pub fn new_state(&self) -> Arc<State> {
        let state = State::new_child(&self.inner.root, StateOrigin::Child(self.inner.root.id()));
        self.inner.states_created.fetch_add(1, Ordering::Relaxed);
        state
    }

    /// Make `state` the calling thread's current state until the returned
    /// guard is dropped.
    ///
    /// Guards restore whatever was bound before, so nested guards must be
    /// dropped in reverse order of creation.
    pub fn enter(&self, state: Arc<State>) -> StateGuard {
        let thread = thread::current().id();
        let previous = self
            .inner
            .bindings
            .write()
            .insert(thread, Arc::clone(&state));
        self.inner.watch_thread();
        debug!(registry = %self.inner.config.name, thread = ?thread, state = %state.id(), "entered state");

        StateGuard {
            registry: self.clone(),
            thread,
            entered: state,
            previous,
            _not_send: PhantomData,
        }
    }

    /// Permanently bind `state` to the calling thread, returning the state
    /// it replaces.
    pub fn swap(&self, state: Arc<State>) -> Option<Arc<State>> {
        let thread = thread::current().id();
        let previous = self
            .inner
            .bindings
            .write()
            .insert(thread, Arc::clone(&state));
        self.inner.watch_thread();
        debug!(registry = %self.inner.config.name, thread = ?thread, state = %state.id(), "swapped thread state");
        previous
    }

    /// Drop the calling thread's binding. The next access creates a new
    /// state.
    pub fn release_current(&self) -> Option<Arc<State>> {
        self.inner.release(thread::current().id())
    }

    /// Whether the calling thread currently has a state bound.
    pub fn is_bound(&self) -> bool {
        self.inner
            .bindings
            .read()
            .contains_key(&thread::current().id())
    }

    /// Resolve `S` on the calling thread's current state.
    pub fn lookup<S: Service>(&self) -> Result<Arc<S>> {
        self.get_current().resolve::<S>()
    }

    /// Resolve the service under `key` on the calling thread's current state.
    pub fn lookup_key<S>(&self, key: ServiceKey) -> Result<Arc<S>>
    where
        S: Send + Sync + 'static,
    {
        self.get_current().resolve_key::<S>(key)
    }

    /// Number of threads with a bound state.
    pub fn bound_thread_count(&self) -> usize {
        self.inner.bindings.read().len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            name: self.inner.config.name.clone(),
            bound_threads: self.bound_thread_count(),
            states_created: self.inner.states_created.load(Ordering::Relaxed),
            states_released: self.inner.states_released.load(Ordering::Relaxed),
        }
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// Keeps a state entered on the current thread. Not `Send`: it must be
/// dropped on the thread that created it.
#[must_use = "the state is exited as soon as the guard is dropped"]
pub struct StateGuard {
    registry: ContextRegistry,
    thread: ThreadId,
    entered: Arc<State>,
    previous: Option<Arc<State>>,
    _not_send: PhantomData<*const ()>,
}

impl StateGuard {
    /// The state this guard entered.
    pub fn state(&self) -> &Arc<State> {
        &self.entered
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        let displaced = {
            let mut bindings = self.registry.inner.bindings.write();
            match self.previous.take() {
                Some(previous) => bindings.insert(self.thread, previous),
                None => bindings.remove(&self.thread),
            }
        };
        debug!(registry = %self.registry.inner.config.name, thread = ?self.thread, state = %self.entered.id(), "exited state");
        drop(displaced);
    }
}
