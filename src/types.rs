//! Core types for states and services.

use serde::Serialize;
use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`State`](crate::State).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub u64);

impl StateId {
    /// Allocate the next identity. Identities are never reused.
    pub(crate) fn next() -> Self {
        StateId(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateId({})", self.0)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// How a state came into existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateOrigin {
    /// The ancestor-less root of a registry.
    Root,
    /// Created lazily on first access from a thread.
    Thread(ThreadId),
    /// Created explicitly, either by [`State::child`](crate::State::child)
    /// or [`ContextRegistry::new_state`](crate::ContextRegistry::new_state).
    Child(StateId),
}

/// Key under which a service instance is memoized on a state.
///
/// Two keys are equal only if both the service type and the name match, so
/// a single type can be registered under several names.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
    name: &'static str,
}

impl ServiceKey {
    /// The default key for a service type, named after the type.
    pub fn of<S: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name: type_name::<S>(),
            name: type_name::<S>(),
        }
    }

    /// A named key for a service type.
    pub fn named<S: 'static>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name: type_name::<S>(),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether this key holds instances of `S`.
    pub fn is<S: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }

    /// Whether this is the default key produced by [`ServiceKey::of`].
    pub fn is_default(&self) -> bool {
        self.name == self.type_name
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "ServiceKey({})", self.type_name)
        } else {
            write!(f, "ServiceKey({}: {})", self.name, self.type_name)
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Snapshot of registry activity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub name: String,
    pub bound_threads: usize,
    pub states_created: u64,
    pub states_released: u64,
}
