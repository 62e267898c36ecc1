//! Process-wide registry and the ambient accessors built on it.

use crate::error::Result;
use crate::registry::{ContextRegistry, RegistryConfig};
use crate::services::Service;
use crate::state::State;
use crate::types::ServiceKey;
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<ContextRegistry> = OnceLock::new();

/// The process-wide registry, created on first access.
pub fn global() -> &'static ContextRegistry {
    GLOBAL.get_or_init(|| {
        ContextRegistry::new(RegistryConfig {
            name: "global".to_string(),
            ..Default::default()
        })
    })
}

/// Resolve `S` on the calling thread's state in the global registry.
pub fn lookup<S: Service>() -> Result<Arc<S>> {
    global().lookup::<S>()
}

/// Resolve the service under `key` on the calling thread's state in the
/// global registry.
pub fn lookup_key<S>(key: ServiceKey) -> Result<Arc<S>>
where
    S: Send + Sync + 'static,
{
    global().lookup_key::<S>(key)
}

impl State {
    /// The calling thread's current state in the global registry.
    pub fn get() -> Arc<State> {
        global().get_current()
    }

    /// The process-wide root.
    pub fn root() -> Arc<State> {
        global().get_root()
    }
}
