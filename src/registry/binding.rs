//! Release of thread bindings when a thread terminates.

use super::manager::RegistryInner;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

thread_local! {
    static EXIT_HOOK: RefCell<ThreadExitHook> = RefCell::new(ThreadExitHook::new());
}

/// Per-thread list of registries holding a binding for this thread.
///
/// Dropped by the thread-local destructor, which removes the binding from
/// every registry that is still alive.
struct ThreadExitHook {
    thread: ThreadId,
    registries: Vec<Weak<RegistryInner>>,
}

impl ThreadExitHook {
    fn new() -> Self {
        Self {
            thread: thread::current().id(),
            registries: Vec::new(),
        }
    }
}

impl Drop for ThreadExitHook {
    fn drop(&mut self) {
        for registry in self.registries.drain(..) {
            if let Some(inner) = registry.upgrade() {
                inner.release(self.thread);
            }
        }
    }
}

/// Arrange for the calling thread's binding in `inner` to be released when
/// the thread exits.
///
/// Silently skipped while the thread's locals are being torn down; a
/// binding made at that point outlives the thread.
pub(crate) fn release_on_exit(inner: &Arc<RegistryInner>) {
    let _ = EXIT_HOOK.try_with(|hook| {
        let mut hook = hook.borrow_mut();
        hook.registries.retain(|weak| weak.strong_count() > 0);

        let target = Arc::as_ptr(inner);
        if !hook.registries.iter().any(|weak| weak.as_ptr() == target) {
            hook.registries.push(Arc::downgrade(inner));
        }
    });
}
