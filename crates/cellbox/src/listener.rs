//! Listener slots for engine callbacks.

use cellbox_engine::{Engine, ObserverFn, ObserverHandle, StoreHandle};
use parking_lot::Mutex;

use crate::error::Result;

struct Registration {
    token: ObserverHandle,
    callback: ObserverFn,
}

/// Holds at most one registered callback.
///
/// Replacing or clearing the callback unregisters it from the engine before
/// the slot lets go of the closure, so the engine never calls a closure that
/// was already released.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    current: Mutex<Option<Registration>>,
}

impl ListenerSlot {
    /// Replaces the registered callback; `None` only clears.
    pub fn swap(
        &self,
        engine: &dyn Engine,
        store: StoreHandle,
        callback: Option<ObserverFn>,
    ) -> Result<()> {
        let mut slot = self.current.lock();
        if let Some(previous) = slot.take() {
            if let Err(e) = engine.observer_unregister(previous.token) {
                *slot = Some(previous);
                return Err(e.into());
            }
            drop(previous.callback);
            tracing::debug!(token = %previous.token, "listener removed");
        }
        if let Some(callback) = callback {
            let token = engine.observer_register(store, ObserverFn::clone(&callback))?;
            tracing::debug!(token = %token, "listener registered");
            *slot = Some(Registration { token, callback });
        }
        Ok(())
    }

    /// Unregisters the current callback, if any.
    pub fn clear(&self, engine: &dyn Engine) -> Result<()> {
        let mut slot = self.current.lock();
        if let Some(previous) = slot.take() {
            if let Err(e) = engine.observer_unregister(previous.token) {
                *slot = Some(previous);
                return Err(e.into());
            }
            tracing::debug!(token = %previous.token, "listener removed");
        }
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.current.lock().is_some()
    }
}

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}
