//! Single-release ownership of native handles.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cellbox_engine::{
    AsyncHandle, CursorHandle, Engine, NativeResult, QueryBuilderHandle, QueryHandle,
    StoreHandle, TxnHandle,
};

use crate::error::{Error, Result};

/// A kind of native resource: its handle type and how it is released.
pub trait NativeResource {
    /// Name used in error and log messages.
    const NAME: &'static str;

    /// Typed handle passed to engine calls.
    type Handle: Copy + From<u64>;

    /// Releases a raw handle.
    fn release(engine: &dyn Engine, raw: u64) -> NativeResult<()>;
}

macro_rules! resource {
    ($(#[$meta:meta])* $kind:ident, $handle:ident, $name:literal, $release:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub enum $kind {}

        impl NativeResource for $kind {
            const NAME: &'static str = $name;
            type Handle = $handle;

            fn release(engine: &dyn Engine, raw: u64) -> NativeResult<()> {
                engine.$release($handle(raw))
            }
        }
    };
}

resource!(
    /// An open store.
    StoreKind,
    StoreHandle,
    "store",
    store_close
);
resource!(
    /// A native transaction.
    TxnKind,
    TxnHandle,
    "transaction",
    txn_close
);
resource!(
    /// A cursor.
    CursorKind,
    CursorHandle,
    "cursor",
    cursor_close
);
resource!(
    /// A query builder.
    QueryBuilderKind,
    QueryBuilderHandle,
    "query builder",
    qb_close
);
resource!(
    /// A built query.
    QueryKind,
    QueryHandle,
    "query",
    query_close
);
resource!(
    /// An owned async write accessor.
    AsyncKind,
    AsyncHandle,
    "async box",
    async_close
);

/// Owns one native handle and releases it exactly once.
///
/// The handle is released by [`close`](Self::close) or on drop, whichever
/// comes first. After that every access fails with `IllegalState` instead of
/// reaching the engine with a stale handle.
pub struct ResourceHandle<R: NativeResource> {
    engine: Arc<dyn Engine>,
    raw: AtomicU64,
    _kind: PhantomData<fn() -> R>,
}

impl<R: NativeResource> ResourceHandle<R> {
    /// Takes ownership of `raw`.
    pub fn new(engine: Arc<dyn Engine>, raw: impl Into<u64>) -> Self {
        Self {
            engine,
            raw: AtomicU64::new(raw.into()),
            _kind: PhantomData,
        }
    }

    /// The engine the handle belongs to.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Returns the handle, or `IllegalState` if it was released.
    pub fn get(&self) -> Result<R::Handle> {
        match self.raw.load(Ordering::Acquire) {
            0 => Err(Error::illegal_state(format!("{} is already closed", R::NAME))),
            raw => Ok(R::Handle::from(raw)),
        }
    }

    /// Whether the handle has not been released yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.raw.load(Ordering::Acquire) != 0
    }

    /// Releases the handle. Further calls are no-ops.
    pub fn close(&self) -> Result<()> {
        match self.raw.swap(0, Ordering::AcqRel) {
            0 => Ok(()),
            raw => R::release(self.engine.as_ref(), raw).map_err(Error::from),
        }
    }

    /// Gives up ownership without releasing, for handles the engine already
    /// released on its own.
    pub fn forget(&self) -> Option<R::Handle> {
        match self.raw.swap(0, Ordering::AcqRel) {
            0 => None,
            raw => Some(R::Handle::from(raw)),
        }
    }
}

impl<R: NativeResource> Drop for ResourceHandle<R> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(kind = R::NAME, error = %e, "failed to release native handle");
        }
    }
}

impl<R: NativeResource> fmt::Debug for ResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &R::NAME)
            .field("raw", &self.raw.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbox_engine::{EntityId, MemoryEngine, Model, PropertyId, StoreConfig, TxMode};

    fn engine_and_store() -> (Arc<MemoryEngine>, StoreHandle) {
        let model = Model::builder()
            .entity(EntityId(1), "Item")
            .id_property(PropertyId(1), "id")
            .build()
            .unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let store = engine
            .store_open(&model.to_bytes().unwrap(), &StoreConfig::default())
            .unwrap();
        (engine, store)
    }

    #[test]
    fn close_releases_once() {
        let (engine, store) = engine_and_store();
        let txn = engine.txn_begin(store, TxMode::Read).unwrap();
        let handle = ResourceHandle::<TxnKind>::new(engine.clone(), txn);

        assert!(handle.is_open());
        handle.close().unwrap();
        handle.close().unwrap();
        drop(handle);

        let stats = engine.stats();
        assert_eq!(stats.transactions_closed, 1);
        assert_eq!(stats.invalid_releases, 0);
    }

    #[test]
    fn closed_handle_is_illegal_state() {
        let (engine, store) = engine_and_store();
        let txn = engine.txn_begin(store, TxMode::Read).unwrap();
        let handle = ResourceHandle::<TxnKind>::new(engine.clone(), txn);
        assert_eq!(handle.get().unwrap(), txn);
        handle.close().unwrap();
        assert!(matches!(handle.get(), Err(Error::IllegalState { .. })));
    }

    #[test]
    fn drop_releases_and_forget_does_not() {
        let (engine, store) = engine_and_store();
        let first = engine.txn_begin(store, TxMode::Read).unwrap();
        drop(ResourceHandle::<TxnKind>::new(engine.clone(), first));
        assert_eq!(engine.stats().transactions_closed, 1);

        let second = engine.txn_begin(store, TxMode::Read).unwrap();
        let handle = ResourceHandle::<TxnKind>::new(engine.clone(), second);
        assert_eq!(handle.forget(), Some(second));
        drop(handle);
        assert_eq!(engine.stats().transactions_closed, 1);
        engine.txn_close(second).unwrap();
    }
}
