//! The store: entry point to boxes, transactions and queries.

use std::fmt;
use std::sync::Arc;

use cellbox_engine::{Engine, EntityId, MemoryEngine, PropertyId, StoreHandle, TxMode};

use crate::async_box::AsyncBox;
use crate::codec::EntityCodec;
use crate::entity_box::EntityBox;
use crate::error::{check_found, Error, Result};
use crate::handle::{ResourceHandle, StoreKind};
use crate::listener::ListenerSlot;
use crate::options::Options;
use crate::query::QueryBuilder;
use crate::transaction::Transaction;

struct StoreInner {
    listener: ListenerSlot,
    handle: ResourceHandle<StoreKind>,
    id: u64,
}

/// An open store.
///
/// `Store` is a cheap, clonable handle; all clones refer to the same native
/// store, which is closed by [`close`](Self::close) or when the last clone
/// (and every box, query and transaction created from it) is dropped.
///
/// After closing, every operation fails with [`Error::ShuttingDown`].
///
/// # Example
///
/// ```rust
/// use cellbox::{Options, Store};
/// use cellbox_engine::{EntityId, Model, PropertyId, PropertyType};
///
/// let model = Model::builder()
///     .entity(EntityId(1), "Note")
///     .id_property(PropertyId(1), "id")
///     .property(PropertyId(2), "text", PropertyType::String)
///     .build()
///     .unwrap();
///
/// let store = Store::in_memory(Options::new(model)).unwrap();
/// assert_eq!(store.entity_id("Note").unwrap(), Some(EntityId(1)));
/// store.close().unwrap();
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Opens a store on `engine`.
    pub fn open(engine: Arc<dyn Engine>, options: Options) -> Result<Self> {
        let model = options.model.to_bytes()?;
        let raw = engine.store_open(&model, &options.store_config())?;
        let handle = ResourceHandle::new(engine, raw);
        let id = handle.engine().store_id(raw)?;
        tracing::info!(store = id, "store opened");
        Ok(Self {
            inner: Arc::new(StoreInner {
                listener: ListenerSlot::default(),
                handle,
                id,
            }),
        })
    }

    /// Opens a store on a fresh [`MemoryEngine`].
    pub fn in_memory(options: Options) -> Result<Self> {
        Self::open(Arc::new(MemoryEngine::new()), options)
    }

    /// Process-unique id of the store.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The engine this store runs on.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.inner.handle.engine()
    }

    /// Whether the store has not been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.handle.is_open()
    }

    pub(crate) fn handle(&self) -> Result<StoreHandle> {
        self.inner
            .handle
            .get()
            .map_err(|_| Error::shutting_down(format!("store {} is closed", self.inner.id)))
    }

    /// Looks up an entity type id by name.
    pub fn entity_id(&self, name: &str) -> Result<Option<EntityId>> {
        check_found(self.engine().store_entity_id(self.handle()?, name))
    }

    /// Looks up a property id by entity and property name.
    pub fn property_id(&self, entity: EntityId, name: &str) -> Result<Option<PropertyId>> {
        check_found(self.engine().store_property_id(self.handle()?, entity, name))
    }

    /// Starts a transaction, or joins the one already open on this thread.
    pub fn tx(&self, mode: TxMode) -> Result<Transaction> {
        Transaction::begin(self, mode)
    }

    /// Starts (or joins) a read transaction.
    pub fn tx_read(&self) -> Result<Transaction> {
        self.tx(TxMode::Read)
    }

    /// Starts (or joins) a write transaction.
    pub fn tx_write(&self) -> Result<Transaction> {
        self.tx(TxMode::Write)
    }

    /// Runs `f` in a write transaction, committing when it returns `Ok`.
    ///
    /// If `f` fails the transaction is rolled back and the error returned.
    pub fn run_in_write_tx<R>(&self, f: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        let tx = self.tx_write()?;
        let result = f(&tx)?;
        tx.success()?;
        Ok(result)
    }

    /// Runs `f` in a read transaction.
    pub fn run_in_read_tx<R>(&self, f: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        let tx = self.tx_read()?;
        let result = f(&tx)?;
        tx.close()?;
        Ok(result)
    }

    /// Returns the box for entity type `T`.
    #[must_use]
    pub fn entity_box<T: EntityCodec>(&self) -> EntityBox<T> {
        EntityBox::new(self.clone())
    }

    /// Starts a query for entity type `T`.
    pub fn query<T: EntityCodec>(&self) -> Result<QueryBuilder<T>> {
        QueryBuilder::new(self)
    }

    /// Returns the store's shared async box for `T`.
    pub fn async_box<T: EntityCodec>(&self) -> Result<AsyncBox<T>> {
        AsyncBox::shared(self)
    }

    /// Blocks until the async queue is idle.
    ///
    /// Returns `false` if the store is shutting down or an async operation
    /// failed since the last await.
    #[must_use]
    pub fn await_async_completion(&self) -> bool {
        match self.handle() {
            Ok(handle) => self.engine().store_await_async_completion(handle),
            Err(_) => false,
        }
    }

    /// Blocks until everything submitted before the call was processed.
    ///
    /// Same return semantics as [`await_async_completion`](Self::await_async_completion).
    #[must_use]
    pub fn await_async_submitted(&self) -> bool {
        match self.handle() {
            Ok(handle) => self.engine().store_await_async_submitted(handle),
            Err(_) => false,
        }
    }

    /// Registers `listener` to be called after commits with the ids of the
    /// changed entity types. Replaces any previous listener.
    pub fn set_change_listener<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(&[EntityId]) + Send + Sync + 'static,
    {
        let handle = self.handle()?;
        self.inner
            .listener
            .swap(self.engine().as_ref(), handle, Some(Arc::new(listener)))
    }

    /// Removes the change listener, if any.
    pub fn remove_change_listener(&self) -> Result<()> {
        self.inner.listener.clear(self.engine().as_ref())
    }

    /// Signals the store to stop accepting work, without releasing it yet.
    ///
    /// Blocked async awaits return `false` and new transactions fail with
    /// [`Error::ShuttingDown`].
    pub fn prepare_to_close(&self) -> Result<()> {
        Ok(self.engine().store_prepare_to_close(self.handle()?)?)
    }

    /// Closes the store. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.inner.listener.clear(self.engine().as_ref())?;
        self.inner.handle.close()?;
        tracing::info!(store = self.inner.id, "store closed");
        Ok(())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .field("listener", &self.inner.listener)
            .finish()
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if self.handle.is_open() {
            if let Err(e) = self.listener.clear(self.handle.engine().as_ref()) {
                tracing::warn!(store = self.id, error = %e, "failed to remove listener");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbox_engine::{Model, PropertyType};

    fn model() -> Model {
        Model::builder()
            .entity(EntityId(1), "Note")
            .id_property(PropertyId(1), "id")
            .property(PropertyId(2), "text", PropertyType::String)
            .build()
            .unwrap()
    }

    #[test]
    fn lookups() {
        let store = Store::in_memory(Options::new(model())).unwrap();
        assert_eq!(store.entity_id("Note").unwrap(), Some(EntityId(1)));
        assert_eq!(store.entity_id("Missing").unwrap(), None);
        assert_eq!(
            store.property_id(EntityId(1), "text").unwrap(),
            Some(PropertyId(2))
        );
        assert_eq!(store.property_id(EntityId(1), "nope").unwrap(), None);
    }

    #[test]
    fn closed_store_is_shutting_down() {
        let store = Store::in_memory(Options::new(model())).unwrap();
        let clone = store.clone();
        store.close().unwrap();
        store.close().unwrap();

        assert!(!clone.is_open());
        assert!(matches!(clone.tx_read(), Err(Error::ShuttingDown { .. })));
        assert!(matches!(clone.entity_id("Note"), Err(Error::ShuttingDown { .. })));
        assert!(!clone.await_async_completion());
    }

    #[test]
    fn prepare_to_close_rejects_transactions() {
        let store = Store::in_memory(Options::new(model())).unwrap();
        store.prepare_to_close().unwrap();
        assert!(matches!(store.tx_write(), Err(Error::ShuttingDown { .. })));
    }
}
