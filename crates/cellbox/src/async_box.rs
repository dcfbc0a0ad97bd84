//! Asynchronous writes through the engine's write queue.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use cellbox_engine::error as codes;
use cellbox_engine::{AsyncHandle, Engine, NativeResult, ObjectId, PutMode};

use crate::codec::EntityCodec;
use crate::error::{Error, Result};
use crate::handle::{AsyncKind, ResourceHandle};
use crate::store::Store;

enum Accessor {
    /// The store's accessor for the entity type; owned by the engine.
    Shared(AsyncHandle),
    Owned(ResourceHandle<AsyncKind>),
}

/// Queues puts and removes of `T` for a background writer.
///
/// [`put`](Self::put) reserves the object's id right away, but the object
/// is only readable once the queue processed it; use
/// [`await_completion`](Self::await_completion) to wait for that.
///
/// When the queue stays full for longer than the enqueue timeout, the
/// operation fails with [`Error::Rejected`] and nothing is written.
pub struct AsyncBox<T> {
    store: Store,
    accessor: Accessor,
    _entity: PhantomData<fn() -> T>,
}

impl<T: EntityCodec> AsyncBox<T> {
    /// The store's shared async box for `T`, using the store's enqueue
    /// timeout.
    pub fn shared(store: &Store) -> Result<Self> {
        let raw = store.engine().async_shared(store.handle()?, T::ENTITY_ID)?;
        Ok(Self {
            store: store.clone(),
            accessor: Accessor::Shared(raw),
            _entity: PhantomData,
        })
    }

    /// A separate async box with its own enqueue timeout, released on drop.
    pub fn with_timeout(store: &Store, enqueue_timeout: Duration) -> Result<Self> {
        let raw = store
            .engine()
            .async_open(store.handle()?, T::ENTITY_ID, enqueue_timeout)?;
        Ok(Self {
            store: store.clone(),
            accessor: Accessor::Owned(ResourceHandle::new(store.engine().clone(), raw)),
            _entity: PhantomData,
        })
    }

    fn engine(&self) -> &dyn Engine {
        self.store.engine().as_ref()
    }

    fn raw(&self) -> Result<AsyncHandle> {
        self.store.handle()?;
        match &self.accessor {
            Accessor::Shared(raw) => Ok(*raw),
            Accessor::Owned(handle) => handle.get(),
        }
    }

    fn enqueued<R>(&self, what: &str, result: NativeResult<R>) -> Result<R> {
        result.map_err(|err| {
            if err.code == codes::TIMEOUT {
                tracing::warn!(entity = %T::ENTITY_ID, op = what, "async queue is full");
                Error::Rejected {
                    message: format!("async {what} rejected: {}", err.message),
                }
            } else {
                Error::from_native(err, Some(what))
            }
        })
    }

    /// Queues a put of `object` and returns its id, assigning a new one if
    /// the object has none.
    pub fn put(&self, object: &mut T) -> Result<ObjectId> {
        self.put_with_mode(object, PutMode::Put)
    }

    /// Queues an insert; the write fails in the background if the id exists.
    pub fn insert(&self, object: &mut T) -> Result<ObjectId> {
        self.put_with_mode(object, PutMode::Insert)
    }

    /// Queues a write of `object` with an explicit [`PutMode`].
    pub fn put_with_mode(&self, object: &mut T, mode: PutMode) -> Result<ObjectId> {
        let bytes = object.encode()?;
        let id = self.enqueued("put", self.engine().async_put(self.raw()?, &bytes, mode))?;
        object.set_object_id(id);
        Ok(id)
    }

    /// Queues a removal of the object with `id`.
    pub fn remove(&self, id: ObjectId) -> Result<()> {
        self.enqueued("remove", self.engine().async_remove(self.raw()?, id))
    }

    /// Blocks until the queue is idle. `false` means the store is closing or
    /// a queued operation failed; the data may not have been written.
    #[must_use]
    pub fn await_completion(&self) -> bool {
        self.store.await_async_completion()
    }

    /// Blocks until everything queued before the call was processed. Same
    /// return value semantics as [`await_completion`](Self::await_completion).
    #[must_use]
    pub fn await_submitted(&self) -> bool {
        self.store.await_async_submitted()
    }

    /// Releases an owned async box. Closing the shared one, or closing
    /// twice, is a no-op.
    pub fn close(&self) -> Result<()> {
        match &self.accessor {
            Accessor::Shared(_) => Ok(()),
            Accessor::Owned(handle) => handle.close(),
        }
    }
}

impl<T> fmt::Debug for AsyncBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.accessor {
            Accessor::Shared(_) => "shared",
            Accessor::Owned(_) => "owned",
        };
        f.debug_struct("AsyncBox")
            .field("store", &self.store)
            .field("accessor", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use cellbox_engine::{EntityId, MemoryEngine, Model, PropertyId, PropertyType, Record};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Event {
        id: ObjectId,
        name: String,
    }

    impl EntityCodec for Event {
        const ENTITY_ID: EntityId = EntityId(1);

        fn object_id(&self) -> ObjectId {
            self.id
        }

        fn set_object_id(&mut self, id: ObjectId) {
            self.id = id;
        }

        fn encode(&self) -> Result<Vec<u8>> {
            Ok(Record::new()
                .with(PropertyId(1), self.id)
                .with(PropertyId(2), self.name.as_str())
                .to_bytes()?)
        }

        fn decode(bytes: &[u8]) -> Result<Self> {
            let record = Record::from_bytes(bytes)?;
            Ok(Self {
                id: record.object_id(PropertyId(1)),
                name: record.get_str(PropertyId(2)).unwrap_or_default().to_string(),
            })
        }
    }

    fn open() -> (Arc<MemoryEngine>, Store) {
        let model = Model::builder()
            .entity(EntityId(1), "Event")
            .id_property(PropertyId(1), "id")
            .property(PropertyId(2), "name", PropertyType::String)
            .build()
            .unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let store = Store::open(engine.clone(), Options::new(model)).unwrap();
        (engine, store)
    }

    #[test]
    fn put_reserves_id_synchronously() {
        let (_, store) = open();
        let events = store.async_box::<Event>().unwrap();
        let mut event = Event {
            id: 0,
            name: "started".into(),
        };
        let id = events.put(&mut event).unwrap();
        assert_ne!(id, 0);
        assert_eq!(event.id, id);

        assert!(events.await_completion());
        let stored = store.entity_box::<Event>().get(id).unwrap().unwrap();
        assert_eq!(stored, event);

        events.remove(id).unwrap();
        assert!(events.await_submitted());
        assert!(!store.entity_box::<Event>().contains(id).unwrap());
    }

    #[test]
    fn shared_box_close_is_noop() {
        let (engine, store) = open();
        let events = store.async_box::<Event>().unwrap();
        events.close().unwrap();
        drop(events);
        assert_eq!(engine.stats().invalid_releases, 0);
    }

    #[test]
    fn owned_box_is_released_once() {
        let (engine, store) = open();
        let events = AsyncBox::<Event>::with_timeout(&store, Duration::from_millis(50)).unwrap();
        events.close().unwrap();
        assert!(matches!(
            events.put(&mut Event {
                id: 0,
                name: "x".into()
            }),
            Err(Error::IllegalState { .. })
        ));
        drop(events);
        assert_eq!(engine.stats().invalid_releases, 0);
    }

    #[test]
    fn closed_store_is_shutting_down() {
        let (_, store) = open();
        let events = store.async_box::<Event>().unwrap();
        store.close().unwrap();
        assert!(matches!(events.remove(1), Err(Error::ShuttingDown { .. })));
        assert!(!events.await_completion());
    }
}
