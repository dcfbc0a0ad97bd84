//! Typed CRUD access to one entity type.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

use cellbox_engine::{ObjectId, PutMode, TxMode};

use crate::async_box::AsyncBox;
use crate::codec::EntityCodec;
use crate::condition::Condition;
use crate::cursor::CursorTx;
use crate::error::Result;
use crate::property::{Property, RelationKind, RelationStandalone};
use crate::query::{Query, QueryBuilder};
use crate::store::Store;

/// Reads and writes objects of entity type `T`.
///
/// Each call runs in its own transaction, or joins the one already open on
/// this thread, so several calls can be grouped with
/// [`Store::run_in_write_tx`].
///
/// # Example
///
/// ```rust
/// # use cellbox::{EntityCodec, Options, Result, Store};
/// # use cellbox_engine::{EntityId, Model, ObjectId, PropertyId, PropertyType, Record};
/// # #[derive(Debug, PartialEq)]
/// # struct Note { id: ObjectId, text: String }
/// # impl EntityCodec for Note {
/// #     const ENTITY_ID: EntityId = EntityId(1);
/// #     fn object_id(&self) -> ObjectId { self.id }
/// #     fn set_object_id(&mut self, id: ObjectId) { self.id = id; }
/// #     fn encode(&self) -> Result<Vec<u8>> {
/// #         Ok(Record::new().with(PropertyId(1), self.id).with(PropertyId(2), self.text.as_str()).to_bytes()?)
/// #     }
/// #     fn decode(bytes: &[u8]) -> Result<Self> {
/// #         let r = Record::from_bytes(bytes)?;
/// #         Ok(Note { id: r.object_id(PropertyId(1)), text: r.get_str(PropertyId(2)).unwrap_or_default().to_string() })
/// #     }
/// # }
/// # let model = Model::builder()
/// #     .entity(EntityId(1), "Note")
/// #     .id_property(PropertyId(1), "id")
/// #     .property(PropertyId(2), "text", PropertyType::String)
/// #     .build()
/// #     .unwrap();
/// let store = Store::in_memory(Options::new(model)).unwrap();
/// let notes = store.entity_box::<Note>();
///
/// let mut note = Note { id: 0, text: "hello".into() };
/// let id = notes.put(&mut note).unwrap();
/// assert_eq!(note.id, id);
/// assert_eq!(notes.get(id).unwrap(), Some(note));
///
/// assert!(notes.remove(id).unwrap());
/// assert!(notes.is_empty().unwrap());
/// ```
pub struct EntityBox<T> {
    store: Store,
    _entity: PhantomData<fn() -> T>,
}

impl<T: EntityCodec> EntityBox<T> {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// The store this box belongs to.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    fn read<R>(&self, f: impl FnOnce(&CursorTx) -> Result<R>) -> Result<R> {
        let ctx = CursorTx::new(&self.store, TxMode::Read, T::ENTITY_ID)?;
        let result = f(&ctx)?;
        ctx.close()?;
        Ok(result)
    }

    fn write<R>(&self, f: impl FnOnce(&CursorTx) -> Result<R>) -> Result<R> {
        let ctx = CursorTx::new(&self.store, TxMode::Write, T::ENTITY_ID)?;
        let result = f(&ctx)?;
        ctx.commit_and_close()?;
        Ok(result)
    }

    /// Reads the object with `id`.
    pub fn get(&self, id: ObjectId) -> Result<Option<T>> {
        self.read(|ctx| ctx.get(id)?.map(|bytes| T::decode(&bytes)).transpose())
    }

    /// Reads several objects; missing ids yield `None` in their slot.
    pub fn get_many(&self, ids: &[ObjectId]) -> Result<Vec<Option<T>>> {
        self.read(|ctx| {
            ids.iter()
                .map(|id| ctx.get(*id)?.map(|bytes| T::decode(&bytes)).transpose())
                .collect()
        })
    }

    /// Reads all objects in id order.
    pub fn get_all(&self) -> Result<Vec<T>> {
        self.read(|ctx| {
            let mut objects = Vec::new();
            let mut next = ctx.first()?;
            while let Some(bytes) = next {
                objects.push(T::decode(&bytes)?);
                next = ctx.next()?;
            }
            Ok(objects)
        })
    }

    /// Counts all objects.
    pub fn count(&self) -> Result<u64> {
        self.count_max(0)
    }

    /// Counts objects, stopping at `limit` (0 = no limit).
    pub fn count_max(&self, limit: u64) -> Result<u64> {
        self.read(|ctx| ctx.count_max(limit))
    }

    /// Whether there are no objects.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count_max(1)? == 0)
    }

    /// Whether an object with `id` exists.
    pub fn contains(&self, id: ObjectId) -> Result<bool> {
        self.read(|ctx| Ok(ctx.get(id)?.is_some()))
    }

    fn put_in(ctx: &CursorTx, object: &mut T, mode: PutMode) -> Result<ObjectId> {
        let previous = object.object_id();
        let id = ctx.id_for_put(previous)?;
        object.set_object_id(id);
        let result = object
            .encode()
            .and_then(|bytes| ctx.put(id, &bytes, mode));
        if let Err(err) = result {
            object.set_object_id(previous);
            return Err(err);
        }
        Ok(id)
    }

    /// Inserts or overwrites `object`, assigning an id if it has none.
    /// Returns the id.
    pub fn put(&self, object: &mut T) -> Result<ObjectId> {
        self.put_with_mode(object, PutMode::Put)
    }

    /// Writes `object` with an explicit [`PutMode`].
    pub fn put_with_mode(&self, object: &mut T, mode: PutMode) -> Result<ObjectId> {
        self.write(|ctx| Self::put_in(ctx, object, mode))
    }

    /// Writes all `objects` in one transaction. Returns their ids.
    pub fn put_many(&self, objects: &mut [T]) -> Result<Vec<ObjectId>> {
        self.write(|ctx| {
            objects
                .iter_mut()
                .map(|object| Self::put_in(ctx, object, PutMode::Put))
                .collect()
        })
    }

    /// Removes the object with `id`. Returns `false` if there was none.
    pub fn remove(&self, id: ObjectId) -> Result<bool> {
        self.write(|ctx| ctx.remove(id))
    }

    /// Removes the objects with `ids` in one transaction. Returns how many
    /// existed.
    pub fn remove_many(&self, ids: &[ObjectId]) -> Result<u64> {
        self.write(|ctx| {
            let mut removed = 0;
            for id in ids {
                if ctx.remove(*id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    /// Removes all objects. Returns how many.
    pub fn remove_all(&self) -> Result<u64> {
        let removed = self.write(|ctx| ctx.remove_all())?;
        tracing::debug!(entity = %T::ENTITY_ID, removed, "removed all objects");
        Ok(removed)
    }

    /// Ids of the objects of `T` whose `relation` points at `target`.
    pub fn backlink_ids<U>(
        &self,
        relation: Property<T, RelationKind<U>>,
        target: ObjectId,
    ) -> Result<Vec<ObjectId>> {
        self.read(|ctx| ctx.backlink_ids(relation.id(), target))
    }

    /// Links object `source` of this box to `target`. Linking twice is a
    /// no-op.
    pub fn standalone_rel_put<U: EntityCodec>(
        &self,
        relation: RelationStandalone<T, U>,
        source: ObjectId,
        target: ObjectId,
    ) -> Result<()> {
        self.write(|ctx| ctx.rel_put(relation.id(), source, target))
    }

    /// Unlinks object `source` of this box from `target`.
    pub fn standalone_rel_remove<U: EntityCodec>(
        &self,
        relation: RelationStandalone<T, U>,
        source: ObjectId,
        target: ObjectId,
    ) -> Result<()> {
        self.write(|ctx| ctx.rel_remove(relation.id(), source, target))
    }

    /// Makes `targets` the exact set of objects `source` links to, in one
    /// transaction.
    pub fn standalone_rel_replace<U: EntityCodec>(
        &self,
        relation: RelationStandalone<T, U>,
        source: ObjectId,
        targets: &[ObjectId],
    ) -> Result<()> {
        let wanted: BTreeSet<ObjectId> = targets.iter().copied().collect();
        self.write(|ctx| {
            let target_cursor = ctx.transaction().cursor(U::ENTITY_ID)?;
            let current: BTreeSet<ObjectId> = target_cursor
                .rel_ids(relation.id(), source)?
                .into_iter()
                .collect();
            target_cursor.close()?;

            for target in current.difference(&wanted) {
                ctx.rel_remove(relation.id(), source, *target)?;
            }
            for target in wanted.difference(&current) {
                ctx.rel_put(relation.id(), source, *target)?;
            }
            Ok(())
        })
    }

    /// Ids of the objects in this box that `source` (an object of `S`)
    /// links to.
    pub fn standalone_rel_ids<S: EntityCodec>(
        &self,
        relation: RelationStandalone<S, T>,
        source: ObjectId,
    ) -> Result<Vec<ObjectId>> {
        self.read(|ctx| ctx.rel_ids(relation.id(), source))
    }

    /// Ids of the objects in this box linking to `target`.
    pub fn standalone_rel_backlink_ids<U: EntityCodec>(
        &self,
        relation: RelationStandalone<T, U>,
        target: ObjectId,
    ) -> Result<Vec<ObjectId>> {
        self.read(|ctx| ctx.rel_backlink_ids(relation.id(), target))
    }

    /// Starts a query.
    pub fn query(&self) -> Result<QueryBuilder<T>> {
        QueryBuilder::new(&self.store)
    }

    /// Builds a query for `condition`.
    pub fn query_with(&self, condition: &Condition) -> Result<Query<T>> {
        let mut builder = QueryBuilder::new(&self.store)?;
        builder.with(condition)?;
        builder.build()
    }

    /// The store's shared async box for `T`.
    pub fn async_box(&self) -> Result<AsyncBox<T>> {
        AsyncBox::shared(&self.store)
    }
}

impl<T> Clone for EntityBox<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for EntityBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBox")
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::options::Options;
    use cellbox_engine::{EntityId, Model, PropertyId, PropertyType, Record};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: ObjectId,
        text: String,
    }

    impl Note {
        fn new(text: &str) -> Self {
            Self {
                id: 0,
                text: text.to_string(),
            }
        }
    }

    impl EntityCodec for Note {
        const ENTITY_ID: EntityId = EntityId(1);

        fn object_id(&self) -> ObjectId {
            self.id
        }

        fn set_object_id(&mut self, id: ObjectId) {
            self.id = id;
        }

        fn encode(&self) -> Result<Vec<u8>> {
            if self.text == "unencodable" {
                return Err(Error::codec("refusing to encode"));
            }
            Ok(Record::new()
                .with(PropertyId(1), self.id)
                .with(PropertyId(2), self.text.as_str())
                .to_bytes()?)
        }

        fn decode(bytes: &[u8]) -> Result<Self> {
            let record = Record::from_bytes(bytes)?;
            Ok(Self {
                id: record.object_id(PropertyId(1)),
                text: record.get_str(PropertyId(2)).unwrap_or_default().to_string(),
            })
        }
    }

    fn notes() -> EntityBox<Note> {
        let model = Model::builder()
            .entity(EntityId(1), "Note")
            .id_property(PropertyId(1), "id")
            .property(PropertyId(2), "text", PropertyType::String)
            .build()
            .unwrap();
        Store::in_memory(Options::new(model)).unwrap().entity_box()
    }

    #[test]
    fn put_assigns_and_keeps_ids() {
        let notes = notes();
        let mut note = Note::new("a");
        let id = notes.put(&mut note).unwrap();
        assert_ne!(id, 0);
        assert_eq!(note.id, id);

        note.text = "b".into();
        assert_eq!(notes.put(&mut note).unwrap(), id);
        assert_eq!(notes.count().unwrap(), 1);
        assert_eq!(notes.get(id).unwrap().unwrap().text, "b");
    }

    #[test]
    fn failed_put_restores_id() {
        let notes = notes();
        let mut note = Note::new("unencodable");
        assert!(matches!(notes.put(&mut note), Err(Error::Codec { .. })));
        assert_eq!(note.id, 0);
        assert!(notes.is_empty().unwrap());
    }

    #[test]
    fn insert_mode_rejects_existing() {
        let notes = notes();
        let mut note = Note::new("a");
        notes.put(&mut note).unwrap();
        assert!(notes.put_with_mode(&mut note, PutMode::Insert).is_err());
        assert_eq!(notes.count().unwrap(), 1);
    }

    #[test]
    fn many() {
        let notes = notes();
        let mut batch = vec![Note::new("a"), Note::new("b"), Note::new("c")];
        let ids = notes.put_many(&mut batch).unwrap();
        assert_eq!(ids.len(), 3);

        let got = notes.get_many(&[ids[0], 999, ids[2]]).unwrap();
        assert_eq!(got[0].as_ref(), Some(&batch[0]));
        assert!(got[1].is_none());
        assert_eq!(notes.get_all().unwrap(), batch);

        assert_eq!(notes.remove_many(&[ids[0], 999]).unwrap(), 1);
        assert!(!notes.contains(ids[0]).unwrap());
        assert_eq!(notes.count_max(1).unwrap(), 1);
        assert_eq!(notes.remove_all().unwrap(), 2);
        assert!(notes.is_empty().unwrap());
    }

    #[test]
    fn grouped_writes_share_one_transaction() {
        let notes = notes();
        let result: Result<()> = notes.store().run_in_write_tx(|_| {
            notes.put(&mut Note::new("a"))?;
            Err(Error::illegal_argument("abort"))
        });
        assert!(result.is_err());
        assert_eq!(notes.count().unwrap(), 0);
    }
}
