//! Cursors and the cursor-plus-transaction pair.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use cellbox_engine::{
    CursorHandle, Engine, EntityId, ObjectId, PropertyId, PutMode, RelationId, TxMode,
};

use crate::error::{check_found, check_id, Error, Result};
use crate::handle::{CursorKind, ResourceHandle};
use crate::store::Store;
use crate::transaction::{State, Transaction, TxScope};

/// Accessor for objects of one entity type within a transaction.
///
/// A cursor is only valid while the transaction that opened it is open.
/// Using it afterwards fails with `IllegalState` without reaching the engine.
/// This holds for inner transactions too, even though the native transaction
/// they share lives on.
pub struct Cursor {
    scope: Rc<TxScope>,
    owner: Rc<Cell<State>>,
    handle: ResourceHandle<CursorKind>,
    entity: EntityId,
}

impl Cursor {
    pub(crate) fn open(
        scope: Rc<TxScope>,
        owner: Rc<Cell<State>>,
        entity: EntityId,
    ) -> Result<Self> {
        let engine = scope.store.engine().clone();
        let raw = engine.cursor_open(scope.handle()?, entity)?;
        Ok(Self {
            handle: ResourceHandle::new(engine, raw),
            scope,
            owner,
            entity,
        })
    }

    /// The entity type this cursor reads and writes.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.entity
    }

    /// Whether the cursor and its transaction are open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.owner.get() == State::Open && self.scope.is_open() && self.handle.is_open()
    }

    pub(crate) fn raw(&self) -> Result<CursorHandle> {
        if self.owner.get() == State::Closed || !self.scope.is_open() {
            return Err(Error::illegal_state(
                "cursor used after its transaction was closed",
            ));
        }
        self.handle.get()
    }

    fn engine(&self) -> &dyn Engine {
        self.handle.engine().as_ref()
    }

    /// Reads the object with `id`.
    pub fn get(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
        check_found(self.engine().cursor_get(self.raw()?, id))
    }

    /// Moves to the first object and reads it.
    pub fn first(&self) -> Result<Option<Vec<u8>>> {
        check_found(self.engine().cursor_first(self.raw()?))
    }

    /// Moves to the next object and reads it.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        check_found(self.engine().cursor_next(self.raw()?))
    }

    /// Moves to the first object and returns its id.
    pub fn seek_to_first_id(&self) -> Result<Option<ObjectId>> {
        check_found(self.engine().cursor_seek_first_id(self.raw()?))
    }

    /// Moves to the next object and returns its id.
    pub fn seek_to_next_id(&self) -> Result<Option<ObjectId>> {
        check_found(self.engine().cursor_seek_next_id(self.raw()?))
    }

    /// Reserves the id for putting an object whose current id is `id`
    /// (0 for a new object).
    pub fn id_for_put(&self, id: ObjectId) -> Result<ObjectId> {
        let reserved = self.engine().cursor_id_for_put(self.raw()?, id)?;
        check_id(reserved, Some("cannot reserve an id for put"))
    }

    /// Writes encoded object bytes under `id`.
    pub fn put(&self, id: ObjectId, data: &[u8], mode: PutMode) -> Result<()> {
        Ok(self.engine().cursor_put(self.raw()?, id, data, mode)?)
    }

    /// Removes the object with `id`. Returns `false` if there was none.
    pub fn remove(&self, id: ObjectId) -> Result<bool> {
        Ok(check_found(self.engine().cursor_remove(self.raw()?, id))?.is_some())
    }

    /// Removes all objects of the entity type. Returns how many.
    pub fn remove_all(&self) -> Result<u64> {
        Ok(self.engine().cursor_remove_all(self.raw()?)?)
    }

    /// Counts the objects of the entity type.
    pub fn count(&self) -> Result<u64> {
        self.count_max(0)
    }

    /// Counts objects, stopping at `limit` (0 = no limit).
    pub fn count_max(&self, limit: u64) -> Result<u64> {
        Ok(self.engine().cursor_count(self.raw()?, limit)?)
    }

    /// Links `source` to `target` through a standalone relation starting at
    /// this cursor's entity.
    pub fn rel_put(&self, relation: RelationId, source: ObjectId, target: ObjectId) -> Result<()> {
        Ok(self.engine().cursor_rel_put(self.raw()?, relation, source, target)?)
    }

    /// Removes a standalone relation link, if present.
    pub fn rel_remove(&self, relation: RelationId, source: ObjectId, target: ObjectId) -> Result<()> {
        Ok(self.engine().cursor_rel_remove(self.raw()?, relation, source, target)?)
    }

    /// Targets `source` links to; the cursor must be on the target entity.
    pub fn rel_ids(&self, relation: RelationId, source: ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.engine().cursor_rel_ids(self.raw()?, relation, source)?)
    }

    /// Sources linking to `target`; the cursor must be on the source entity.
    pub fn rel_backlink_ids(&self, relation: RelationId, target: ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.engine().cursor_rel_backlink_ids(self.raw()?, relation, target)?)
    }

    /// Objects whose to-one relation `prop` points at `target`.
    pub fn backlink_ids(&self, prop: PropertyId, target: ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.engine().cursor_backlink_ids(self.raw()?, prop, target)?)
    }

    /// Closes the cursor. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.scope.is_open() {
            self.handle.close()
        } else {
            self.handle.forget();
            Ok(())
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        // Let the handle's own drop release it only while the transaction
        // is open.
        if !self.scope.is_open() {
            self.handle.forget();
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("entity", &self.entity)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A transaction together with one cursor in it.
///
/// The cursor is closed before the transaction, both on
/// [`commit_and_close`](Self::commit_and_close) and on drop.
pub struct CursorTx {
    cursor: Cursor,
    tx: Transaction,
}

impl CursorTx {
    /// Begins (or joins) a transaction and opens a cursor for `entity`.
    pub fn new(store: &Store, mode: TxMode, entity: EntityId) -> Result<Self> {
        let tx = Transaction::begin(store, mode)?;
        let cursor = tx.cursor(entity)?;
        Ok(Self { cursor, tx })
    }

    /// The cursor.
    #[must_use]
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// The transaction.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Closes the cursor, then calls [`Transaction::success`].
    pub fn commit_and_close(self) -> Result<()> {
        let Self { cursor, tx } = self;
        cursor.close()?;
        drop(cursor);
        tx.success()
    }

    /// Closes the cursor and the transaction without committing.
    pub fn close(self) -> Result<()> {
        let Self { cursor, tx } = self;
        cursor.close()?;
        drop(cursor);
        tx.close()
    }
}

impl Deref for CursorTx {
    type Target = Cursor;

    fn deref(&self) -> &Cursor {
        &self.cursor
    }
}

impl fmt::Debug for CursorTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorTx")
            .field("cursor", &self.cursor)
            .field("tx", &self.tx)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use cellbox_engine::{MemoryEngine, Model, PropertyId, PropertyType, Record};
    use std::sync::Arc;

    const ITEM: EntityId = EntityId(1);
    const NAME: PropertyId = PropertyId(2);

    fn open() -> (Arc<MemoryEngine>, Store) {
        let model = Model::builder()
            .entity(ITEM, "Item")
            .id_property(PropertyId(1), "id")
            .property(NAME, "name", PropertyType::String)
            .build()
            .unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let store = Store::open(engine.clone(), Options::new(model)).unwrap();
        (engine, store)
    }

    fn bytes(name: &str) -> Vec<u8> {
        Record::new().with(NAME, name).to_bytes().unwrap()
    }

    #[test]
    fn put_get_iterate() {
        let (_, store) = open();
        let ctx = CursorTx::new(&store, TxMode::Write, ITEM).unwrap();
        for name in ["a", "b"] {
            let id = ctx.id_for_put(0).unwrap();
            ctx.put(id, &bytes(name), PutMode::Put).unwrap();
        }
        ctx.commit_and_close().unwrap();

        let ctx = CursorTx::new(&store, TxMode::Read, ITEM).unwrap();
        assert_eq!(ctx.count().unwrap(), 2);
        assert_eq!(ctx.seek_to_first_id().unwrap(), Some(1));
        assert_eq!(ctx.seek_to_next_id().unwrap(), Some(2));
        assert_eq!(ctx.seek_to_next_id().unwrap(), None);
        let first = Record::from_bytes(&ctx.first().unwrap().unwrap()).unwrap();
        assert_eq!(first.get_str(NAME), Some("a"));
        assert!(ctx.next().unwrap().is_some());
        assert!(ctx.next().unwrap().is_none());
        assert!(ctx.get(42).unwrap().is_none());
    }

    #[test]
    fn remove_reports_absence() {
        let (_, store) = open();
        let ctx = CursorTx::new(&store, TxMode::Write, ITEM).unwrap();
        let id = ctx.id_for_put(0).unwrap();
        ctx.put(id, &bytes("x"), PutMode::Put).unwrap();
        assert!(ctx.remove(id).unwrap());
        assert!(!ctx.remove(id).unwrap());
        assert_eq!(ctx.remove_all().unwrap(), 0);
        ctx.commit_and_close().unwrap();
    }

    #[test]
    fn cursor_after_transaction_close() {
        let (engine, store) = open();
        let tx = store.tx_read().unwrap();
        let cursor = tx.cursor(ITEM).unwrap();
        tx.close().unwrap();

        assert!(!cursor.is_open());
        assert!(matches!(cursor.count(), Err(Error::IllegalState { .. })));
        cursor.close().unwrap();
        drop(cursor);
        drop(tx);

        let stats = engine.stats();
        assert_eq!(stats.open_cursors(), 0);
        assert_eq!(stats.invalid_releases, 0);
    }

    fn inner_cursor(store: &Store, finish: impl FnOnce(&Transaction)) -> (Transaction, Cursor) {
        let outer = store.tx_write().unwrap();
        let inner = store.tx_write().unwrap();
        let cursor = inner.cursor(ITEM).unwrap();
        finish(&inner);
        (outer, cursor)
    }

    #[test]
    fn cursor_after_inner_success() {
        let (engine, store) = open();
        let (outer, cursor) = inner_cursor(&store, |inner| inner.success().unwrap());

        assert!(!cursor.is_open());
        assert!(matches!(cursor.id_for_put(0), Err(Error::IllegalState { .. })));
        assert!(matches!(
            cursor.put(1, &bytes("late"), PutMode::Put),
            Err(Error::IllegalState { .. })
        ));
        cursor.close().unwrap();
        drop(cursor);
        outer.success().unwrap();

        let ctx = CursorTx::new(&store, TxMode::Read, ITEM).unwrap();
        assert_eq!(ctx.count().unwrap(), 0);
        ctx.close().unwrap();
        let stats = engine.stats();
        assert_eq!(stats.open_cursors(), 0);
        assert_eq!(stats.invalid_releases, 0);
    }

    #[test]
    fn cursor_after_inner_close() {
        let (engine, store) = open();
        let (outer, cursor) = inner_cursor(&store, |inner| inner.close().unwrap());

        assert!(matches!(
            cursor.put(1, &bytes("late"), PutMode::Put),
            Err(Error::IllegalState { .. })
        ));
        assert!(matches!(cursor.count(), Err(Error::IllegalState { .. })));
        drop(cursor);
        assert_eq!(engine.stats().open_cursors(), 0);
        outer.close().unwrap();
        assert_eq!(engine.stats().invalid_releases, 0);
    }

    #[test]
    fn dropped_cursor_tx_rolls_back() {
        let (engine, store) = open();
        {
            let ctx = CursorTx::new(&store, TxMode::Write, ITEM).unwrap();
            let id = ctx.id_for_put(0).unwrap();
            ctx.put(id, &bytes("gone"), PutMode::Put).unwrap();
        }
        let ctx = CursorTx::new(&store, TxMode::Read, ITEM).unwrap();
        assert_eq!(ctx.count().unwrap(), 0);
        ctx.close().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.open_transactions(), 0);
        assert_eq!(stats.invalid_releases, 0);
    }

    #[test]
    fn write_in_read_transaction_fails() {
        let (_, store) = open();
        let ctx = CursorTx::new(&store, TxMode::Read, ITEM).unwrap();
        assert!(matches!(
            ctx.put(1, &bytes("x"), PutMode::Put),
            Err(Error::IllegalState { .. })
        ));
    }
}
