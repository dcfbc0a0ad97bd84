//! In-memory reference engine.
//!
//! Committed data is an immutable snapshot behind an `Arc`; read
//! transactions pin the snapshot they started with, a write transaction works
//! on a private copy and swaps it in on commit. One writer per store at a
//! time. Queries are evaluated by full scan.

mod async_queue;
mod query;
mod store;

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::engine::{Engine, ObserverFn, StoreConfig};
use crate::error::{self, NativeError, NativeResult};
use crate::model::{DistanceType, Model, PropertyType};
use crate::record::Record;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::types::{
    AsyncHandle, ConditionId, CursorHandle, EntityId, ObjectId, ObserverHandle, PropertyId,
    PutMode, QueryBuilderHandle, QueryHandle, QueryOp, RelationId, StoreHandle, TxMode,
    TxnHandle,
};

use self::async_queue::AsyncOp;
use self::query::{BuilderNode, LinkKind, Match, NativeCondition, Param, QueryPlan};
use self::store::{Data, StoreState};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct TxnState {
    store: Arc<StoreState>,
    mode: TxMode,
    data: Arc<Data>,
    base_size: u64,
    changed: BTreeSet<EntityId>,
    cursors: Vec<u64>,
}

impl TxnState {
    fn require_write(&self) -> NativeResult<()> {
        if self.mode == TxMode::Write {
            Ok(())
        } else {
            Err(NativeError::illegal_state(
                "cannot write in a read transaction",
            ))
        }
    }
}

#[derive(Debug, Clone)]
struct CursorState {
    state: Arc<Mutex<TxnState>>,
    entity: EntityId,
    position: Arc<Mutex<Option<ObjectId>>>,
}

impl CursorState {
    fn data(&self) -> Arc<Data> {
        Arc::clone(&self.state.lock().data)
    }
}

#[derive(Debug, Clone)]
struct BuilderEntry {
    store: Arc<StoreState>,
    node: Arc<Mutex<BuilderNode>>,
}

#[derive(Debug, Clone)]
struct QueryState {
    store: Arc<StoreState>,
    plan: QueryPlan,
    offset: u64,
    limit: u64,
}

impl QueryState {
    fn check_unbounded(&self, what: &str) -> NativeResult<()> {
        if self.offset != 0 || self.limit != 0 {
            return Err(NativeError::illegal_state(format!(
                "{what} does not support offset or limit"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AsyncEntry {
    store: Arc<StoreState>,
    entity: EntityId,
    timeout: Duration,
    shared: bool,
}

/// In-memory implementation of [`Engine`].
///
/// Not a storage engine: data lives in process memory and is gone when the
/// store closes.
#[derive(Debug)]
pub struct MemoryEngine {
    next_handle: AtomicU64,
    stores: RwLock<HashMap<u64, Arc<StoreState>>>,
    txns: Mutex<HashMap<u64, Arc<Mutex<TxnState>>>>,
    cursors: Mutex<HashMap<u64, CursorState>>,
    builders: Mutex<HashMap<u64, BuilderEntry>>,
    queries: Mutex<HashMap<u64, QueryState>>,
    asyncs: Mutex<HashMap<u64, AsyncEntry>>,
    shared_asyncs: Mutex<HashMap<(u64, EntityId), u64>>,
    observers: Mutex<HashMap<u64, Arc<StoreState>>>,
    stats: Arc<EngineStats>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an engine with no open stores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            stores: RwLock::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            builders: Mutex::new(HashMap::new()),
            queries: Mutex::new(HashMap::new()),
            asyncs: Mutex::new(HashMap::new()),
            shared_asyncs: Mutex::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            stats: Arc::new(EngineStats::new()),
        }
    }

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn invalid_release(&self, kind: &str, raw: u64) -> NativeError {
        self.stats.record_invalid_release();
        tracing::error!(kind, handle = raw, "release of a handle that is not open");
        NativeError::illegal_state(format!("{kind} handle {raw} is not open"))
    }

    fn store(&self, store: StoreHandle) -> NativeResult<Arc<StoreState>> {
        self.stores
            .read()
            .get(&store.0)
            .cloned()
            .ok_or_else(|| NativeError::illegal_argument(format!("unknown {store}")))
    }

    fn txn(&self, txn: TxnHandle) -> NativeResult<Arc<Mutex<TxnState>>> {
        self.txns
            .lock()
            .get(&txn.0)
            .cloned()
            .ok_or_else(|| NativeError::illegal_state(format!("{txn} is not open")))
    }

    fn cursor(&self, cursor: CursorHandle) -> NativeResult<CursorState> {
        self.cursors
            .lock()
            .get(&cursor.0)
            .cloned()
            .ok_or_else(|| NativeError::illegal_state(format!("{cursor} is not open")))
    }

    fn builder(&self, qb: QueryBuilderHandle) -> NativeResult<BuilderEntry> {
        self.builders
            .lock()
            .get(&qb.0)
            .cloned()
            .ok_or_else(|| NativeError::illegal_state(format!("{qb} is not open")))
    }

    fn query(&self, query: QueryHandle) -> NativeResult<QueryState> {
        self.queries
            .lock()
            .get(&query.0)
            .cloned()
            .ok_or_else(|| NativeError::illegal_state(format!("{query} is not open")))
    }

    fn async_entry(&self, handle: AsyncHandle) -> NativeResult<AsyncEntry> {
        self.asyncs
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| NativeError::illegal_state(format!("{handle} is not open")))
    }

    fn drop_cursors(&self, ids: &[u64]) {
        let mut cursors = self.cursors.lock();
        for id in ids {
            if cursors.remove(id).is_some() {
                self.stats.record_cursor_close();
            }
        }
    }

    fn register(&self, qb: QueryBuilderHandle, cond: NativeCondition) -> NativeResult<ConditionId> {
        let entry = self.builder(qb)?;
        let id = entry.node.lock().add(&entry.store.model, cond)?;
        self.stats.record_condition();
        Ok(id)
    }

    fn open_builder(&self, store: Arc<StoreState>, node: Arc<Mutex<BuilderNode>>) -> QueryBuilderHandle {
        let handle = self.next_handle();
        self.builders
            .lock()
            .insert(handle, BuilderEntry { store, node });
        self.stats.record_builder_open();
        QueryBuilderHandle(handle)
    }

    /// Resolves the query, checks it against the cursor's entity and pins the
    /// cursor's data view.
    fn view(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<(QueryState, CursorState, Arc<Data>)> {
        let q = self.query(query)?;
        let c = self.cursor(cursor)?;
        if c.entity != q.plan.entity {
            return Err(NativeError::illegal_argument(format!(
                "query is for {} but the cursor is for {}",
                q.plan.entity, c.entity
            )));
        }
        let data = c.data();
        Ok((q, c, data))
    }

    fn select<'a>(q: &QueryState, data: &'a Data, by_score: bool) -> Vec<Match<'a>> {
        let mut matches = q.plan.execute(data);
        if by_score {
            matches.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.id.cmp(&b.id)));
        } else if q.plan.has_order() {
            q.plan.sort(&mut matches);
        }
        let offset = usize::try_from(q.offset).unwrap_or(usize::MAX);
        let limit = if q.limit == 0 {
            usize::MAX
        } else {
            usize::try_from(q.limit).unwrap_or(usize::MAX)
        };
        matches.into_iter().skip(offset).take(limit).collect()
    }

    fn set_param(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, param: Param<'_>) -> NativeResult<()> {
        let mut queries = self.queries.lock();
        let q = queries
            .get_mut(&query.0)
            .ok_or_else(|| NativeError::illegal_state(format!("{query} is not open")))?;
        q.plan.set_param(entity, prop, param)
    }

    fn distance_of(store: &StoreState, entity: EntityId, prop: PropertyId) -> DistanceType {
        store
            .model
            .entity(entity)
            .and_then(|e| e.property(prop))
            .and_then(|p| p.vector_index)
            .map(|v| v.distance)
            .unwrap_or_default()
    }

    /// Source and target entity of a standalone relation. The cursor entity
    /// must be the source when `on_source` is set, the target otherwise.
    fn relation_ends(
        store: &StoreState,
        relation: RelationId,
        cursor_entity: EntityId,
        on_source: bool,
    ) -> NativeResult<(EntityId, EntityId)> {
        let (source, target) = store
            .model
            .standalone_relation(relation)
            .map(|(source, r)| (source.id, r.target))
            .ok_or_else(|| NativeError::illegal_argument(format!("unknown {relation}")))?;
        let expected = if on_source { source } else { target };
        if cursor_entity != expected {
            return Err(NativeError::illegal_argument(format!(
                "{relation} needs a cursor on {expected}, not {cursor_entity}"
            )));
        }
        Ok((source, target))
    }

    fn link(
        &self,
        qb: QueryBuilderHandle,
        resolve: impl FnOnce(&mut BuilderNode, &Model) -> NativeResult<LinkKind>,
    ) -> NativeResult<QueryBuilderHandle> {
        let entry = self.builder(qb)?;
        let mut node = entry.node.lock();
        let kind = resolve(&mut node, &entry.store.model)?;
        let child = Arc::new(Mutex::new(BuilderNode::new(kind.entity(), false)));
        node.add_link(kind, Arc::clone(&child));
        drop(node);
        Ok(self.open_builder(entry.store, child))
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        let stores: Vec<Arc<StoreState>> = self.stores.write().drain().map(|(_, s)| s).collect();
        for store in stores {
            store.start_closing();
            store.queue.join();
        }
    }
}

impl Engine for MemoryEngine {
    fn store_open(&self, model: &[u8], config: &StoreConfig) -> NativeResult<StoreHandle> {
        let model = Model::from_bytes(model)?;
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(StoreState::new(id, model, config.clone()));
        let handle = self.next_handle();
        self.stores.write().insert(handle, state);
        self.stats.record_store_open();
        tracing::debug!(store = id, handle, "store opened");
        Ok(StoreHandle(handle))
    }

    fn store_id(&self, store: StoreHandle) -> NativeResult<u64> {
        Ok(self.store(store)?.id)
    }

    fn store_entity_id(&self, store: StoreHandle, name: &str) -> NativeResult<EntityId> {
        self.store(store)?
            .model
            .entity_by_name(name)
            .map(|e| e.id)
            .ok_or_else(|| NativeError::not_found(format!("entity {name} not found")))
    }

    fn store_property_id(&self, store: StoreHandle, entity: EntityId, name: &str) -> NativeResult<PropertyId> {
        let store = self.store(store)?;
        store
            .entity(entity)?
            .property_by_name(name)
            .map(|p| p.id)
            .ok_or_else(|| NativeError::not_found(format!("property {name} not found")))
    }

    fn store_prepare_to_close(&self, store: StoreHandle) -> NativeResult<()> {
        self.store(store)?.start_closing();
        Ok(())
    }

    fn store_close(&self, store: StoreHandle) -> NativeResult<()> {
        let state = self
            .stores
            .write()
            .remove(&store.0)
            .ok_or_else(|| self.invalid_release("store", store.0))?;
        state.start_closing();
        state.queue.join();

        let shared: Vec<u64> = {
            let mut map = self.shared_asyncs.lock();
            let keys: Vec<(u64, EntityId)> = map.keys().filter(|(s, _)| *s == state.id).copied().collect();
            keys.iter().filter_map(|k| map.remove(k)).collect()
        };
        {
            let mut asyncs = self.asyncs.lock();
            for handle in shared {
                asyncs.remove(&handle);
            }
        }
        self.observers.lock().retain(|_, s| s.id != state.id);

        self.stats.record_store_close();
        tracing::debug!(store = state.id, "store closed");
        Ok(())
    }

    fn store_await_async_completion(&self, store: StoreHandle) -> bool {
        self.store(store)
            .map(|s| s.queue.await_completion())
            .unwrap_or(false)
    }

    fn store_await_async_submitted(&self, store: StoreHandle) -> bool {
        self.store(store)
            .map(|s| s.queue.await_submitted())
            .unwrap_or(false)
    }

    fn observer_register(&self, store: StoreHandle, callback: ObserverFn) -> NativeResult<ObserverHandle> {
        let state = self.store(store)?;
        state.check_open()?;
        let token = self.next_handle();
        state.add_observer(token, callback);
        self.observers.lock().insert(token, state);
        Ok(ObserverHandle(token))
    }

    fn observer_unregister(&self, observer: ObserverHandle) -> NativeResult<()> {
        let state = self
            .observers
            .lock()
            .remove(&observer.0)
            .ok_or_else(|| self.invalid_release("observer", observer.0))?;
        state.remove_observer(observer.0);
        Ok(())
    }

    fn txn_begin(&self, store: StoreHandle, mode: TxMode) -> NativeResult<TxnHandle> {
        let store = self.store(store)?;
        let data = match mode {
            TxMode::Read => store.begin_read()?,
            TxMode::Write => store.begin_write(false)?,
        };
        let state = TxnState {
            store,
            mode,
            base_size: data.size(),
            data,
            changed: BTreeSet::new(),
            cursors: Vec::new(),
        };
        let handle = self.next_handle();
        self.txns
            .lock()
            .insert(handle, Arc::new(Mutex::new(state)));
        self.stats.record_txn_begin();
        tracing::trace!(handle, %mode, "transaction begun");
        Ok(TxnHandle(handle))
    }

    fn txn_success(&self, txn: TxnHandle) -> NativeResult<()> {
        let state = self.txn(txn)?;
        if state.lock().mode == TxMode::Read {
            return Err(NativeError::illegal_state(
                "read transactions cannot be committed",
            ));
        }
        self.txns.lock().remove(&txn.0);

        let (store, data, changed, cursors) = {
            let mut guard = state.lock();
            (
                Arc::clone(&guard.store),
                Arc::clone(&guard.data),
                std::mem::take(&mut guard.changed),
                std::mem::take(&mut guard.cursors),
            )
        };
        self.drop_cursors(&cursors);

        let result = store.publish(data);
        store.end_write();
        self.stats.record_txn_close();
        match result {
            Ok(()) => {
                self.stats.record_txn_commit();
                tracing::trace!(handle = txn.0, "transaction committed");
                store.notify(&changed);
                Ok(())
            }
            Err(e) => {
                self.stats.record_txn_rollback();
                Err(e)
            }
        }
    }

    fn txn_close(&self, txn: TxnHandle) -> NativeResult<()> {
        let state = self
            .txns
            .lock()
            .remove(&txn.0)
            .ok_or_else(|| self.invalid_release("transaction", txn.0))?;
        let (store, mode, cursors) = {
            let mut guard = state.lock();
            (
                Arc::clone(&guard.store),
                guard.mode,
                std::mem::take(&mut guard.cursors),
            )
        };
        self.drop_cursors(&cursors);
        match mode {
            TxMode::Read => store.end_read(),
            TxMode::Write => {
                store.end_write();
                self.stats.record_txn_rollback();
                tracing::trace!(handle = txn.0, "transaction rolled back");
            }
        }
        self.stats.record_txn_close();
        Ok(())
    }

    fn txn_data_size(&self, txn: TxnHandle) -> NativeResult<(u64, i64)> {
        let state = self.txn(txn)?;
        let guard = state.lock();
        let change = guard.data.size() as i64 - guard.base_size as i64;
        Ok((guard.base_size, change))
    }

    fn cursor_open(&self, txn: TxnHandle, entity: EntityId) -> NativeResult<CursorHandle> {
        let state = self.txn(txn)?;
        state.lock().store.entity(entity)?;
        let handle = self.next_handle();
        self.cursors.lock().insert(
            handle,
            CursorState {
                state: Arc::clone(&state),
                entity,
                position: Arc::new(Mutex::new(None)),
            },
        );
        state.lock().cursors.push(handle);
        self.stats.record_cursor_open();
        Ok(CursorHandle(handle))
    }

    fn cursor_close(&self, cursor: CursorHandle) -> NativeResult<()> {
        let state = self
            .cursors
            .lock()
            .remove(&cursor.0)
            .ok_or_else(|| self.invalid_release("cursor", cursor.0))?;
        state.state.lock().cursors.retain(|c| *c != cursor.0);
        self.stats.record_cursor_close();
        Ok(())
    }

    fn cursor_get(&self, cursor: CursorHandle, id: ObjectId) -> NativeResult<Vec<u8>> {
        let c = self.cursor(cursor)?;
        let data = c.data();
        let object = data
            .object(c.entity, id)
            .ok_or_else(|| NativeError::not_found(format!("object {id} not found")))?;
        *c.position.lock() = Some(id);
        Ok(object.bytes.to_vec())
    }

    fn cursor_first(&self, cursor: CursorHandle) -> NativeResult<Vec<u8>> {
        let id = self.cursor_seek_first_id(cursor)?;
        self.cursor_get(cursor, id)
    }

    fn cursor_next(&self, cursor: CursorHandle) -> NativeResult<Vec<u8>> {
        let id = self.cursor_seek_next_id(cursor)?;
        self.cursor_get(cursor, id)
    }

    fn cursor_seek_first_id(&self, cursor: CursorHandle) -> NativeResult<ObjectId> {
        let c = self.cursor(cursor)?;
        let data = c.data();
        let id = data
            .objects(c.entity)
            .and_then(|objects| objects.keys().next().copied())
            .ok_or_else(|| NativeError::not_found("no objects"))?;
        *c.position.lock() = Some(id);
        Ok(id)
    }

    fn cursor_seek_next_id(&self, cursor: CursorHandle) -> NativeResult<ObjectId> {
        let c = self.cursor(cursor)?;
        let Some(current) = *c.position.lock() else {
            return self.cursor_seek_first_id(cursor);
        };
        let data = c.data();
        let id = data
            .objects(c.entity)
            .and_then(|objects| {
                objects
                    .range((Bound::Excluded(current), Bound::Unbounded))
                    .next()
                    .map(|(id, _)| *id)
            })
            .ok_or_else(|| NativeError::not_found("no more objects"))?;
        *c.position.lock() = Some(id);
        Ok(id)
    }

    fn cursor_id_for_put(&self, cursor: CursorHandle, id: ObjectId) -> NativeResult<ObjectId> {
        let c = self.cursor(cursor)?;
        let guard = c.state.lock();
        guard.require_write()?;
        Ok(guard.store.next_id(c.entity, id))
    }

    fn cursor_put(&self, cursor: CursorHandle, id: ObjectId, data: &[u8], mode: PutMode) -> NativeResult<()> {
        let c = self.cursor(cursor)?;
        let mut guard = c.state.lock();
        guard.require_write()?;
        let store = Arc::clone(&guard.store);
        let entity = store.entity(c.entity)?;
        Arc::make_mut(&mut guard.data).put(entity, id, data, mode)?;
        guard.changed.insert(c.entity);
        Ok(())
    }

    fn cursor_remove(&self, cursor: CursorHandle, id: ObjectId) -> NativeResult<()> {
        let c = self.cursor(cursor)?;
        let mut guard = c.state.lock();
        guard.require_write()?;
        if guard.data.object(c.entity, id).is_none() {
            return Err(NativeError::not_found(format!("object {id} not found")));
        }
        Arc::make_mut(&mut guard.data).remove(c.entity, id);
        guard.changed.insert(c.entity);
        Ok(())
    }

    fn cursor_remove_all(&self, cursor: CursorHandle) -> NativeResult<u64> {
        let c = self.cursor(cursor)?;
        let mut guard = c.state.lock();
        guard.require_write()?;
        let removed = Arc::make_mut(&mut guard.data).remove_all(c.entity);
        if removed > 0 {
            guard.changed.insert(c.entity);
        }
        Ok(removed)
    }

    fn cursor_count(&self, cursor: CursorHandle, limit: u64) -> NativeResult<u64> {
        let c = self.cursor(cursor)?;
        let count = c.data().objects(c.entity).map_or(0, |o| o.len() as u64);
        Ok(if limit == 0 { count } else { count.min(limit) })
    }

    fn cursor_rel_put(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        source: ObjectId,
        target: ObjectId,
    ) -> NativeResult<()> {
        let c = self.cursor(cursor)?;
        let mut guard = c.state.lock();
        guard.require_write()?;
        let ends = Self::relation_ends(&guard.store, relation, c.entity, true)?;
        for (entity, id) in [(ends.0, source), (ends.1, target)] {
            if guard.data.object(entity, id).is_none() {
                return Err(NativeError::new(
                    error::ID_NOT_FOUND,
                    format!("{entity} has no object {id}"),
                ));
            }
        }
        if Arc::make_mut(&mut guard.data).link(relation, ends, source, target) {
            guard.changed.insert(ends.0);
        }
        Ok(())
    }

    fn cursor_rel_remove(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        source: ObjectId,
        target: ObjectId,
    ) -> NativeResult<()> {
        let c = self.cursor(cursor)?;
        let mut guard = c.state.lock();
        guard.require_write()?;
        let (source_entity, _) = Self::relation_ends(&guard.store, relation, c.entity, true)?;
        if Arc::make_mut(&mut guard.data).unlink(relation, source, target) {
            guard.changed.insert(source_entity);
        }
        Ok(())
    }

    fn cursor_rel_ids(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        source: ObjectId,
    ) -> NativeResult<Vec<ObjectId>> {
        let c = self.cursor(cursor)?;
        let guard = c.state.lock();
        Self::relation_ends(&guard.store, relation, c.entity, false)?;
        let ids = guard.data.linked_targets(relation, source).collect();
        Ok(ids)
    }

    fn cursor_rel_backlink_ids(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        target: ObjectId,
    ) -> NativeResult<Vec<ObjectId>> {
        let c = self.cursor(cursor)?;
        let guard = c.state.lock();
        Self::relation_ends(&guard.store, relation, c.entity, true)?;
        let ids = guard.data.linked_sources(relation, target).collect();
        Ok(ids)
    }

    fn cursor_backlink_ids(
        &self,
        cursor: CursorHandle,
        prop: PropertyId,
        target: ObjectId,
    ) -> NativeResult<Vec<ObjectId>> {
        let c = self.cursor(cursor)?;
        let guard = c.state.lock();
        let is_relation = guard
            .store
            .model
            .entity(c.entity)
            .and_then(|e| e.property(prop))
            .is_some_and(|p| p.kind == PropertyType::Relation);
        if !is_relation {
            return Err(NativeError::type_mismatch(format!(
                "{prop} of {} is not a relation",
                c.entity
            )));
        }
        let ids = guard.data.objects(c.entity).map_or_else(Vec::new, |objects| {
            objects
                .iter()
                .filter(|(_, obj)| obj.record.get_i64(prop) == Some(target as i64))
                .map(|(id, _)| *id)
                .collect()
        });
        Ok(ids)
    }

    fn qb_open(&self, store: StoreHandle, entity: EntityId) -> NativeResult<QueryBuilderHandle> {
        let state = self.store(store)?;
        state.check_open()?;
        state.entity(entity)?;
        let node = Arc::new(Mutex::new(BuilderNode::new(entity, true)));
        Ok(self.open_builder(state, node))
    }

    fn qb_close(&self, qb: QueryBuilderHandle) -> NativeResult<()> {
        self.builders
            .lock()
            .remove(&qb.0)
            .ok_or_else(|| self.invalid_release("query builder", qb.0))?;
        self.stats.record_builder_close();
        Ok(())
    }

    fn qb_type_id(&self, qb: QueryBuilderHandle) -> NativeResult<EntityId> {
        Ok(self.builder(qb)?.node.lock().entity)
    }

    fn qb_error(&self, qb: QueryBuilderHandle) -> Option<NativeError> {
        self.builder(qb).ok()?.node.lock().error()
    }

    fn qb_null(&self, qb: QueryBuilderHandle, prop: PropertyId) -> NativeResult<ConditionId> {
        self.register(qb, NativeCondition::Null { prop })
    }

    fn qb_not_null(&self, qb: QueryBuilderHandle, prop: PropertyId) -> NativeResult<ConditionId> {
        self.register(qb, NativeCondition::NotNull { prop })
    }

    fn qb_int(&self, qb: QueryBuilderHandle, prop: PropertyId, op: QueryOp, a: i64, b: i64) -> NativeResult<ConditionId> {
        self.register(qb, NativeCondition::Int { prop, op, a, b })
    }

    fn qb_double(&self, qb: QueryBuilderHandle, prop: PropertyId, op: QueryOp, a: f64, b: f64) -> NativeResult<ConditionId> {
        self.register(qb, NativeCondition::Double { prop, op, a, b })
    }

    fn qb_string(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        op: QueryOp,
        value: &str,
        case_sensitive: bool,
    ) -> NativeResult<ConditionId> {
        self.register(
            qb,
            NativeCondition::Str {
                prop,
                op,
                value: value.to_string(),
                case_sensitive,
            },
        )
    }

    fn qb_any_equals_string(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        value: &str,
        case_sensitive: bool,
    ) -> NativeResult<ConditionId> {
        self.register(
            qb,
            NativeCondition::AnyEquals {
                prop,
                value: value.to_string(),
                case_sensitive,
            },
        )
    }

    fn qb_in_strings(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        values: &[String],
        case_sensitive: bool,
    ) -> NativeResult<ConditionId> {
        self.register(
            qb,
            NativeCondition::InStrings {
                prop,
                values: values.to_vec(),
                case_sensitive,
            },
        )
    }

    fn qb_int32s(&self, qb: QueryBuilderHandle, prop: PropertyId, op: QueryOp, values: &[i32]) -> NativeResult<ConditionId> {
        self.register(
            qb,
            NativeCondition::Ints {
                prop,
                op,
                values: values.iter().map(|v| i64::from(*v)).collect(),
                wide: false,
            },
        )
    }

    fn qb_int64s(&self, qb: QueryBuilderHandle, prop: PropertyId, op: QueryOp, values: &[i64]) -> NativeResult<ConditionId> {
        self.register(
            qb,
            NativeCondition::Ints {
                prop,
                op,
                values: values.to_vec(),
                wide: true,
            },
        )
    }

    fn qb_bytes(&self, qb: QueryBuilderHandle, prop: PropertyId, op: QueryOp, value: &[u8]) -> NativeResult<ConditionId> {
        self.register(
            qb,
            NativeCondition::Bytes {
                prop,
                op,
                value: value.to_vec(),
            },
        )
    }

    fn qb_nearest_neighbors_f32(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        query: &[f32],
        max_results: u32,
    ) -> NativeResult<ConditionId> {
        let entry = self.builder(qb)?;
        let entity = entry.node.lock().entity;
        let distance = Self::distance_of(&entry.store, entity, prop);
        self.register(
            qb,
            NativeCondition::Nearest {
                prop,
                query: query.to_vec(),
                max_results,
                distance,
            },
        )
    }

    fn qb_all(&self, qb: QueryBuilderHandle, conditions: &[ConditionId]) -> NativeResult<ConditionId> {
        let entry = self.builder(qb)?;
        let id = entry.node.lock().combine(conditions, false)?;
        self.stats.record_combine_all();
        Ok(id)
    }

    fn qb_any(&self, qb: QueryBuilderHandle, conditions: &[ConditionId]) -> NativeResult<ConditionId> {
        let entry = self.builder(qb)?;
        let id = entry.node.lock().combine(conditions, true)?;
        self.stats.record_combine_any();
        Ok(id)
    }

    fn qb_order(&self, qb: QueryBuilderHandle, prop: PropertyId, flags: u32) -> NativeResult<()> {
        let entry = self.builder(qb)?;
        let result = entry.node.lock().order(&entry.store.model, prop, flags);
        result
    }

    fn qb_relation_count(
        &self,
        qb: QueryBuilderHandle,
        relation_entity: EntityId,
        relation_prop: PropertyId,
        count: u32,
    ) -> NativeResult<ConditionId> {
        self.register(
            qb,
            NativeCondition::RelationCount {
                entity: relation_entity,
                prop: relation_prop,
                count,
            },
        )
    }

    fn qb_link_property(&self, qb: QueryBuilderHandle, prop: PropertyId) -> NativeResult<QueryBuilderHandle> {
        self.link(qb, |node, model| node.link_kind(model, None, prop))
    }

    fn qb_backlink_property(
        &self,
        qb: QueryBuilderHandle,
        source_entity: EntityId,
        prop: PropertyId,
    ) -> NativeResult<QueryBuilderHandle> {
        self.link(qb, |node, model| node.link_kind(model, Some(source_entity), prop))
    }

    fn qb_link_standalone(&self, qb: QueryBuilderHandle, relation: RelationId) -> NativeResult<QueryBuilderHandle> {
        self.link(qb, |node, model| node.standalone_link_kind(model, relation, false))
    }

    fn qb_backlink_standalone(&self, qb: QueryBuilderHandle, relation: RelationId) -> NativeResult<QueryBuilderHandle> {
        self.link(qb, |node, model| node.standalone_link_kind(model, relation, true))
    }

    fn query_build(&self, qb: QueryBuilderHandle) -> NativeResult<QueryHandle> {
        let entry = self.builder(qb)?;
        let plan = {
            let node = entry.node.lock();
            if !node.is_root {
                return Err(NativeError::illegal_state(
                    "queries can only be built from a root query builder",
                ));
            }
            node.compile()?
        };
        let handle = self.next_handle();
        tracing::debug!(handle, query = %plan.describe(&entry.store.model), "query built");
        self.queries.lock().insert(
            handle,
            QueryState {
                store: entry.store,
                plan,
                offset: 0,
                limit: 0,
            },
        );
        self.stats.record_query_build();
        Ok(QueryHandle(handle))
    }

    fn query_clone(&self, query: QueryHandle) -> NativeResult<QueryHandle> {
        let state = self.query(query)?;
        let handle = self.next_handle();
        self.queries.lock().insert(handle, state);
        self.stats.record_query_build();
        Ok(QueryHandle(handle))
    }

    fn query_close(&self, query: QueryHandle) -> NativeResult<()> {
        self.queries
            .lock()
            .remove(&query.0)
            .ok_or_else(|| self.invalid_release("query", query.0))?;
        self.stats.record_query_close();
        Ok(())
    }

    fn query_offset(&self, query: QueryHandle, offset: u64) -> NativeResult<()> {
        let mut queries = self.queries.lock();
        let q = queries
            .get_mut(&query.0)
            .ok_or_else(|| NativeError::illegal_state(format!("{query} is not open")))?;
        q.offset = offset;
        Ok(())
    }

    fn query_limit(&self, query: QueryHandle, limit: u64) -> NativeResult<()> {
        let mut queries = self.queries.lock();
        let q = queries
            .get_mut(&query.0)
            .ok_or_else(|| NativeError::illegal_state(format!("{query} is not open")))?;
        q.limit = limit;
        Ok(())
    }

    fn query_find(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<Vec<u8>>> {
        let (q, _, data) = self.view(query, cursor)?;
        Ok(Self::select(&q, &data, false)
            .into_iter()
            .map(|m| m.object.bytes.to_vec())
            .collect())
    }

    fn query_find_ids(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<ObjectId>> {
        let (q, _, data) = self.view(query, cursor)?;
        Ok(Self::select(&q, &data, false)
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    fn query_visit(
        &self,
        query: QueryHandle,
        cursor: CursorHandle,
        visitor: &mut dyn FnMut(&[u8]) -> bool,
    ) -> NativeResult<()> {
        let (q, _, data) = self.view(query, cursor)?;
        for m in Self::select(&q, &data, false) {
            if !visitor(&m.object.bytes) {
                break;
            }
        }
        Ok(())
    }

    fn query_visit_with_score(
        &self,
        query: QueryHandle,
        cursor: CursorHandle,
        visitor: &mut dyn FnMut(&[u8], f64) -> bool,
    ) -> NativeResult<()> {
        let (q, _, data) = self.view(query, cursor)?;
        for m in Self::select(&q, &data, true) {
            if !visitor(&m.object.bytes, m.score) {
                break;
            }
        }
        Ok(())
    }

    fn query_find_with_scores(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<(Vec<u8>, f64)>> {
        let (q, _, data) = self.view(query, cursor)?;
        Ok(Self::select(&q, &data, true)
            .into_iter()
            .map(|m| (m.object.bytes.to_vec(), m.score))
            .collect())
    }

    fn query_find_ids_with_scores(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<(ObjectId, f64)>> {
        let (q, _, data) = self.view(query, cursor)?;
        Ok(Self::select(&q, &data, true)
            .into_iter()
            .map(|m| (m.id, m.score))
            .collect())
    }

    fn query_find_ids_by_score(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<ObjectId>> {
        let (q, _, data) = self.view(query, cursor)?;
        Ok(Self::select(&q, &data, true)
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    fn query_find_first(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<u8>> {
        let (q, _, data) = self.view(query, cursor)?;
        Self::select(&q, &data, false)
            .first()
            .map(|m| m.object.bytes.to_vec())
            .ok_or_else(|| NativeError::not_found("no matching object"))
    }

    fn query_find_unique(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<u8>> {
        let (q, _, data) = self.view(query, cursor)?;
        match q.plan.execute(&data).as_slice() {
            [] => Err(NativeError::not_found("no matching object")),
            [single] => Ok(single.object.bytes.to_vec()),
            many => Err(NativeError::new(
                error::NON_UNIQUE_RESULT,
                format!("query has {} results but at most one was expected", many.len()),
            )),
        }
    }

    fn query_count(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<u64> {
        let (q, _, data) = self.view(query, cursor)?;
        q.check_unbounded("count")?;
        Ok(q.plan.execute(&data).len() as u64)
    }

    fn query_remove(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<u64> {
        let (q, c, data) = self.view(query, cursor)?;
        q.check_unbounded("remove")?;
        let ids: Vec<ObjectId> = q.plan.execute(&data).iter().map(|m| m.id).collect();
        drop(data);

        let mut guard = c.state.lock();
        guard.require_write()?;
        if ids.is_empty() {
            return Ok(0);
        }
        let target = Arc::make_mut(&mut guard.data);
        let removed = ids.iter().filter(|id| target.remove(c.entity, **id)).count();
        guard.changed.insert(c.entity);
        Ok(removed as u64)
    }

    fn query_describe(&self, query: QueryHandle) -> NativeResult<String> {
        let q = self.query(query)?;
        Ok(q.plan.describe(&q.store.model))
    }

    fn query_describe_parameters(&self, query: QueryHandle) -> NativeResult<String> {
        let q = self.query(query)?;
        Ok(q.plan.describe_parameters(&q.store.model))
    }

    fn query_param_int(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, value: i64) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Int(value))
    }

    fn query_param_2ints(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, a: i64, b: i64) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Ints2(a, b))
    }

    fn query_param_double(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, value: f64) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Double(value))
    }

    fn query_param_2doubles(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, a: f64, b: f64) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Doubles2(a, b))
    }

    fn query_param_string(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, value: &str) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Str(value))
    }

    fn query_param_strings(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, values: &[String]) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Strings(values))
    }

    fn query_param_int64s(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, values: &[i64]) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::I64s(values))
    }

    fn query_param_int32s(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, values: &[i32]) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::I32s(values))
    }

    fn query_param_bytes(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, value: &[u8]) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Bytes(value))
    }

    fn query_param_vector_f32(&self, query: QueryHandle, entity: EntityId, prop: PropertyId, value: &[f32]) -> NativeResult<()> {
        self.set_param(query, entity, prop, Param::Vector(value))
    }

    fn async_shared(&self, store: StoreHandle, entity: EntityId) -> NativeResult<AsyncHandle> {
        let state = self.store(store)?;
        state.entity(entity)?;
        let mut shared = self.shared_asyncs.lock();
        if let Some(handle) = shared.get(&(state.id, entity)) {
            return Ok(AsyncHandle(*handle));
        }
        let handle = self.next_handle();
        let timeout = state.config.async_enqueue_timeout;
        shared.insert((state.id, entity), handle);
        self.asyncs.lock().insert(
            handle,
            AsyncEntry {
                store: state,
                entity,
                timeout,
                shared: true,
            },
        );
        Ok(AsyncHandle(handle))
    }

    fn async_open(&self, store: StoreHandle, entity: EntityId, enqueue_timeout: Duration) -> NativeResult<AsyncHandle> {
        let state = self.store(store)?;
        state.entity(entity)?;
        let handle = self.next_handle();
        self.asyncs.lock().insert(
            handle,
            AsyncEntry {
                store: state,
                entity,
                timeout: enqueue_timeout,
                shared: false,
            },
        );
        Ok(AsyncHandle(handle))
    }

    fn async_close(&self, handle: AsyncHandle) -> NativeResult<()> {
        let mut asyncs = self.asyncs.lock();
        match asyncs.get(&handle.0) {
            Some(entry) if entry.shared => Err(NativeError::illegal_state(
                "the shared async accessor must not be closed",
            )),
            Some(_) => {
                asyncs.remove(&handle.0);
                Ok(())
            }
            None => {
                drop(asyncs);
                Err(self.invalid_release("async", handle.0))
            }
        }
    }

    fn async_put(&self, handle: AsyncHandle, data: &[u8], mode: PutMode) -> NativeResult<ObjectId> {
        let entry = self.async_entry(handle)?;
        let store = &entry.store;
        store.check_open()?;
        let id_prop = store
            .entity(entry.entity)?
            .id_property()
            .map(|p| p.id)
            .ok_or_else(|| NativeError::illegal_state("entity has no id property"))?;

        let mut record = Record::from_bytes(data)?;
        let id = store.next_id(entry.entity, record.object_id(id_prop));
        record.set(id_prop, id);
        let op = AsyncOp::Put {
            entity: entry.entity,
            id,
            bytes: record.to_bytes()?,
            mode,
        };
        store.queue.enqueue(store, &self.stats, op, entry.timeout)?;
        Ok(id)
    }

    fn async_remove(&self, handle: AsyncHandle, id: ObjectId) -> NativeResult<()> {
        let entry = self.async_entry(handle)?;
        entry.store.check_open()?;
        let op = AsyncOp::Remove {
            entity: entry.entity,
            id,
        };
        entry
            .store
            .queue
            .enqueue(&entry.store, &self.stats, op, entry.timeout)
    }
}
