//! The native engine boundary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::NativeResult;
use crate::types::{
    AsyncHandle, ConditionId, CursorHandle, EntityId, ObjectId, ObserverHandle, PropertyId,
    PutMode, QueryBuilderHandle, QueryHandle, QueryOp, RelationId, StoreHandle, TxMode,
    TxnHandle,
};

/// Callback invoked after a commit with the ids of the changed entity types.
pub type ObserverFn = Arc<dyn Fn(&[EntityId]) + Send + Sync>;

/// Store settings passed to [`Engine::store_open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum committed data size in KiB; 0 means unlimited.
    pub max_data_size_kb: u64,
    /// Maximum number of concurrent read transactions.
    pub max_readers: u32,
    /// Capacity of the async write queue.
    pub async_max_queue_length: usize,
    /// Default time an async enqueue waits for queue space.
    pub async_enqueue_timeout: Duration,
    /// Reject write transactions.
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_data_size_kb: 0,
            max_readers: 126,
            async_max_queue_length: 1000,
            async_enqueue_timeout: Duration::from_secs(1),
            read_only: false,
        }
    }
}

/// The set of native entry points the binding layer calls.
///
/// Every resource is reached through an opaque handle. Handles are released
/// through their matching close call, exactly once; releasing an unknown
/// handle is an `ILLEGAL_STATE` error. Objects cross the boundary as encoded
/// [`Record`](crate::Record) bytes.
///
/// Fallible calls return [`NativeResult`]; the error also becomes the
/// calling thread's last error. `NOT_FOUND` signals routine absence and is
/// never a failure.
///
/// # Invariants
///
/// - Query builder errors are sticky: after the first failed registration
///   [`Engine::qb_error`] reports it and [`Engine::query_build`] fails.
/// - A transaction is committed only by [`Engine::txn_success`]; closing an
///   uncommitted transaction rolls it back.
/// - Closing a transaction also releases the cursors opened in it.
/// - Implementations must be `Send + Sync`.
///
/// # Implementors
///
/// - [`crate::MemoryEngine`] - in-memory reference engine
pub trait Engine: Send + Sync + fmt::Debug {
    // --- store -----------------------------------------------------------

    /// Opens a store for the CBOR-encoded [`Model`](crate::Model).
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if the model is invalid.
    fn store_open(&self, model: &[u8], config: &StoreConfig) -> NativeResult<StoreHandle>;

    /// Returns a process-unique id of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn store_id(&self, store: StoreHandle) -> NativeResult<u64>;

    /// Resolves an entity id by name (`NOT_FOUND` if absent).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn store_entity_id(&self, store: StoreHandle, name: &str) -> NativeResult<EntityId>;

    /// Resolves a property id by name (`NOT_FOUND` if absent).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle or entity is unknown.
    fn store_property_id(
        &self,
        store: StoreHandle,
        entity: EntityId,
        name: &str,
    ) -> NativeResult<PropertyId>;

    /// Signals that the store is about to close: new transactions and async
    /// submissions fail with `SHUTTING_DOWN`, waiters wake up.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn store_prepare_to_close(&self, store: StoreHandle) -> NativeResult<()>;

    /// Closes the store and releases its handle. Pending async work is
    /// drained first.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn store_close(&self, store: StoreHandle) -> NativeResult<()>;

    /// Blocks until the async queue is empty and idle. Returns false on
    /// shutdown or if queued work failed since the last await.
    fn store_await_async_completion(&self, store: StoreHandle) -> bool;

    /// Blocks until the async work submitted before this call is processed.
    /// Returns false on shutdown or if queued work failed since the last
    /// await.
    fn store_await_async_submitted(&self, store: StoreHandle) -> bool;

    /// Registers a commit observer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unknown or closing.
    fn observer_register(
        &self,
        store: StoreHandle,
        callback: ObserverFn,
    ) -> NativeResult<ObserverHandle>;

    /// Unregisters an observer. When this returns the callback is no longer
    /// running and will not be invoked again.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` if the token is unknown.
    fn observer_unregister(&self, observer: ObserverHandle) -> NativeResult<()>;

    // --- transactions ----------------------------------------------------

    /// Begins a transaction. Write transactions wait for the single writer
    /// slot.
    ///
    /// # Errors
    ///
    /// Returns `SHUTTING_DOWN` if the store is closing, `ILLEGAL_STATE` for
    /// writes on a read-only store and `MAX_READERS_EXCEEDED` if too many
    /// readers are active.
    fn txn_begin(&self, store: StoreHandle, mode: TxMode) -> NativeResult<TxnHandle>;

    /// Commits a write transaction and releases its handle.
    ///
    /// On failure the transaction is rolled back and the handle is released
    /// as well.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` for read transactions and
    /// `MAX_DATA_SIZE_EXCEEDED` if the commit would grow the store past its
    /// limit.
    fn txn_success(&self, txn: TxnHandle) -> NativeResult<()>;

    /// Rolls back (if not committed) and releases the transaction.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` if the handle is unknown.
    fn txn_close(&self, txn: TxnHandle) -> NativeResult<()>;

    /// Returns the committed data size in bytes and the size change of this
    /// transaction so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn txn_data_size(&self, txn: TxnHandle) -> NativeResult<(u64, i64)>;

    // --- cursors ---------------------------------------------------------

    /// Opens a cursor over one entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction or entity is unknown.
    fn cursor_open(&self, txn: TxnHandle, entity: EntityId) -> NativeResult<CursorHandle>;

    /// Releases a cursor.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` if the handle is unknown.
    fn cursor_close(&self, cursor: CursorHandle) -> NativeResult<()>;

    /// Reads an object by id (`NOT_FOUND` if absent) and positions the
    /// cursor on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn cursor_get(&self, cursor: CursorHandle, id: ObjectId) -> NativeResult<Vec<u8>>;

    /// Reads the first object (`NOT_FOUND` if empty).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn cursor_first(&self, cursor: CursorHandle) -> NativeResult<Vec<u8>>;

    /// Reads the object after the current position (`NOT_FOUND` at the end).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn cursor_next(&self, cursor: CursorHandle) -> NativeResult<Vec<u8>>;

    /// Positions on the first object and returns its id (`NOT_FOUND` if
    /// empty).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn cursor_seek_first_id(&self, cursor: CursorHandle) -> NativeResult<ObjectId>;

    /// Advances and returns the next id (`NOT_FOUND` at the end).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn cursor_seek_next_id(&self, cursor: CursorHandle) -> NativeResult<ObjectId>;

    /// Reserves the id for a put: a new id for 0, `id` itself otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` outside a write transaction.
    fn cursor_id_for_put(&self, cursor: CursorHandle, id: ObjectId) -> NativeResult<ObjectId>;

    /// Writes an object under `id`, which must have been reserved with
    /// [`Engine::cursor_id_for_put`].
    ///
    /// # Errors
    ///
    /// Returns `ID_ALREADY_EXISTS` / `ID_NOT_FOUND` for insert / update
    /// conflicts, `UNIQUE_VIOLATED` for unique property clashes and
    /// `ILLEGAL_STATE` outside a write transaction.
    fn cursor_put(
        &self,
        cursor: CursorHandle,
        id: ObjectId,
        data: &[u8],
        mode: PutMode,
    ) -> NativeResult<()>;

    /// Removes an object (`NOT_FOUND` if absent).
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` outside a write transaction.
    fn cursor_remove(&self, cursor: CursorHandle, id: ObjectId) -> NativeResult<()>;

    /// Removes all objects of the cursor's entity and returns their count.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` outside a write transaction.
    fn cursor_remove_all(&self, cursor: CursorHandle) -> NativeResult<u64>;

    /// Counts objects, stopping at `limit` (0 means no limit).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn cursor_count(&self, cursor: CursorHandle, limit: u64) -> NativeResult<u64>;

    // --- relations -------------------------------------------------------

    /// Links `source` to `target` through a standalone relation. The cursor
    /// must be on the relation's source entity. Linking twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` for an unknown relation or a cursor on the
    /// wrong entity, `ID_NOT_FOUND` if either object does not exist, and
    /// `ILLEGAL_STATE` outside a write transaction.
    fn cursor_rel_put(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        source: ObjectId,
        target: ObjectId,
    ) -> NativeResult<()>;

    /// Removes the link between `source` and `target`, if there is one. The
    /// cursor must be on the relation's source entity.
    ///
    /// # Errors
    ///
    /// As [`cursor_rel_put`](Self::cursor_rel_put), without the existence
    /// checks.
    fn cursor_rel_remove(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        source: ObjectId,
        target: ObjectId,
    ) -> NativeResult<()>;

    /// Ids of the objects `source` links to, ascending. The cursor must be
    /// on the relation's target entity.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` for an unknown relation or a cursor on the
    /// wrong entity.
    fn cursor_rel_ids(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        source: ObjectId,
    ) -> NativeResult<Vec<ObjectId>>;

    /// Ids of the objects linking to `target`, ascending. The cursor must be
    /// on the relation's source entity.
    ///
    /// # Errors
    ///
    /// As [`cursor_rel_ids`](Self::cursor_rel_ids).
    fn cursor_rel_backlink_ids(
        &self,
        cursor: CursorHandle,
        relation: RelationId,
        target: ObjectId,
    ) -> NativeResult<Vec<ObjectId>>;

    /// Ids of the cursor entity's objects whose to-one relation `prop`
    /// points at `target`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` if `prop` is not a relation of the
    /// cursor's entity.
    fn cursor_backlink_ids(
        &self,
        cursor: CursorHandle,
        prop: PropertyId,
        target: ObjectId,
    ) -> NativeResult<Vec<ObjectId>>;

    // --- query builder ---------------------------------------------------

    /// Opens a root query builder for an entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or entity is unknown.
    fn qb_open(&self, store: StoreHandle, entity: EntityId) -> NativeResult<QueryBuilderHandle>;

    /// Releases a builder. Builders linked from it stay valid for their
    /// parent.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` if the handle is unknown.
    fn qb_close(&self, qb: QueryBuilderHandle) -> NativeResult<()>;

    /// Returns the entity type of a builder.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn qb_type_id(&self, qb: QueryBuilderHandle) -> NativeResult<EntityId>;

    /// Returns the first registration error of the builder, if any.
    fn qb_error(&self, qb: QueryBuilderHandle) -> Option<crate::NativeError>;

    /// Registers an "is null" condition.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is unknown.
    fn qb_null(&self, qb: QueryBuilderHandle, prop: PropertyId) -> NativeResult<ConditionId>;

    /// Registers an "is not null" condition.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is unknown.
    fn qb_not_null(&self, qb: QueryBuilderHandle, prop: PropertyId)
        -> NativeResult<ConditionId>;

    /// Registers an integer comparison. `b` is only used by `Between`.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-integer properties and
    /// `ILLEGAL_ARGUMENT` for unsupported operators.
    fn qb_int(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        op: QueryOp,
        a: i64,
        b: i64,
    ) -> NativeResult<ConditionId>;

    /// Registers a floating point comparison. `b` is only used by `Between`.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-floating properties and
    /// `ILLEGAL_ARGUMENT` for unsupported operators.
    fn qb_double(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        op: QueryOp,
        a: f64,
        b: f64,
    ) -> NativeResult<ConditionId>;

    /// Registers a string comparison on a string property.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-string properties and
    /// `ILLEGAL_ARGUMENT` for unsupported operators.
    fn qb_string(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        op: QueryOp,
        value: &str,
        case_sensitive: bool,
    ) -> NativeResult<ConditionId>;

    /// Registers "string vector contains an element equal to `value`".
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non string-vector properties.
    fn qb_any_equals_string(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        value: &str,
        case_sensitive: bool,
    ) -> NativeResult<ConditionId>;

    /// Registers "string is one of `values`".
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-string properties.
    fn qb_in_strings(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        values: &[String],
        case_sensitive: bool,
    ) -> NativeResult<ConditionId>;

    /// Registers an `In`/`NotIn` condition over `i32` values.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-integer properties and
    /// `ILLEGAL_ARGUMENT` for unsupported operators.
    fn qb_int32s(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        op: QueryOp,
        values: &[i32],
    ) -> NativeResult<ConditionId>;

    /// Registers an `In`/`NotIn` condition over `i64` values.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-integer properties and
    /// `ILLEGAL_ARGUMENT` for unsupported operators.
    fn qb_int64s(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        op: QueryOp,
        values: &[i64],
    ) -> NativeResult<ConditionId>;

    /// Registers a byte-wise comparison.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-bytes properties and
    /// `ILLEGAL_ARGUMENT` for unsupported operators.
    fn qb_bytes(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        op: QueryOp,
        value: &[u8],
    ) -> NativeResult<ConditionId>;

    /// Registers a nearest neighbor search.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if the property has no vector index.
    fn qb_nearest_neighbors_f32(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
        query: &[f32],
        max_results: u32,
    ) -> NativeResult<ConditionId>;

    /// Combines registered conditions with AND.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` for unknown condition ids.
    fn qb_all(&self, qb: QueryBuilderHandle, conditions: &[ConditionId])
        -> NativeResult<ConditionId>;

    /// Combines registered conditions with OR.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` for unknown condition ids.
    fn qb_any(&self, qb: QueryBuilderHandle, conditions: &[ConditionId])
        -> NativeResult<ConditionId>;

    /// Appends a sort key (see [`crate::order_flags`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the property is unknown.
    fn qb_order(&self, qb: QueryBuilderHandle, prop: PropertyId, flags: u32) -> NativeResult<()>;

    /// Registers "exactly `count` objects of `relation_entity` point here
    /// through `relation_prop`".
    ///
    /// # Errors
    ///
    /// Returns an error if the relation does not target this builder's
    /// entity.
    fn qb_relation_count(
        &self,
        qb: QueryBuilderHandle,
        relation_entity: EntityId,
        relation_prop: PropertyId,
        count: u32,
    ) -> NativeResult<ConditionId>;

    /// Follows a to-one relation of this builder's entity. Conditions on the
    /// returned builder constrain the related object.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` for non-relation properties.
    fn qb_link_property(
        &self,
        qb: QueryBuilderHandle,
        prop: PropertyId,
    ) -> NativeResult<QueryBuilderHandle>;

    /// Follows a relation of `source_entity` that points at this builder's
    /// entity, backwards. Conditions on the returned builder constrain the
    /// source objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation does not target this builder's
    /// entity.
    fn qb_backlink_property(
        &self,
        qb: QueryBuilderHandle,
        source_entity: EntityId,
        prop: PropertyId,
    ) -> NativeResult<QueryBuilderHandle>;

    /// Follows a standalone relation of this builder's entity. Conditions
    /// on the returned builder constrain the linked objects.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` if the relation does not start at
    /// this builder's entity.
    fn qb_link_standalone(
        &self,
        qb: QueryBuilderHandle,
        relation: RelationId,
    ) -> NativeResult<QueryBuilderHandle>;

    /// Follows a standalone relation that targets this builder's entity,
    /// backwards. Conditions on the returned builder constrain the source
    /// objects.
    ///
    /// # Errors
    ///
    /// Returns `PROPERTY_TYPE_MISMATCH` if the relation does not target this
    /// builder's entity.
    fn qb_backlink_standalone(
        &self,
        qb: QueryBuilderHandle,
        relation: RelationId,
    ) -> NativeResult<QueryBuilderHandle>;

    // --- queries ---------------------------------------------------------

    /// Compiles a root builder into a query.
    ///
    /// # Errors
    ///
    /// Returns the builder's sticky error, or `ILLEGAL_STATE` for linked
    /// builders.
    fn query_build(&self, qb: QueryBuilderHandle) -> NativeResult<QueryHandle>;

    /// Creates an independent copy of a query, parameters included.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn query_clone(&self, query: QueryHandle) -> NativeResult<QueryHandle>;

    /// Releases a query.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` if the handle is unknown.
    fn query_close(&self, query: QueryHandle) -> NativeResult<()>;

    /// Sets the number of leading results to skip (0 resets).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn query_offset(&self, query: QueryHandle, offset: u64) -> NativeResult<()>;

    /// Sets the maximum number of results (0 resets).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn query_limit(&self, query: QueryHandle, limit: u64) -> NativeResult<()>;

    /// Returns the encoded matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_find(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<Vec<u8>>>;

    /// Returns the ids of the matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_find_ids(&self, query: QueryHandle, cursor: CursorHandle)
        -> NativeResult<Vec<ObjectId>>;

    /// Streams matches to `visitor` until it returns false.
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_visit(
        &self,
        query: QueryHandle,
        cursor: CursorHandle,
        visitor: &mut dyn FnMut(&[u8]) -> bool,
    ) -> NativeResult<()>;

    /// Streams matches with their score, ascending by score.
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_visit_with_score(
        &self,
        query: QueryHandle,
        cursor: CursorHandle,
        visitor: &mut dyn FnMut(&[u8], f64) -> bool,
    ) -> NativeResult<()>;

    /// Returns matches with scores, ascending by score.
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_find_with_scores(
        &self,
        query: QueryHandle,
        cursor: CursorHandle,
    ) -> NativeResult<Vec<(Vec<u8>, f64)>>;

    /// Returns match ids with scores, ascending by score.
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_find_ids_with_scores(
        &self,
        query: QueryHandle,
        cursor: CursorHandle,
    ) -> NativeResult<Vec<(ObjectId, f64)>>;

    /// Returns match ids, ascending by score.
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_find_ids_by_score(
        &self,
        query: QueryHandle,
        cursor: CursorHandle,
    ) -> NativeResult<Vec<ObjectId>>;

    /// Returns the first match (`NOT_FOUND` if none).
    ///
    /// # Errors
    ///
    /// Returns an error if the query and cursor entities differ.
    fn query_find_first(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<Vec<u8>>;

    /// Returns the single match (`NOT_FOUND` if none).
    ///
    /// # Errors
    ///
    /// Returns `NON_UNIQUE_RESULT` if more than one object matches.
    fn query_find_unique(&self, query: QueryHandle, cursor: CursorHandle)
        -> NativeResult<Vec<u8>>;

    /// Counts matches.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` if an offset or limit is set.
    fn query_count(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<u64>;

    /// Removes matches and returns their count.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` if an offset or limit is set or the cursor's
    /// transaction is read-only.
    fn query_remove(&self, query: QueryHandle, cursor: CursorHandle) -> NativeResult<u64>;

    /// Describes the compiled query.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn query_describe(&self, query: QueryHandle) -> NativeResult<String>;

    /// Describes the compiled query including current parameter values.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown.
    fn query_describe_parameters(&self, query: QueryHandle) -> NativeResult<String>;

    /// Replaces the value of the single condition on `entity.prop`. On a
    /// nearest neighbor condition this sets the maximum result count.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if no or several conditions match, or the
    /// condition does not take this value shape.
    fn query_param_int(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        value: i64,
    ) -> NativeResult<()>;

    /// Replaces both values of a `Between` condition.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_2ints(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        a: i64,
        b: i64,
    ) -> NativeResult<()>;

    /// Replaces a floating point value.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_double(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        value: f64,
    ) -> NativeResult<()>;

    /// Replaces both values of a floating point `Between` condition.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_2doubles(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        a: f64,
        b: f64,
    ) -> NativeResult<()>;

    /// Replaces a string value.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_string(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        value: &str,
    ) -> NativeResult<()>;

    /// Replaces the values of a string `In` condition.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_strings(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        values: &[String],
    ) -> NativeResult<()>;

    /// Replaces the values of an `i64` `In`/`NotIn` condition.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_int64s(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        values: &[i64],
    ) -> NativeResult<()>;

    /// Replaces the values of an `i32` `In`/`NotIn` condition.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_int32s(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        values: &[i32],
    ) -> NativeResult<()>;

    /// Replaces a bytes value.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_bytes(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        value: &[u8],
    ) -> NativeResult<()>;

    /// Replaces the query vector of a nearest neighbor condition.
    ///
    /// # Errors
    ///
    /// See [`Engine::query_param_int`].
    fn query_param_vector_f32(
        &self,
        query: QueryHandle,
        entity: EntityId,
        prop: PropertyId,
        value: &[f32],
    ) -> NativeResult<()>;

    // --- async queue -----------------------------------------------------

    /// Returns the store's shared async accessor for an entity type. The
    /// shared accessor must not be closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or entity is unknown.
    fn async_shared(&self, store: StoreHandle, entity: EntityId) -> NativeResult<AsyncHandle>;

    /// Creates an owned async accessor with its own enqueue timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or entity is unknown.
    fn async_open(
        &self,
        store: StoreHandle,
        entity: EntityId,
        enqueue_timeout: Duration,
    ) -> NativeResult<AsyncHandle>;

    /// Releases an owned async accessor.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_STATE` for unknown or shared accessors.
    fn async_close(&self, handle: AsyncHandle) -> NativeResult<()>;

    /// Reserves an id (if the record carries 0), writes it into the record
    /// and enqueues the put. Returns the id.
    ///
    /// # Errors
    ///
    /// Returns `TIMEOUT` if the queue stayed full for the enqueue timeout
    /// and `SHUTTING_DOWN` if the store is closing.
    fn async_put(&self, handle: AsyncHandle, data: &[u8], mode: PutMode) -> NativeResult<ObjectId>;

    /// Enqueues a removal.
    ///
    /// # Errors
    ///
    /// See [`Engine::async_put`].
    fn async_remove(&self, handle: AsyncHandle, id: ObjectId) -> NativeResult<()>;
}
