//! Queries.
//!
//! A [`QueryBuilder`] collects conditions, sort keys and links; [`build`]
//! compiles them into a [`Query`] that can be run any number of times.
//!
//! ```rust
//! # use cellbox::{EntityCodec, Options, Result, Store};
//! # use cellbox::property::{IntKind, Property};
//! # use cellbox_engine::{EntityId, Model, ObjectId, PropertyId, PropertyType, Record};
//! # struct Score { id: ObjectId, points: i32 }
//! # impl EntityCodec for Score {
//! #     const ENTITY_ID: EntityId = EntityId(1);
//! #     fn object_id(&self) -> ObjectId { self.id }
//! #     fn set_object_id(&mut self, id: ObjectId) { self.id = id; }
//! #     fn encode(&self) -> Result<Vec<u8>> {
//! #         Ok(Record::new().with(PropertyId(1), self.id).with(PropertyId(2), self.points).to_bytes()?)
//! #     }
//! #     fn decode(bytes: &[u8]) -> Result<Self> {
//! #         let r = Record::from_bytes(bytes)?;
//! #         Ok(Score { id: r.object_id(PropertyId(1)), points: r.get_i64(PropertyId(2)).unwrap_or(0) as i32 })
//! #     }
//! # }
//! # let model = Model::builder()
//! #     .entity(EntityId(1), "Score")
//! #     .id_property(PropertyId(1), "id")
//! #     .property(PropertyId(2), "points", PropertyType::Int)
//! #     .build()
//! #     .unwrap();
//! const POINTS: Property<Score, IntKind> = Property::new(PropertyId(2));
//!
//! let store = Store::in_memory(Options::new(model)).unwrap();
//! let scores = store.entity_box::<Score>();
//! for points in [10, 40, 25] {
//!     scores.put(&mut Score { id: 0, points }).unwrap();
//! }
//!
//! let mut query = store
//!     .query::<Score>()
//!     .unwrap()
//!     .with(&POINTS.greater_than(20))
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! assert_eq!(query.count().unwrap(), 2);
//!
//! query.set_parameter_int(POINTS, 5).unwrap();
//! assert_eq!(query.count().unwrap(), 3);
//! ```
//!
//! [`build`]: QueryBuilder::build

mod builder;

use std::fmt;
use std::marker::PhantomData;

use cellbox_engine::{CursorHandle, Engine, ObjectId, QueryHandle, TxMode};

use crate::codec::EntityCodec;
use crate::condition::Operand;
use crate::cursor::CursorTx;
use crate::error::{check_found, Error, Result};
use crate::handle::{QueryKind, ResourceHandle};
use crate::property::{
    BytesKind, FloatVectorKind, FloatingKind, IntValued, IntegerKind, Property, StringKind,
};
use crate::store::Store;

pub use builder::QueryBuilder;

/// A compiled query over entity type `T`.
///
/// Offset and limit are persistent: they apply to every following `find*`
/// and `visit*` call until changed, and 0 resets them. [`count`](Self::count)
/// and [`remove`](Self::remove) refuse to run while either is set.
///
/// Every execution joins the thread's active transaction or opens its own.
pub struct Query<T> {
    store: Store,
    handle: ResourceHandle<QueryKind>,
    offset: u64,
    limit: u64,
    _entity: PhantomData<fn() -> T>,
}

impl<T: EntityCodec> Query<T> {
    pub(crate) fn new(store: Store, raw: QueryHandle) -> Self {
        let handle = ResourceHandle::new(store.engine().clone(), raw);
        Self {
            store,
            handle,
            offset: 0,
            limit: 0,
            _entity: PhantomData,
        }
    }

    fn engine(&self) -> &dyn Engine {
        self.handle.engine().as_ref()
    }

    /// Runs `f` with a cursor for `T` in a transaction of `mode`, committing
    /// write transactions when `f` succeeds.
    fn run<R>(
        &self,
        mode: TxMode,
        f: impl FnOnce(&dyn Engine, QueryHandle, CursorHandle) -> Result<R>,
    ) -> Result<R> {
        let query = self.handle.get()?;
        let ctx = CursorTx::new(&self.store, mode, T::ENTITY_ID)?;
        let result = f(self.engine(), query, ctx.cursor().raw()?)?;
        match mode {
            TxMode::Read => ctx.close()?,
            TxMode::Write => ctx.commit_and_close()?,
        }
        Ok(result)
    }

    fn read<R>(&self, f: impl FnOnce(&dyn Engine, QueryHandle, CursorHandle) -> Result<R>) -> Result<R> {
        self.run(TxMode::Read, f)
    }

    /// Skips the first `offset` results of later calls (0 = no offset).
    pub fn offset(&mut self, offset: u64) -> Result<&mut Self> {
        self.engine().query_offset(self.handle.get()?, offset)?;
        self.offset = offset;
        Ok(self)
    }

    /// Returns at most `limit` results from later calls (0 = no limit).
    pub fn limit(&mut self, limit: u64) -> Result<&mut Self> {
        self.engine().query_limit(self.handle.get()?, limit)?;
        self.limit = limit;
        Ok(self)
    }

    /// Finds all matching objects.
    pub fn find(&self) -> Result<Vec<T>> {
        let found = self.read(|engine, query, cursor| Ok(engine.query_find(query, cursor)?))?;
        found.iter().map(|bytes| T::decode(bytes)).collect()
    }

    /// Finds the ids of all matching objects.
    pub fn find_ids(&self) -> Result<Vec<ObjectId>> {
        self.read(|engine, query, cursor| Ok(engine.query_find_ids(query, cursor)?))
    }

    /// Finds the first match.
    pub fn find_first(&self) -> Result<Option<T>> {
        self.read(|engine, query, cursor| check_found(engine.query_find_first(query, cursor)))?
            .map(|bytes| T::decode(&bytes))
            .transpose()
    }

    /// Finds the only match. Fails if more than one object matches.
    pub fn find_unique(&self) -> Result<Option<T>> {
        self.read(|engine, query, cursor| check_found(engine.query_find_unique(query, cursor)))?
            .map(|bytes| T::decode(&bytes))
            .transpose()
    }

    /// Finds all matches with their scores, ascending by score.
    pub fn find_with_scores(&self) -> Result<Vec<(T, f64)>> {
        let found =
            self.read(|engine, query, cursor| Ok(engine.query_find_with_scores(query, cursor)?))?;
        found
            .into_iter()
            .map(|(bytes, score)| Ok((T::decode(&bytes)?, score)))
            .collect()
    }

    /// Finds the ids of all matches with their scores, ascending by score.
    pub fn find_ids_with_scores(&self) -> Result<Vec<(ObjectId, f64)>> {
        self.read(|engine, query, cursor| Ok(engine.query_find_ids_with_scores(query, cursor)?))
    }

    /// Finds the ids of all matches, ascending by score.
    pub fn find_ids_by_score(&self) -> Result<Vec<ObjectId>> {
        self.read(|engine, query, cursor| Ok(engine.query_find_ids_by_score(query, cursor)?))
    }

    /// Passes matches to `visitor` one at a time until it returns `false`.
    pub fn visit(&self, mut visitor: impl FnMut(T) -> bool) -> Result<()> {
        let mut failure = None;
        self.read(|engine, query, cursor| {
            Ok(engine.query_visit(query, cursor, &mut |bytes| match T::decode(bytes) {
                Ok(object) => visitor(object),
                Err(err) => {
                    failure = Some(err);
                    false
                }
            })?)
        })?;
        failure.map_or(Ok(()), Err)
    }

    /// Like [`visit`](Self::visit), also passing each match's score.
    pub fn visit_with_score(&self, mut visitor: impl FnMut(T, f64) -> bool) -> Result<()> {
        let mut failure = None;
        self.read(|engine, query, cursor| {
            Ok(engine.query_visit_with_score(query, cursor, &mut |bytes, score| {
                match T::decode(bytes) {
                    Ok(object) => visitor(object, score),
                    Err(err) => {
                        failure = Some(err);
                        false
                    }
                }
            })?)
        })?;
        failure.map_or(Ok(()), Err)
    }

    fn check_unbounded(&self, what: &str) -> Result<()> {
        if self.offset == 0 && self.limit == 0 {
            return Ok(());
        }
        Err(Error::illegal_state(format!(
            "{what} is not supported with offset ({}) or limit ({}) set",
            self.offset, self.limit
        )))
    }

    /// Counts the matches.
    pub fn count(&self) -> Result<u64> {
        self.check_unbounded("count()")?;
        self.read(|engine, query, cursor| Ok(engine.query_count(query, cursor)?))
    }

    /// Removes all matches in one write transaction. Returns how many.
    pub fn remove(&self) -> Result<u64> {
        self.check_unbounded("remove()")?;
        let removed =
            self.run(TxMode::Write, |engine, query, cursor| Ok(engine.query_remove(query, cursor)?))?;
        tracing::debug!(entity = %T::ENTITY_ID, removed, "query removed objects");
        Ok(removed)
    }

    /// Human-readable description of the query.
    pub fn describe(&self) -> Result<String> {
        Ok(self.engine().query_describe(self.handle.get()?)?)
    }

    /// Human-readable description of the query's condition values.
    pub fn describe_parameters(&self) -> Result<String> {
        Ok(self.engine().query_describe_parameters(self.handle.get()?)?)
    }

    /// Returns an independent copy: parameters, offset and limit are copied
    /// and later changes to either query do not affect the other.
    pub fn try_clone(&self) -> Result<Self> {
        let raw = self.engine().query_clone(self.handle.get()?)?;
        let mut clone = Self::new(self.store.clone(), raw);
        clone.offset = self.offset;
        clone.limit = self.limit;
        Ok(clone)
    }

    /// Releases the native query. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.handle.close()
    }

    // Parameters. Each setter replaces the value of the one condition on the
    // given property; it fails if the query has none or several.

    /// Sets the value of an integer, bool or relation condition.
    pub fn set_parameter_int<E: EntityCodec, K: IntValued>(
        &mut self,
        property: Property<E, K>,
        value: i64,
    ) -> Result<&mut Self> {
        self.engine()
            .query_param_int(self.handle.get()?, E::ENTITY_ID, property.id(), value)?;
        Ok(self)
    }

    /// Sets both bounds of an integer `between` condition.
    pub fn set_parameters_int<E: EntityCodec, K: IntValued>(
        &mut self,
        property: Property<E, K>,
        min: i64,
        max: i64,
    ) -> Result<&mut Self> {
        self.engine()
            .query_param_2ints(self.handle.get()?, E::ENTITY_ID, property.id(), min, max)?;
        Ok(self)
    }

    /// Sets the value of a floating point condition.
    pub fn set_parameter_double<E: EntityCodec, K: FloatingKind>(
        &mut self,
        property: Property<E, K>,
        value: f64,
    ) -> Result<&mut Self> {
        self.engine()
            .query_param_double(self.handle.get()?, E::ENTITY_ID, property.id(), value)?;
        Ok(self)
    }

    /// Sets both bounds of a floating point `between` condition.
    pub fn set_parameters_double<E: EntityCodec, K: FloatingKind>(
        &mut self,
        property: Property<E, K>,
        min: f64,
        max: f64,
    ) -> Result<&mut Self> {
        self.engine()
            .query_param_2doubles(self.handle.get()?, E::ENTITY_ID, property.id(), min, max)?;
        Ok(self)
    }

    /// Sets the value of a string condition.
    pub fn set_parameter_string<E: EntityCodec>(
        &mut self,
        property: Property<E, StringKind>,
        value: &str,
    ) -> Result<&mut Self> {
        self.engine()
            .query_param_string(self.handle.get()?, E::ENTITY_ID, property.id(), value)?;
        Ok(self)
    }

    /// Sets the values of a string `one_of` condition.
    pub fn set_parameter_strings<E: EntityCodec>(
        &mut self,
        property: Property<E, StringKind>,
        values: &[&str],
    ) -> Result<&mut Self> {
        let values: Vec<String> = values.iter().map(|v| (*v).to_owned()).collect();
        self.engine()
            .query_param_strings(self.handle.get()?, E::ENTITY_ID, property.id(), &values)?;
        Ok(self)
    }

    /// Sets the values of an integer `one_of` / `not_one_of` condition.
    pub fn set_parameter_values<E: EntityCodec, K: IntegerKind>(
        &mut self,
        property: Property<E, K>,
        values: &[K::Value],
    ) -> Result<&mut Self> {
        let query = self.handle.get()?;
        match K::set_operand(values) {
            Operand::Int32s(values) => {
                self.engine()
                    .query_param_int32s(query, E::ENTITY_ID, property.id(), &values)?;
            }
            Operand::Int64s(values) => {
                self.engine()
                    .query_param_int64s(query, E::ENTITY_ID, property.id(), &values)?;
            }
            other => {
                return Err(Error::illegal_argument(format!(
                    "unexpected set operand {other:?}"
                )))
            }
        }
        Ok(self)
    }

    /// Sets the value of a byte vector condition.
    pub fn set_parameter_bytes<E: EntityCodec>(
        &mut self,
        property: Property<E, BytesKind>,
        value: &[u8],
    ) -> Result<&mut Self> {
        self.engine()
            .query_param_bytes(self.handle.get()?, E::ENTITY_ID, property.id(), value)?;
        Ok(self)
    }

    /// Sets the query vector of a nearest neighbour condition.
    pub fn set_parameter_vector<E: EntityCodec>(
        &mut self,
        property: Property<E, FloatVectorKind>,
        query: &[f32],
    ) -> Result<&mut Self> {
        self.engine()
            .query_param_vector_f32(self.handle.get()?, E::ENTITY_ID, property.id(), query)?;
        Ok(self)
    }

    /// Sets the result count of a nearest neighbour condition.
    pub fn set_parameter_max_neighbors<E: EntityCodec>(
        &mut self,
        property: Property<E, FloatVectorKind>,
        max_results: u32,
    ) -> Result<&mut Self> {
        self.engine().query_param_int(
            self.handle.get()?,
            E::ENTITY_ID,
            property.id(),
            i64::from(max_results),
        )?;
        Ok(self)
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("handle", &self.handle)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}
