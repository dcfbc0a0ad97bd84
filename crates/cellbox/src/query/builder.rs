//! Query builder: lowers conditions onto the engine.

use std::fmt;
use std::marker::PhantomData;

use cellbox_engine::{ConditionId, Engine, EntityId, QueryOp};

use super::Query;
use crate::codec::EntityCodec;
use crate::condition::{Condition, ConditionSink, Leaf, Operand};
use crate::error::{Error, Result};
use crate::handle::{QueryBuilderKind, ResourceHandle};
use crate::property::{FloatVectorKind, Property, RelationKind, RelationStandalone};
use crate::store::Store;

/// Builds a [`Query`] for entity type `T`.
///
/// Each [`with`](Self::with) call lowers one condition tree; several trees
/// are ANDed. Errors are sticky: once a registration failed, every further
/// call and [`build`](Self::build) return that first error.
///
/// Builders returned by [`link`](Self::link), [`backlink`](Self::backlink)
/// and their standalone-relation counterparts constrain related objects and
/// cannot be built themselves.
pub struct QueryBuilder<T> {
    store: Store,
    handle: ResourceHandle<QueryBuilderKind>,
    entity: EntityId,
    is_root: bool,
    error: Option<Error>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: EntityCodec> QueryBuilder<T> {
    /// Opens a root builder on `store`.
    pub fn new(store: &Store) -> Result<Self> {
        let raw = store.engine().qb_open(store.handle()?, T::ENTITY_ID)?;
        Ok(Self::from_raw(store, raw, false))
    }

    fn from_raw(store: &Store, raw: cellbox_engine::QueryBuilderHandle, linked: bool) -> Self {
        Self {
            store: store.clone(),
            handle: ResourceHandle::new(store.engine().clone(), raw),
            entity: T::ENTITY_ID,
            is_root: !linked,
            error: None,
            _entity: PhantomData,
        }
    }

    /// The entity type this builder queries.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.entity
    }

    /// Whether [`build`](Self::build) may be called.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// The first error this builder ran into, if any.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        let raw = self.handle.get().ok()?;
        self.engine().qb_error(raw).map(Error::from)
    }

    fn engine(&self) -> &dyn Engine {
        self.handle.engine().as_ref()
    }

    fn check_error(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn track<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(err) = &result {
            if self.error.is_none() {
                tracing::debug!(entity = %self.entity, error = %err, "query builder failed");
                self.error = Some(err.clone());
            }
        }
        result
    }

    /// Adds a condition tree.
    pub fn with(&mut self, condition: &Condition) -> Result<&mut Self> {
        self.check_error()?;
        let result = condition.apply_to(self, true);
        self.track(result)?;
        Ok(self)
    }

    /// Appends a sort key. See [`order_flags`](cellbox_engine::order_flags).
    pub fn order<K>(&mut self, property: Property<T, K>, flags: u32) -> Result<&mut Self> {
        self.check_error()?;
        let result = self
            .handle
            .get()
            .and_then(|qb| Ok(self.engine().qb_order(qb, property.id(), flags)?));
        self.track(result)?;
        Ok(self)
    }

    /// Matches objects that exactly `count` objects of `S` point at through
    /// `relation`.
    pub fn relation_count<S: EntityCodec>(
        &mut self,
        relation: Property<S, RelationKind<T>>,
        count: u32,
    ) -> Result<&mut Self> {
        self.check_error()?;
        let result = self.handle.get().and_then(|qb| {
            Ok(self
                .engine()
                .qb_relation_count(qb, S::ENTITY_ID, relation.id(), count)?)
        });
        self.track(result)?;
        Ok(self)
    }

    /// Matches the `max_results` objects whose `property` vectors are
    /// closest to `query`. Needs a vector index on the property.
    pub fn nearest_neighbors(
        &mut self,
        property: Property<T, FloatVectorKind>,
        query: &[f32],
        max_results: u32,
    ) -> Result<&mut Self> {
        self.with(&property.nearest_neighbors(query, max_results))
    }

    /// Returns a builder for the objects `relation` points at. Conditions
    /// added to it restrict this query to objects whose target matches.
    pub fn link<U: EntityCodec>(
        &mut self,
        relation: Property<T, RelationKind<U>>,
    ) -> Result<QueryBuilder<U>> {
        self.check_error()?;
        let result = self
            .handle
            .get()
            .and_then(|qb| Ok(self.engine().qb_link_property(qb, relation.id())?));
        let raw = self.track(result)?;
        Ok(QueryBuilder::from_raw(&self.store, raw, true))
    }

    /// Returns a builder for the objects of `S` pointing at this entity
    /// through `relation`. Conditions added to it restrict this query to
    /// objects with at least one matching source.
    pub fn backlink<S: EntityCodec>(
        &mut self,
        relation: Property<S, RelationKind<T>>,
    ) -> Result<QueryBuilder<S>> {
        self.check_error()?;
        let result = self.handle.get().and_then(|qb| {
            Ok(self
                .engine()
                .qb_backlink_property(qb, S::ENTITY_ID, relation.id())?)
        });
        let raw = self.track(result)?;
        Ok(QueryBuilder::from_raw(&self.store, raw, true))
    }

    /// Returns a builder for the objects linked through the standalone
    /// `relation`. Conditions added to it restrict this query to objects with
    /// at least one matching link.
    pub fn link_standalone<U: EntityCodec>(
        &mut self,
        relation: RelationStandalone<T, U>,
    ) -> Result<QueryBuilder<U>> {
        self.check_error()?;
        let result = self
            .handle
            .get()
            .and_then(|qb| Ok(self.engine().qb_link_standalone(qb, relation.id())?));
        let raw = self.track(result)?;
        Ok(QueryBuilder::from_raw(&self.store, raw, true))
    }

    /// Returns a builder for the objects of `S` linking here through the
    /// standalone `relation`.
    pub fn backlink_standalone<S: EntityCodec>(
        &mut self,
        relation: RelationStandalone<S, T>,
    ) -> Result<QueryBuilder<S>> {
        self.check_error()?;
        let result = self
            .handle
            .get()
            .and_then(|qb| Ok(self.engine().qb_backlink_standalone(qb, relation.id())?));
        let raw = self.track(result)?;
        Ok(QueryBuilder::from_raw(&self.store, raw, true))
    }

    /// Builds the query. The builder stays usable.
    pub fn build(&self) -> Result<Query<T>> {
        if !self.is_root {
            return Err(Error::illegal_state(
                "only the root query builder can be built, not a linked one",
            ));
        }
        self.check_error()?;
        let raw = self.engine().query_build(self.handle.get()?)?;
        Ok(Query::new(self.store.clone(), raw))
    }

    /// Releases the native builder. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.handle.close()
    }
}

impl<T: EntityCodec> ConditionSink for QueryBuilder<T> {
    fn leaf(&mut self, leaf: &Leaf) -> Result<ConditionId> {
        if leaf.entity() != self.entity {
            return Err(Error::illegal_argument(format!(
                "condition on {} cannot be used in a query for {}",
                leaf.entity(),
                self.entity
            )));
        }
        let op = leaf.op();
        if !leaf.operand().supports(op) {
            return Err(Error::illegal_state(format!(
                "invalid condition - operation not supported: {op}"
            )));
        }

        let qb = self.handle.get()?;
        let prop = leaf.property();
        let engine = self.engine();
        let id = match leaf.operand() {
            Operand::None if op == QueryOp::Null => engine.qb_null(qb, prop),
            Operand::None => engine.qb_not_null(qb, prop),
            Operand::Int(a, b) => engine.qb_int(qb, prop, op, *a, *b),
            Operand::Double(a, b) => engine.qb_double(qb, prop, op, *a, *b),
            Operand::Int32s(values) => engine.qb_int32s(qb, prop, op, values),
            Operand::Int64s(values) => engine.qb_int64s(qb, prop, op, values),
            Operand::Str {
                value,
                case_sensitive,
            } => engine.qb_string(qb, prop, op, value, *case_sensitive),
            Operand::StrElement {
                value,
                case_sensitive,
            } => engine.qb_any_equals_string(qb, prop, value, *case_sensitive),
            Operand::Strings {
                values,
                case_sensitive,
            } => engine.qb_in_strings(qb, prop, values, *case_sensitive),
            Operand::Bytes(value) => engine.qb_bytes(qb, prop, op, value),
            Operand::Vector { query, max_results } => {
                engine.qb_nearest_neighbors_f32(qb, prop, query, *max_results)
            }
        }?;
        Ok(id)
    }

    fn combine(&mut self, ids: &[ConditionId], any: bool) -> Result<ConditionId> {
        let qb = self.handle.get()?;
        let id = if any {
            self.engine().qb_any(qb, ids)?
        } else {
            self.engine().qb_all(qb, ids)?
        };
        Ok(id)
    }
}

impl<T> fmt::Debug for QueryBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("entity", &self.entity)
            .field("root", &self.is_root)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::property::{IntKind, StringKind};
    use cellbox_engine::{MemoryEngine, Model, ObjectId, PropertyId, PropertyType, Record};
    use std::sync::Arc;

    struct Item {
        id: ObjectId,
    }

    impl EntityCodec for Item {
        const ENTITY_ID: EntityId = EntityId(1);

        fn object_id(&self) -> ObjectId {
            self.id
        }

        fn set_object_id(&mut self, id: ObjectId) {
            self.id = id;
        }

        fn encode(&self) -> Result<Vec<u8>> {
            Ok(Record::new().with(PropertyId(1), self.id).to_bytes()?)
        }

        fn decode(bytes: &[u8]) -> Result<Self> {
            Ok(Item {
                id: Record::from_bytes(bytes)?.object_id(PropertyId(1)),
            })
        }
    }

    struct Other;

    impl EntityCodec for Other {
        const ENTITY_ID: EntityId = EntityId(2);

        fn object_id(&self) -> ObjectId {
            0
        }

        fn set_object_id(&mut self, _id: ObjectId) {}

        fn encode(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn decode(_bytes: &[u8]) -> Result<Self> {
            Ok(Other)
        }
    }

    const NAME: Property<Item, StringKind> = Property::new(PropertyId(2));
    const SIZE: Property<Item, IntKind> = Property::new(PropertyId(3));
    const OTHER_NAME: Property<Other, StringKind> = Property::new(PropertyId(2));

    fn open() -> (Arc<MemoryEngine>, Store) {
        let model = Model::builder()
            .entity(EntityId(1), "Item")
            .id_property(PropertyId(1), "id")
            .property(PropertyId(2), "name", PropertyType::String)
            .property(PropertyId(3), "size", PropertyType::Int)
            .entity(EntityId(2), "Other")
            .id_property(PropertyId(1), "id")
            .property(PropertyId(2), "name", PropertyType::String)
            .build()
            .unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let store = Store::open(engine.clone(), Options::new(model)).unwrap();
        (engine, store)
    }

    #[test]
    fn root_and_registers_no_combination() {
        let (engine, store) = open();
        let mut qb = store.query::<Item>().unwrap();
        qb.with(&(NAME.equals("a", true) & SIZE.greater_than(1) & SIZE.less_than(9)))
            .unwrap();
        qb.build().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.combine_all_calls, 0);
        assert_eq!(stats.combine_any_calls, 0);
    }

    #[test]
    fn root_or_registers_one_combination() {
        let (engine, store) = open();
        let mut qb = store.query::<Item>().unwrap();
        qb.with(&(SIZE.equals(1) | SIZE.equals(2))).unwrap();
        assert_eq!(engine.stats().combine_any_calls, 1);
        assert_eq!(engine.stats().combine_all_calls, 0);
    }

    #[test]
    fn foreign_condition_is_rejected_and_sticky() {
        let (_, store) = open();
        let mut qb = store.query::<Item>().unwrap();
        let err = qb.with(&OTHER_NAME.equals("x", true)).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument { .. }));

        assert_eq!(qb.error(), Some(err.clone()));
        assert_eq!(qb.with(&SIZE.equals(1)).unwrap_err(), err);
        assert_eq!(qb.build().unwrap_err(), err);
    }

    #[test]
    fn engine_errors_are_sticky() {
        let (_, store) = open();
        let mut qb = store.query::<Item>().unwrap();
        // Property 9 does not exist.
        let bad = Condition::leaf(Item::ENTITY_ID, PropertyId(9), QueryOp::Equal, Operand::Int(1, 0))
            .unwrap();
        assert!(qb.with(&bad).is_err());
        assert!(qb.error().is_some());
        assert!(qb.build().is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let (engine, store) = open();
        let qb = store.query::<Item>().unwrap();
        qb.close().unwrap();
        qb.close().unwrap();
        assert!(matches!(qb.build(), Err(Error::IllegalState { .. })));
        drop(qb);
        assert_eq!(engine.stats().invalid_releases, 0);
    }
}
