//! Typed property handles.
//!
//! A [`Property<E, K>`] names one property of entity type `E` with value kind
//! `K`. Its methods build [`Condition`] leaves, and only the operators that
//! fit the kind are available, so typed conditions are valid by
//! construction.
//!
//! ```rust
//! use cellbox::property::{IntKind, Property, StringKind};
//! # use cellbox::{EntityCodec, Result};
//! # use cellbox_engine::{EntityId, ObjectId, PropertyId};
//! # struct Person;
//! # impl EntityCodec for Person {
//! #     const ENTITY_ID: EntityId = EntityId(1);
//! #     fn object_id(&self) -> ObjectId { 0 }
//! #     fn set_object_id(&mut self, _: ObjectId) {}
//! #     fn encode(&self) -> Result<Vec<u8>> { Ok(Vec::new()) }
//! #     fn decode(_: &[u8]) -> Result<Self> { Ok(Person) }
//! # }
//!
//! const NAME: Property<Person, StringKind> = Property::new(PropertyId(2));
//! const AGE: Property<Person, IntKind> = Property::new(PropertyId(3));
//!
//! let adults_named_bo = NAME.starts_with("Bo", false) & AGE.greater_or_equal(18);
//! assert_eq!(adults_named_bo.leaf_count(), 2);
//! ```

use std::fmt;
use std::marker::PhantomData;

use cellbox_engine::{EntityId, ObjectId, PropertyId, QueryOp, RelationId};

use crate::codec::EntityCodec;
use crate::condition::{Condition, Operand};

/// `bool` properties.
#[derive(Debug)]
pub enum BoolKind {}
/// `i32` properties.
#[derive(Debug)]
pub enum IntKind {}
/// `i64` properties.
#[derive(Debug)]
pub enum LongKind {}
/// Timestamps stored as `i64` milliseconds.
#[derive(Debug)]
pub enum DateKind {}
/// `f32` properties.
#[derive(Debug)]
pub enum FloatKind {}
/// `f64` properties.
#[derive(Debug)]
pub enum DoubleKind {}
/// String properties.
#[derive(Debug)]
pub enum StringKind {}
/// Byte vector properties.
#[derive(Debug)]
pub enum BytesKind {}
/// String vector properties.
#[derive(Debug)]
pub enum StringVectorKind {}
/// `f32` vector properties, searchable by nearest neighbours when indexed.
#[derive(Debug)]
pub enum FloatVectorKind {}

/// To-one relation properties pointing at entity type `T`.
pub struct RelationKind<T>(PhantomData<fn() -> T>);

/// Integer kinds: comparisons, ranges and set membership.
pub trait IntegerKind {
    /// Rust type of the property values.
    type Value: Copy + Into<i64>;

    /// Builds the set operand for `In` / `NotIn`.
    fn set_operand(values: &[Self::Value]) -> Operand;
}

impl IntegerKind for IntKind {
    type Value = i32;

    fn set_operand(values: &[i32]) -> Operand {
        Operand::Int32s(values.to_vec())
    }
}

impl IntegerKind for LongKind {
    type Value = i64;

    fn set_operand(values: &[i64]) -> Operand {
        Operand::Int64s(values.to_vec())
    }
}

impl IntegerKind for DateKind {
    type Value = i64;

    fn set_operand(values: &[i64]) -> Operand {
        Operand::Int64s(values.to_vec())
    }
}

/// Floating point kinds.
pub trait FloatingKind {
    /// Rust type of the property values.
    type Value: Copy + Into<f64>;
}

impl FloatingKind for FloatKind {
    type Value = f32;
}

impl FloatingKind for DoubleKind {
    type Value = f64;
}

/// Kinds whose conditions take an integer operand and therefore accept
/// integer query parameters.
pub trait IntValued {}

impl IntValued for IntKind {}
impl IntValued for LongKind {}
impl IntValued for DateKind {}
impl IntValued for BoolKind {}
impl<T> IntValued for RelationKind<T> {}

/// A property of entity type `E` holding values of kind `K`.
pub struct Property<E, K> {
    id: PropertyId,
    _marker: PhantomData<fn() -> (E, K)>,
}

impl<E, K> Clone for Property<E, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, K> Copy for Property<E, K> {}

impl<E, K> fmt::Debug for Property<E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Property").field(&self.id).finish()
    }
}

impl<E: EntityCodec, K> Property<E, K> {
    /// Creates a handle for property `id` of `E`.
    #[must_use]
    pub const fn new(id: PropertyId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The property id.
    #[must_use]
    pub const fn id(&self) -> PropertyId {
        self.id
    }

    /// The owning entity type.
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        E::ENTITY_ID
    }

    fn leaf(&self, op: QueryOp, operand: Operand) -> Condition {
        Condition::typed(E::ENTITY_ID, self.id, op, operand)
    }

    /// The value is null.
    #[must_use]
    pub fn is_null(&self) -> Condition {
        self.leaf(QueryOp::Null, Operand::None)
    }

    /// The value is not null.
    #[must_use]
    pub fn is_not_null(&self) -> Condition {
        self.leaf(QueryOp::NotNull, Operand::None)
    }
}

macro_rules! integer_conditions {
    ($($kind:ty),*) => {$(
        impl<E: EntityCodec> Property<E, $kind> {
            fn int(&self, op: QueryOp, value: <$kind as IntegerKind>::Value) -> Condition {
                self.leaf(op, Operand::Int(value.into(), 0))
            }

            /// `== value`
            #[must_use]
            pub fn equals(&self, value: <$kind as IntegerKind>::Value) -> Condition {
                self.int(QueryOp::Equal, value)
            }

            /// `!= value`
            #[must_use]
            pub fn not_equals(&self, value: <$kind as IntegerKind>::Value) -> Condition {
                self.int(QueryOp::NotEqual, value)
            }

            /// `< value`
            #[must_use]
            pub fn less_than(&self, value: <$kind as IntegerKind>::Value) -> Condition {
                self.int(QueryOp::Less, value)
            }

            /// `<= value`
            #[must_use]
            pub fn less_or_equal(&self, value: <$kind as IntegerKind>::Value) -> Condition {
                self.int(QueryOp::LessOrEqual, value)
            }

            /// `> value`
            #[must_use]
            pub fn greater_than(&self, value: <$kind as IntegerKind>::Value) -> Condition {
                self.int(QueryOp::Greater, value)
            }

            /// `>= value`
            #[must_use]
            pub fn greater_or_equal(&self, value: <$kind as IntegerKind>::Value) -> Condition {
                self.int(QueryOp::GreaterOrEqual, value)
            }

            /// `min <= value <= max`
            #[must_use]
            pub fn between(
                &self,
                min: <$kind as IntegerKind>::Value,
                max: <$kind as IntegerKind>::Value,
            ) -> Condition {
                self.leaf(QueryOp::Between, Operand::Int(min.into(), max.into()))
            }

            /// The value is one of `values`.
            #[must_use]
            pub fn one_of(&self, values: &[<$kind as IntegerKind>::Value]) -> Condition {
                self.leaf(QueryOp::In, <$kind as IntegerKind>::set_operand(values))
            }

            /// The value is none of `values`.
            #[must_use]
            pub fn not_one_of(&self, values: &[<$kind as IntegerKind>::Value]) -> Condition {
                self.leaf(QueryOp::NotIn, <$kind as IntegerKind>::set_operand(values))
            }
        }
    )*};
}

integer_conditions!(IntKind, LongKind, DateKind);

impl<E: EntityCodec> Property<E, BoolKind> {
    /// `== value`
    #[must_use]
    pub fn equals(&self, value: bool) -> Condition {
        self.leaf(QueryOp::Equal, Operand::Int(i64::from(value), 0))
    }

    /// `!= value`
    #[must_use]
    pub fn not_equals(&self, value: bool) -> Condition {
        self.leaf(QueryOp::NotEqual, Operand::Int(i64::from(value), 0))
    }
}

macro_rules! floating_conditions {
    ($($kind:ty),*) => {$(
        impl<E: EntityCodec> Property<E, $kind> {
            fn double(&self, op: QueryOp, value: <$kind as FloatingKind>::Value) -> Condition {
                self.leaf(op, Operand::Double(value.into(), 0.0))
            }

            /// `< value`
            #[must_use]
            pub fn less_than(&self, value: <$kind as FloatingKind>::Value) -> Condition {
                self.double(QueryOp::Less, value)
            }

            /// `<= value`
            #[must_use]
            pub fn less_or_equal(&self, value: <$kind as FloatingKind>::Value) -> Condition {
                self.double(QueryOp::LessOrEqual, value)
            }

            /// `> value`
            #[must_use]
            pub fn greater_than(&self, value: <$kind as FloatingKind>::Value) -> Condition {
                self.double(QueryOp::Greater, value)
            }

            /// `>= value`
            #[must_use]
            pub fn greater_or_equal(&self, value: <$kind as FloatingKind>::Value) -> Condition {
                self.double(QueryOp::GreaterOrEqual, value)
            }

            /// `min <= value <= max`
            #[must_use]
            pub fn between(
                &self,
                min: <$kind as FloatingKind>::Value,
                max: <$kind as FloatingKind>::Value,
            ) -> Condition {
                self.leaf(QueryOp::Between, Operand::Double(min.into(), max.into()))
            }
        }
    )*};
}

floating_conditions!(FloatKind, DoubleKind);

impl<E: EntityCodec> Property<E, StringKind> {
    fn string(&self, op: QueryOp, value: &str, case_sensitive: bool) -> Condition {
        self.leaf(
            op,
            Operand::Str {
                value: value.to_owned(),
                case_sensitive,
            },
        )
    }

    /// Equal to `value`.
    #[must_use]
    pub fn equals(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::Equal, value, case_sensitive)
    }

    /// Not equal to `value`.
    #[must_use]
    pub fn not_equals(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::NotEqual, value, case_sensitive)
    }

    /// Sorts before `value`.
    #[must_use]
    pub fn less_than(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::Less, value, case_sensitive)
    }

    /// Sorts before or equal to `value`.
    #[must_use]
    pub fn less_or_equal(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::LessOrEqual, value, case_sensitive)
    }

    /// Sorts after `value`.
    #[must_use]
    pub fn greater_than(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::Greater, value, case_sensitive)
    }

    /// Sorts after or equal to `value`.
    #[must_use]
    pub fn greater_or_equal(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::GreaterOrEqual, value, case_sensitive)
    }

    /// Contains `value` as a substring.
    #[must_use]
    pub fn contains(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::Contains, value, case_sensitive)
    }

    /// Starts with `value`.
    #[must_use]
    pub fn starts_with(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::StartsWith, value, case_sensitive)
    }

    /// Ends with `value`.
    #[must_use]
    pub fn ends_with(&self, value: &str, case_sensitive: bool) -> Condition {
        self.string(QueryOp::EndsWith, value, case_sensitive)
    }

    /// Equal to one of `values`.
    #[must_use]
    pub fn one_of(&self, values: &[&str], case_sensitive: bool) -> Condition {
        self.leaf(
            QueryOp::In,
            Operand::Strings {
                values: values.iter().map(|v| (*v).to_owned()).collect(),
                case_sensitive,
            },
        )
    }
}

impl<E: EntityCodec> Property<E, BytesKind> {
    fn bytes(&self, op: QueryOp, value: &[u8]) -> Condition {
        self.leaf(op, Operand::Bytes(value.to_vec()))
    }

    /// Equal to `value`.
    #[must_use]
    pub fn equals(&self, value: &[u8]) -> Condition {
        self.bytes(QueryOp::Equal, value)
    }

    /// Sorts before `value`.
    #[must_use]
    pub fn less_than(&self, value: &[u8]) -> Condition {
        self.bytes(QueryOp::Less, value)
    }

    /// Sorts before or equal to `value`.
    #[must_use]
    pub fn less_or_equal(&self, value: &[u8]) -> Condition {
        self.bytes(QueryOp::LessOrEqual, value)
    }

    /// Sorts after `value`.
    #[must_use]
    pub fn greater_than(&self, value: &[u8]) -> Condition {
        self.bytes(QueryOp::Greater, value)
    }

    /// Sorts after or equal to `value`.
    #[must_use]
    pub fn greater_or_equal(&self, value: &[u8]) -> Condition {
        self.bytes(QueryOp::GreaterOrEqual, value)
    }
}

impl<E: EntityCodec> Property<E, StringVectorKind> {
    /// One of the elements equals `value`.
    #[must_use]
    pub fn contains_element(&self, value: &str, case_sensitive: bool) -> Condition {
        self.leaf(
            QueryOp::Contains,
            Operand::StrElement {
                value: value.to_owned(),
                case_sensitive,
            },
        )
    }
}

impl<E: EntityCodec> Property<E, FloatVectorKind> {
    /// The `max_results` objects whose vectors are closest to `query`.
    ///
    /// Requires a vector index on the property.
    #[must_use]
    pub fn nearest_neighbors(&self, query: &[f32], max_results: u32) -> Condition {
        self.leaf(
            QueryOp::NearestNeighbors,
            Operand::Vector {
                query: query.to_vec(),
                max_results,
            },
        )
    }
}

impl<E: EntityCodec, T> Property<E, RelationKind<T>> {
    /// Points at the object with `id`.
    #[must_use]
    pub fn equals(&self, id: ObjectId) -> Condition {
        self.leaf(QueryOp::Equal, Operand::Int(id as i64, 0))
    }

    /// Does not point at the object with `id`.
    #[must_use]
    pub fn not_equals(&self, id: ObjectId) -> Condition {
        self.leaf(QueryOp::NotEqual, Operand::Int(id as i64, 0))
    }

    /// Points at one of `ids`.
    #[must_use]
    pub fn one_of(&self, ids: &[ObjectId]) -> Condition {
        self.leaf(
            QueryOp::In,
            Operand::Int64s(ids.iter().map(|id| *id as i64).collect()),
        )
    }
}

/// A standalone to-many relation from entity type `S` to `T`.
///
/// Unlike a [`RelationKind`] property, the links are not stored in the
/// source objects. They are managed through
/// [`EntityBox`](crate::EntityBox) and can be followed in queries with
/// [`QueryBuilder::link_standalone`](crate::QueryBuilder::link_standalone).
pub struct RelationStandalone<S, T> {
    id: RelationId,
    _marker: PhantomData<fn() -> (S, T)>,
}

impl<S, T> Clone for RelationStandalone<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for RelationStandalone<S, T> {}

impl<S, T> fmt::Debug for RelationStandalone<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RelationStandalone").field(&self.id).finish()
    }
}

impl<S: EntityCodec, T: EntityCodec> RelationStandalone<S, T> {
    /// Creates a handle for relation `id` from `S` to `T`.
    #[must_use]
    pub const fn new(id: RelationId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The relation id.
    #[must_use]
    pub const fn id(&self) -> RelationId {
        self.id
    }

    /// The source entity type.
    #[must_use]
    pub const fn source_entity_id(&self) -> EntityId {
        S::ENTITY_ID
    }

    /// The target entity type.
    #[must_use]
    pub const fn target_entity_id(&self) -> EntityId {
        T::ENTITY_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct Thing;

    impl EntityCodec for Thing {
        const ENTITY_ID: EntityId = EntityId(7);

        fn object_id(&self) -> ObjectId {
            0
        }

        fn set_object_id(&mut self, _id: ObjectId) {}

        fn encode(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn decode(_bytes: &[u8]) -> Result<Self> {
            Ok(Thing)
        }
    }

    const COUNT: Property<Thing, IntKind> = Property::new(PropertyId(2));
    const WHEN: Property<Thing, DateKind> = Property::new(PropertyId(3));
    const DONE: Property<Thing, BoolKind> = Property::new(PropertyId(4));
    const SCORE: Property<Thing, FloatKind> = Property::new(PropertyId(5));
    const PARENT: Property<Thing, RelationKind<Thing>> = Property::new(PropertyId(6));
    const CHILDREN: RelationStandalone<Thing, Thing> = RelationStandalone::new(RelationId(1));

    fn leaf(c: &Condition) -> &crate::condition::Leaf {
        c.as_leaf().unwrap()
    }

    #[test]
    fn integer_sets_follow_width() {
        let c = COUNT.one_of(&[1, 2]);
        assert_eq!(leaf(&c).operand(), &Operand::Int32s(vec![1, 2]));
        let c = WHEN.not_one_of(&[3]);
        assert_eq!(leaf(&c).operand(), &Operand::Int64s(vec![3]));
        assert_eq!(leaf(&c).op(), QueryOp::NotIn);
    }

    #[test]
    fn leaves_carry_entity_and_property() {
        let c = COUNT.between(1, 9);
        assert_eq!(leaf(&c).entity(), EntityId(7));
        assert_eq!(leaf(&c).property(), PropertyId(2));
        assert_eq!(leaf(&c).operand(), &Operand::Int(1, 9));
    }

    #[test]
    fn bool_float_and_relation() {
        assert_eq!(leaf(&DONE.equals(true)).operand(), &Operand::Int(1, 0));
        assert_eq!(
            leaf(&SCORE.greater_than(0.5)).operand(),
            &Operand::Double(0.5, 0.0)
        );
        let c = PARENT.one_of(&[4, 5]);
        assert_eq!(leaf(&c).operand(), &Operand::Int64s(vec![4, 5]));
        assert_eq!(PARENT.entity_id(), EntityId(7));
        assert_eq!(CHILDREN.id(), RelationId(1));
        assert_eq!(CHILDREN.target_entity_id(), EntityId(7));
    }

    #[test]
    fn typed_leaves_are_valid() {
        for c in [
            COUNT.is_null(),
            COUNT.not_equals(1),
            DONE.not_equals(false),
            SCORE.between(0.0, 1.0),
            PARENT.equals(3),
        ] {
            let l = leaf(&c);
            assert!(l.operand().supports(l.op()), "{c}");
        }
    }
}
