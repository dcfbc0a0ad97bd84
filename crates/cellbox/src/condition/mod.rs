//! Query condition trees.
//!
//! A [`Condition`] is either a [`Leaf`] predicate or an AND/OR [`Group`] of
//! conditions. Trees are immutable and reference counted: combining two
//! conditions allocates a new top-level node and shares the children.
//!
//! Groups flatten when combined with the same operator, so `a & b & c`,
//! `(a & b) & c` and `a & (b & c)` all produce one AND group `[a, b, c]`.
//! Mixing operators nests: `(a & b) | c` is an OR group holding the AND
//! group and `c`.
//!
//! ```rust
//! use cellbox::{Condition, Operand};
//! use cellbox_engine::{EntityId, PropertyId, QueryOp};
//!
//! let leaf = |prop, value| {
//!     Condition::leaf(EntityId(1), PropertyId(prop), QueryOp::Equal, Operand::Int(value, 0)).unwrap()
//! };
//! let (a, b, c) = (leaf(2, 1), leaf(3, 2), leaf(4, 3));
//!
//! let left = (a.clone() & b.clone()) & c.clone();
//! let right = a.clone() & (b.clone() & c.clone());
//! assert_eq!(left, right);
//! assert_eq!(left.as_group().unwrap().children().len(), 3);
//!
//! let mixed = (a & b) | c;
//! assert!(mixed.as_group().unwrap().is_any());
//! ```

mod leaf;
mod lower;

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

use cellbox_engine::{EntityId, PropertyId, QueryOp};

use crate::error::{Error, Result};

pub use leaf::{Leaf, Operand};
pub use lower::ConditionSink;

/// A query predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A single predicate.
    Leaf(Arc<Leaf>),
    /// An AND or OR combination.
    Group(Arc<Group>),
}

/// An AND (`any == false`) or OR (`any == true`) combination of conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    any: bool,
    children: Vec<Condition>,
}

impl Group {
    /// Whether this is an OR group.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.any
    }

    /// The combined conditions, in combination order.
    #[must_use]
    pub fn children(&self) -> &[Condition] {
        &self.children
    }

    fn push(&mut self, condition: Condition) {
        match condition {
            Condition::Group(group) if group.any == self.any => {
                self.children.extend(group.children.iter().cloned());
            }
            other => self.children.push(other),
        }
    }
}

impl Condition {
    /// Creates a leaf condition.
    ///
    /// Fails with `IllegalArgument` if `op` cannot be applied to the operand
    /// shape.
    pub fn leaf(entity: EntityId, property: PropertyId, op: QueryOp, operand: Operand) -> Result<Self> {
        Ok(Self::Leaf(Arc::new(Leaf::new(entity, property, op, operand)?)))
    }

    pub(crate) fn typed(entity: EntityId, property: PropertyId, op: QueryOp, operand: Operand) -> Self {
        debug_assert!(operand.supports(op));
        Self::Leaf(Arc::new(Leaf::new_unchecked(entity, property, op, operand)))
    }

    /// ANDs all `conditions`. Fails on an empty input.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Result<Self> {
        Self::fold(conditions, false)
    }

    /// ORs all `conditions`. Fails on an empty input.
    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Result<Self> {
        Self::fold(conditions, true)
    }

    fn fold(conditions: impl IntoIterator<Item = Condition>, any: bool) -> Result<Self> {
        conditions
            .into_iter()
            .reduce(|acc, next| acc.combine(next, any))
            .ok_or_else(|| Error::illegal_argument("no conditions to combine"))
    }

    /// Returns `self AND other` without consuming either.
    #[must_use]
    pub fn and(&self, other: &Condition) -> Condition {
        self.clone().combine(other.clone(), false)
    }

    /// Returns `self OR other` without consuming either.
    #[must_use]
    pub fn or(&self, other: &Condition) -> Condition {
        self.clone().combine(other.clone(), true)
    }

    /// Combines two conditions. A same-kind group on the left is extended,
    /// in place when nobody else holds it.
    fn combine(self, other: Condition, any: bool) -> Condition {
        match self {
            Self::Group(mut group) if group.any == any => {
                Arc::make_mut(&mut group).push(other);
                Self::Group(group)
            }
            left => {
                let mut group = Group {
                    any,
                    children: Vec::with_capacity(2),
                };
                group.push(left);
                group.push(other);
                Self::Group(Arc::new(group))
            }
        }
    }

    /// The leaf, if this is one.
    #[must_use]
    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Group(_) => None,
        }
    }

    /// The group, if this is one.
    #[must_use]
    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Self::Leaf(_) => None,
            Self::Group(group) => Some(group),
        }
    }

    /// Number of leaves in the tree.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Group(group) => group.children.iter().map(Self::leaf_count).sum(),
        }
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        self.combine(rhs, false)
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        self.combine(rhs, true)
    }
}

impl BitAnd<&Condition> for &Condition {
    type Output = Condition;

    fn bitand(self, rhs: &Condition) -> Condition {
        self.and(rhs)
    }
}

impl BitOr<&Condition> for &Condition {
    type Output = Condition;

    fn bitor(self, rhs: &Condition) -> Condition {
        self.or(rhs)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(leaf) => write!(f, "{leaf}"),
            Self::Group(group) => {
                let op = if group.any { " OR " } else { " AND " };
                f.write_str("(")?;
                for (i, child) in group.children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(op)?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(prop: u32) -> Condition {
        Condition::leaf(EntityId(1), PropertyId(prop), QueryOp::NotNull, Operand::None).unwrap()
    }

    fn children(c: &Condition) -> Vec<Condition> {
        c.as_group().unwrap().children().to_vec()
    }

    #[test]
    fn and_flattens_both_sides() {
        let (a, b, c, d) = (leaf(1), leaf(2), leaf(3), leaf(4));
        let tree = (a.clone() & b.clone()) & (c.clone() & d.clone());
        assert_eq!(children(&tree), vec![a, b, c, d]);
    }

    #[test]
    fn mixed_operators_nest() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let tree = (a.clone() & b.clone()) | c.clone();
        let group = tree.as_group().unwrap();
        assert!(group.is_any());
        assert_eq!(group.children().len(), 2);
        assert_eq!(group.children()[0], a & b);
        assert_eq!(group.children()[1], c);
    }

    #[test]
    fn shared_group_is_not_mutated() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let ab = a & b;
        let abc = ab.clone() & c;
        assert_eq!(ab.leaf_count(), 2);
        assert_eq!(abc.leaf_count(), 3);

        let borrowed = ab.and(&leaf(4));
        assert_eq!(ab.leaf_count(), 2);
        assert_eq!(borrowed.leaf_count(), 3);
    }

    #[test]
    fn unique_group_is_extended_in_place() {
        let ab = leaf(1) & leaf(2);
        let before = match &ab {
            Condition::Group(group) => Arc::as_ptr(group),
            Condition::Leaf(_) => unreachable!(),
        };
        let abc = ab & leaf(3);
        let after = match &abc {
            Condition::Group(group) => Arc::as_ptr(group),
            Condition::Leaf(_) => unreachable!(),
        };
        assert_eq!(before, after);
    }

    #[test]
    fn all_and_any() {
        assert!(Condition::all(Vec::new()).is_err());
        assert_eq!(Condition::any([leaf(1)]).unwrap(), leaf(1));
        let any = Condition::any([leaf(1), leaf(2) | leaf(3)]).unwrap();
        assert_eq!(any.as_group().unwrap().children().len(), 3);
    }

    #[test]
    fn display() {
        let tree = (leaf(1) & leaf(2)) | leaf(3);
        assert_eq!(
            tree.to_string(),
            "((entity:1.property:1 is not null AND entity:1.property:2 is not null) OR entity:1.property:3 is not null)"
        );
    }
}
