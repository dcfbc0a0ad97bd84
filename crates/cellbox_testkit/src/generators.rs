//! Property-based test generators using proptest.
//!
//! Condition trees are generated over a small subset of [`Foo`]'s
//! properties, so that [`matches_foo`] can evaluate them without the engine
//! and act as the reference for query results.

use cellbox::{Condition, ConditionSink, Leaf, Operand, QueryOp, Result};
use cellbox_engine::{ConditionId, PropertyId};
use proptest::prelude::*;

use crate::fixtures::Foo;

const TEXTS: &[&str] = &["", "a", "ab", "abc", "b", "ba", "B"];

/// Strategy for `Foo` objects whose field values collide often with the
/// generated conditions.
pub fn foo_strategy() -> impl Strategy<Value = Foo> {
    (prop::sample::select(TEXTS), -5i32..=5, any::<bool>()).prop_map(|(text, number, flag)| Foo {
        text: text.to_string(),
        number,
        flag,
        ..Foo::default()
    })
}

/// Strategy for single `Foo` conditions on `text`, `number` and `flag`.
pub fn foo_leaf_strategy() -> impl Strategy<Value = Condition> {
    let number = -5i32..=5;
    prop_oneof![
        number.clone().prop_map(|n| Foo::NUMBER.equals(n)),
        number.clone().prop_map(|n| Foo::NUMBER.not_equals(n)),
        number.clone().prop_map(|n| Foo::NUMBER.less_than(n)),
        number.clone().prop_map(|n| Foo::NUMBER.greater_or_equal(n)),
        (number.clone(), number).prop_map(|(a, b)| Foo::NUMBER.between(a.min(b), a.max(b))),
        prop::sample::select(TEXTS).prop_map(|s| Foo::TEXT.equals(s, true)),
        prop::sample::select(TEXTS).prop_map(|s| Foo::TEXT.starts_with(s, true)),
        any::<bool>().prop_map(|b| Foo::FLAG.equals(b)),
    ]
}

/// Strategy for condition trees up to `depth` levels of AND/OR nesting.
pub fn condition_strategy(depth: u32) -> impl Strategy<Value = Condition> {
    foo_leaf_strategy().prop_recursive(depth, 32, 4, |inner| {
        (inner.clone(), inner, any::<bool>()).prop_map(|(left, right, any)| {
            if any {
                left | right
            } else {
                left & right
            }
        })
    })
}

/// Evaluates a tree generated by [`condition_strategy`] against `foo`.
///
/// # Panics
///
/// Panics on leaves the generators never produce.
pub fn matches_foo(condition: &Condition, foo: &Foo) -> bool {
    match (condition.as_leaf(), condition.as_group()) {
        (Some(leaf), _) => leaf_matches(leaf, foo),
        (None, Some(group)) if group.is_any() => {
            group.children().iter().any(|c| matches_foo(c, foo))
        }
        (None, Some(group)) => group.children().iter().all(|c| matches_foo(c, foo)),
        (None, None) => unreachable!("a condition is a leaf or a group"),
    }
}

fn leaf_matches(leaf: &Leaf, foo: &Foo) -> bool {
    let property = leaf.property();
    match leaf.operand() {
        Operand::Int(a, b) => {
            let value = if property == Foo::NUMBER.id() {
                i64::from(foo.number)
            } else if property == Foo::FLAG.id() {
                i64::from(foo.flag)
            } else {
                panic!("no integer property {property}")
            };
            match leaf.op() {
                QueryOp::Equal => value == *a,
                QueryOp::NotEqual => value != *a,
                QueryOp::Less => value < *a,
                QueryOp::GreaterOrEqual => value >= *a,
                QueryOp::Between => (*a..=*b).contains(&value),
                op => panic!("unexpected integer op {op}"),
            }
        }
        Operand::Str { value, .. } => {
            assert_eq!(property, Foo::TEXT.id(), "no string property {property}");
            match leaf.op() {
                QueryOp::Equal => foo.text == *value,
                QueryOp::StartsWith => foo.text.starts_with(value.as_str()),
                op => panic!("unexpected string op {op}"),
            }
        }
        operand => panic!("unexpected operand {operand:?}"),
    }
}

/// A [`ConditionSink`] that records the calls made while lowering a tree.
///
/// Ids are handed out from 1 in call order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Properties of the registered leaves, in order.
    pub leaves: Vec<PropertyId>,
    /// Combine calls: the combined ids and whether the group was an OR.
    pub combines: Vec<(Vec<ConditionId>, bool)>,
    next: u32,
}

impl RecordingSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> ConditionId {
        self.next += 1;
        ConditionId(self.next)
    }
}

impl ConditionSink for RecordingSink {
    fn leaf(&mut self, leaf: &Leaf) -> Result<ConditionId> {
        self.leaves.push(leaf.property());
        Ok(self.next_id())
    }

    fn combine(&mut self, ids: &[ConditionId], any: bool) -> Result<ConditionId> {
        self.combines.push((ids.to_vec(), any));
        Ok(self.next_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn lowering_visits_every_leaf(condition in condition_strategy(4)) {
            let mut sink = RecordingSink::new();
            let top = condition.apply_to(&mut sink, true).unwrap();
            prop_assert_eq!(sink.leaves.len(), condition.leaf_count());

            match condition.as_group() {
                Some(group) if !group.is_any() && group.children().len() > 1 => {
                    prop_assert_eq!(top, ConditionId::NONE);
                    let nested = group.children().iter().filter(|c| c.as_group().is_some()).count();
                    prop_assert!(sink.combines.len() >= nested);
                }
                _ => prop_assert_ne!(top, ConditionId::NONE),
            }
        }

        #[test]
        fn generated_groups_are_flat(condition in condition_strategy(4)) {
            fn check(c: &Condition) -> bool {
                c.as_group().map_or(true, |g| {
                    g.children().len() >= 2
                        && g.children().iter().all(|child| {
                            child.as_group().map_or(true, |cg| cg.is_any() != g.is_any()) && check(child)
                        })
                })
            }
            prop_assert!(check(&condition));
        }
    }

    #[test]
    fn evaluator_follows_operators() {
        let foo = Foo {
            text: "abc".into(),
            number: 3,
            ..Foo::default()
        };
        assert!(matches_foo(&(Foo::NUMBER.equals(3) & Foo::TEXT.starts_with("ab", true)), &foo));
        assert!(!matches_foo(&(Foo::NUMBER.less_than(3) & Foo::FLAG.equals(false)), &foo));
        assert!(matches_foo(&(Foo::NUMBER.less_than(3) | Foo::FLAG.equals(false)), &foo));
    }
}
