//! Lowering condition trees onto a query builder.

use cellbox_engine::ConditionId;

use super::{Condition, Leaf};
use crate::error::Result;

/// Target of condition lowering: registers leaves and combines registered
/// conditions into groups.
///
/// [`QueryBuilder`](crate::QueryBuilder) implements this on top of the
/// engine; tests can record the calls instead.
pub trait ConditionSink {
    /// Registers a leaf predicate.
    fn leaf(&mut self, leaf: &Leaf) -> Result<ConditionId>;

    /// Combines registered conditions into an AND (`any == false`) or OR
    /// group.
    fn combine(&mut self, ids: &[ConditionId], any: bool) -> Result<ConditionId>;
}

impl Condition {
    /// Lowers the tree into `sink`.
    ///
    /// A group with one child lowers as that child. Otherwise children are
    /// lowered first; a root AND group then returns [`ConditionId::NONE`]
    /// without a combine call, because the builder ANDs its root conditions
    /// implicitly. Every other group is combined.
    pub fn apply_to(&self, sink: &mut dyn ConditionSink, is_root: bool) -> Result<ConditionId> {
        match self {
            Self::Leaf(leaf) => sink.leaf(leaf),
            Self::Group(group) => {
                if let [only] = group.children() {
                    return only.apply_to(sink, is_root);
                }
                let ids = group
                    .children()
                    .iter()
                    .map(|child| child.apply_to(sink, false))
                    .collect::<Result<Vec<_>>>()?;
                if is_root && !group.is_any() {
                    return Ok(ConditionId::NONE);
                }
                sink.combine(&ids, group.is_any())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Operand;
    use cellbox_engine::{EntityId, PropertyId, QueryOp};

    #[derive(Debug, Default)]
    struct Recorder {
        leaves: Vec<PropertyId>,
        combines: Vec<(Vec<ConditionId>, bool)>,
        next: u32,
    }

    impl ConditionSink for Recorder {
        fn leaf(&mut self, leaf: &Leaf) -> Result<ConditionId> {
            self.leaves.push(leaf.property());
            self.next += 1;
            Ok(ConditionId(self.next))
        }

        fn combine(&mut self, ids: &[ConditionId], any: bool) -> Result<ConditionId> {
            self.combines.push((ids.to_vec(), any));
            self.next += 1;
            Ok(ConditionId(self.next))
        }
    }

    fn leaf(prop: u32) -> Condition {
        Condition::leaf(EntityId(1), PropertyId(prop), QueryOp::Null, Operand::None).unwrap()
    }

    #[test]
    fn root_and_skips_combine() {
        let mut rec = Recorder::default();
        let id = (leaf(1) & leaf(2) & leaf(3)).apply_to(&mut rec, true).unwrap();
        assert!(id.is_none());
        assert_eq!(rec.leaves, vec![PropertyId(1), PropertyId(2), PropertyId(3)]);
        assert!(rec.combines.is_empty());
    }

    #[test]
    fn root_or_combines_once() {
        let mut rec = Recorder::default();
        (leaf(1) | leaf(2)).apply_to(&mut rec, true).unwrap();
        assert_eq!(rec.combines, vec![(vec![ConditionId(1), ConditionId(2)], true)]);
    }

    #[test]
    fn nested_and_is_combined_below_root() {
        let mut rec = Recorder::default();
        let id = ((leaf(1) & leaf(2)) | leaf(3)).apply_to(&mut rec, true).unwrap();
        assert_eq!(
            rec.combines,
            vec![
                (vec![ConditionId(1), ConditionId(2)], false),
                (vec![ConditionId(3), ConditionId(4)], true),
            ]
        );
        assert_eq!(id, ConditionId(5));
    }

    #[test]
    fn non_root_and_is_combined() {
        let mut rec = Recorder::default();
        (leaf(1) & leaf(2)).apply_to(&mut rec, false).unwrap();
        assert_eq!(rec.combines.len(), 1);
        assert!(!rec.combines[0].1);
    }
}
