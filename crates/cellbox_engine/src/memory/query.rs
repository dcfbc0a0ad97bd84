//! Query builders, compiled plans and full-scan evaluation.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{NativeError, NativeResult};
use crate::memory::store::{Data, StoredObject};
use crate::model::{property_flags, DistanceType, EntityModel, Model, PropertyType};
use crate::record::{Record, Value};
use crate::types::{order_flags, ConditionId, EntityId, ObjectId, PropertyId, QueryOp, RelationId};

/// A registered condition.
#[derive(Debug, Clone)]
pub(crate) enum NativeCondition {
    Null {
        prop: PropertyId,
    },
    NotNull {
        prop: PropertyId,
    },
    Int {
        prop: PropertyId,
        op: QueryOp,
        a: i64,
        b: i64,
    },
    Double {
        prop: PropertyId,
        op: QueryOp,
        a: f64,
        b: f64,
    },
    Str {
        prop: PropertyId,
        op: QueryOp,
        value: String,
        case_sensitive: bool,
    },
    AnyEquals {
        prop: PropertyId,
        value: String,
        case_sensitive: bool,
    },
    InStrings {
        prop: PropertyId,
        values: Vec<String>,
        case_sensitive: bool,
    },
    Ints {
        prop: PropertyId,
        op: QueryOp,
        values: Vec<i64>,
        wide: bool,
    },
    Bytes {
        prop: PropertyId,
        op: QueryOp,
        value: Vec<u8>,
    },
    Nearest {
        prop: PropertyId,
        query: Vec<f32>,
        max_results: u32,
        distance: DistanceType,
    },
    RelationCount {
        entity: EntityId,
        prop: PropertyId,
        count: u32,
    },
    All(Vec<usize>),
    Any(Vec<usize>),
}

impl NativeCondition {
    fn property(&self) -> Option<PropertyId> {
        match self {
            Self::Null { prop }
            | Self::NotNull { prop }
            | Self::Int { prop, .. }
            | Self::Double { prop, .. }
            | Self::Str { prop, .. }
            | Self::AnyEquals { prop, .. }
            | Self::InStrings { prop, .. }
            | Self::Ints { prop, .. }
            | Self::Bytes { prop, .. }
            | Self::Nearest { prop, .. } => Some(*prop),
            Self::RelationCount { .. } | Self::All(_) | Self::Any(_) => None,
        }
    }

    fn op(&self) -> QueryOp {
        match self {
            Self::Null { .. } => QueryOp::Null,
            Self::NotNull { .. } => QueryOp::NotNull,
            Self::Int { op, .. }
            | Self::Double { op, .. }
            | Self::Str { op, .. }
            | Self::Ints { op, .. }
            | Self::Bytes { op, .. } => *op,
            Self::AnyEquals { .. } => QueryOp::Contains,
            Self::InStrings { .. } => QueryOp::In,
            Self::Nearest { .. } => QueryOp::NearestNeighbors,
            Self::RelationCount { .. } | Self::All(_) | Self::Any(_) => QueryOp::Equal,
        }
    }
}

/// Direction of a linked builder.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LinkKind {
    /// Follow `prop` of this entity to `target`.
    Forward { prop: PropertyId, target: EntityId },
    /// Objects of `source` whose `prop` points here.
    Backward { source: EntityId, prop: PropertyId },
    /// Follow standalone `relation` of this entity to `target`.
    StandaloneForward { relation: RelationId, target: EntityId },
    /// Objects of `source` linking here through standalone `relation`.
    StandaloneBackward { relation: RelationId, source: EntityId },
}

impl LinkKind {
    /// Entity of the linked builder.
    pub fn entity(self) -> EntityId {
        match self {
            Self::Forward { target, .. } | Self::StandaloneForward { target, .. } => target,
            Self::Backward { source, .. } | Self::StandaloneBackward { source, .. } => source,
        }
    }
}

/// Mutable builder state. Linked builders are shared with their parent so
/// closing the child handle does not detach it.
#[derive(Debug)]
pub(crate) struct BuilderNode {
    pub entity: EntityId,
    pub is_root: bool,
    conditions: Vec<NativeCondition>,
    roots: Vec<usize>,
    orders: Vec<(PropertyId, u32)>,
    links: Vec<(LinkKind, Arc<Mutex<BuilderNode>>)>,
    error: Option<NativeError>,
}

impl BuilderNode {
    pub fn new(entity: EntityId, is_root: bool) -> Self {
        Self {
            entity,
            is_root,
            conditions: Vec::new(),
            roots: Vec::new(),
            orders: Vec::new(),
            links: Vec::new(),
            error: None,
        }
    }

    pub fn error(&self) -> Option<NativeError> {
        self.error.clone()
    }

    fn check_sticky(&self) -> NativeResult<()> {
        match &self.error {
            Some(e) => Err(NativeError::new(e.code, e.message.clone())),
            None => Ok(()),
        }
    }

    fn fail<T>(&mut self, err: NativeError) -> NativeResult<T> {
        if self.error.is_none() {
            self.error = Some(err.clone());
        }
        Err(err)
    }

    /// Validates and registers a leaf condition.
    pub fn add(&mut self, model: &Model, cond: NativeCondition) -> NativeResult<ConditionId> {
        self.check_sticky()?;
        if let Err(e) = validate(model, self.entity, &cond) {
            return self.fail(e);
        }
        Ok(self.push(cond))
    }

    fn push(&mut self, cond: NativeCondition) -> ConditionId {
        self.conditions.push(cond);
        let index = self.conditions.len() - 1;
        self.roots.push(index);
        ConditionId(index as u32 + 1)
    }

    /// Combines root conditions into an AND/OR group.
    pub fn combine(&mut self, ids: &[ConditionId], any: bool) -> NativeResult<ConditionId> {
        self.check_sticky()?;
        if ids.is_empty() {
            return self.fail(NativeError::illegal_argument("no conditions to combine"));
        }
        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            let index = (id.0 as usize).wrapping_sub(1);
            match self.roots.iter().position(|r| *r == index) {
                Some(pos) => {
                    self.roots.remove(pos);
                    children.push(index);
                }
                None => {
                    return self.fail(NativeError::illegal_argument(format!(
                        "condition {} is unknown or already combined",
                        id.0
                    )));
                }
            }
        }
        let group = if any {
            NativeCondition::Any(children)
        } else {
            NativeCondition::All(children)
        };
        Ok(self.push(group))
    }

    pub fn order(&mut self, model: &Model, prop: PropertyId, flags: u32) -> NativeResult<()> {
        self.check_sticky()?;
        let known = model
            .entity(self.entity)
            .and_then(|e| e.property(prop))
            .is_some();
        if !known {
            return self.fail(NativeError::illegal_argument(format!(
                "unknown {prop} for ordering"
            )));
        }
        self.orders.push((prop, flags));
        Ok(())
    }

    /// Validates a link and returns its kind.
    pub fn link_kind(
        &mut self,
        model: &Model,
        source: Option<EntityId>,
        prop: PropertyId,
    ) -> NativeResult<LinkKind> {
        self.check_sticky()?;
        let entity = source.unwrap_or(self.entity);
        let relation = model
            .entity(entity)
            .and_then(|e| e.property(prop))
            .filter(|p| p.kind == PropertyType::Relation)
            .and_then(|p| p.target);
        let kind = match (source, relation) {
            (None, Some(target)) => LinkKind::Forward { prop, target },
            (Some(source), Some(target)) if target == self.entity => {
                LinkKind::Backward { source, prop }
            }
            _ => {
                return self.fail(NativeError::type_mismatch(format!(
                    "{prop} of {entity} is not a relation to this entity"
                )));
            }
        };
        Ok(kind)
    }

    /// Validates a standalone relation link and returns its kind.
    pub fn standalone_link_kind(
        &mut self,
        model: &Model,
        relation: RelationId,
        backward: bool,
    ) -> NativeResult<LinkKind> {
        self.check_sticky()?;
        let ends = model
            .standalone_relation(relation)
            .map(|(source, r)| (source.id, r.target));
        match ends {
            Some((source, target)) if !backward && source == self.entity => {
                Ok(LinkKind::StandaloneForward { relation, target })
            }
            Some((source, target)) if backward && target == self.entity => {
                Ok(LinkKind::StandaloneBackward { relation, source })
            }
            _ => {
                let entity = self.entity;
                self.fail(NativeError::type_mismatch(format!(
                    "{relation} does not {} {entity}",
                    if backward { "target" } else { "start at" }
                )))
            }
        }
    }

    pub fn add_link(&mut self, kind: LinkKind, child: Arc<Mutex<BuilderNode>>) {
        self.links.push((kind, child));
    }

    /// Compiles the builder (and its linked builders) into a plan.
    pub fn compile(&self) -> NativeResult<QueryPlan> {
        self.check_sticky()?;
        let mut links = Vec::with_capacity(self.links.len());
        for (kind, child) in &self.links {
            links.push((*kind, child.lock().compile()?));
        }
        Ok(QueryPlan {
            entity: self.entity,
            conditions: self.conditions.clone(),
            roots: self.roots.clone(),
            orders: self.orders.clone(),
            links,
        })
    }
}

fn validate(model: &Model, entity_id: EntityId, cond: &NativeCondition) -> NativeResult<()> {
    use QueryOp::*;

    let entity = model
        .entity(entity_id)
        .ok_or_else(|| NativeError::illegal_argument(format!("unknown {entity_id}")))?;

    if let NativeCondition::RelationCount {
        entity: source,
        prop,
        ..
    } = cond
    {
        let target = model
            .entity(*source)
            .and_then(|e| e.property(*prop))
            .filter(|p| p.kind == PropertyType::Relation)
            .and_then(|p| p.target);
        return match target {
            Some(t) if t == entity_id => Ok(()),
            _ => Err(NativeError::illegal_argument(format!(
                "{prop} of {source} is not a relation to {}",
                entity.name
            ))),
        };
    }

    let Some(prop_id) = cond.property() else {
        return Ok(());
    };
    let prop = entity.property(prop_id).ok_or_else(|| {
        NativeError::illegal_argument(format!("unknown {prop_id} of {}", entity.name))
    })?;
    let kind = prop.kind;

    let (type_ok, op_ok) = match cond {
        NativeCondition::Null { .. } | NativeCondition::NotNull { .. } => (true, true),
        NativeCondition::Int { op, .. } => (
            kind.is_integer(),
            matches!(
                op,
                Equal | NotEqual | Less | LessOrEqual | Greater | GreaterOrEqual | Between
            ),
        ),
        NativeCondition::Double { op, .. } => (
            kind.is_floating(),
            matches!(op, Less | LessOrEqual | Greater | GreaterOrEqual | Between),
        ),
        NativeCondition::Str { op, .. } => (
            kind == PropertyType::String,
            matches!(
                op,
                Equal
                    | NotEqual
                    | Less
                    | LessOrEqual
                    | Greater
                    | GreaterOrEqual
                    | StartsWith
                    | EndsWith
                    | Contains
            ),
        ),
        NativeCondition::AnyEquals { .. } => (kind == PropertyType::StringVector, true),
        NativeCondition::InStrings { .. } => (kind == PropertyType::String, true),
        NativeCondition::Ints { op, wide, .. } => (
            if *wide {
                matches!(
                    kind,
                    PropertyType::Long | PropertyType::Date | PropertyType::Relation
                )
            } else {
                kind == PropertyType::Int
            },
            matches!(op, In | NotIn),
        ),
        NativeCondition::Bytes { op, .. } => (
            kind == PropertyType::ByteVector,
            matches!(op, Equal | Less | LessOrEqual | Greater | GreaterOrEqual),
        ),
        NativeCondition::Nearest { query, .. } => {
            if kind == PropertyType::FloatVector {
                let Some(index) = prop
                    .vector_index
                    .filter(|_| prop.has_flag(property_flags::VECTOR_INDEX))
                else {
                    return Err(NativeError::illegal_argument(format!(
                        "{}.{} has no vector index",
                        entity.name, prop.name
                    )));
                };
                if query.len() != index.dimensions as usize {
                    return Err(NativeError::illegal_argument(format!(
                        "query vector has {} dimensions, index expects {}",
                        query.len(),
                        index.dimensions
                    )));
                }
            }
            (kind == PropertyType::FloatVector, true)
        }
        NativeCondition::RelationCount { .. } | NativeCondition::All(_) | NativeCondition::Any(_) => {
            (true, true)
        }
    };

    if !type_ok {
        return Err(NativeError::type_mismatch(format!(
            "{} is not supported on {}.{} of type {kind:?}",
            cond.op(),
            entity.name,
            prop.name
        )));
    }
    if !op_ok {
        return Err(NativeError::illegal_argument(format!(
            "operation {} is not supported for {}.{}",
            cond.op(),
            entity.name,
            prop.name
        )));
    }
    Ok(())
}

/// A value for `query_param_*`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Param<'a> {
    Int(i64),
    Ints2(i64, i64),
    Double(f64),
    Doubles2(f64, f64),
    Str(&'a str),
    Strings(&'a [String]),
    I64s(&'a [i64]),
    I32s(&'a [i32]),
    Bytes(&'a [u8]),
    Vector(&'a [f32]),
}

/// A query match in a data snapshot.
#[derive(Debug, Clone)]
pub(crate) struct Match<'a> {
    pub id: ObjectId,
    pub object: &'a StoredObject,
    pub score: f64,
}

/// An immutable compiled query.
#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    pub entity: EntityId,
    conditions: Vec<NativeCondition>,
    roots: Vec<usize>,
    orders: Vec<(PropertyId, u32)>,
    links: Vec<(LinkKind, QueryPlan)>,
}

impl QueryPlan {
    pub fn has_order(&self) -> bool {
        !self.orders.is_empty()
    }

    /// Returns all matches in id order with their scores.
    pub fn execute<'a>(&self, data: &'a Data) -> Vec<Match<'a>> {
        let Some(objects) = data.objects(self.entity) else {
            return Vec::new();
        };
        let nearest = self.nearest_scores(data);
        objects
            .iter()
            .filter(|(id, obj)| self.matches(data, **id, &obj.record, nearest.as_ref()))
            .map(|(id, obj)| Match {
                id: *id,
                object: obj,
                score: nearest
                    .as_ref()
                    .and_then(|n| n.get(id))
                    .copied()
                    .unwrap_or(0.0),
            })
            .collect()
    }

    /// Sorts by the registered order keys, ties by id.
    pub fn sort(&self, matches: &mut [Match<'_>]) {
        matches.sort_by(|a, b| {
            self.compare(&a.object.record, &b.object.record)
                .then(a.id.cmp(&b.id))
        });
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for (prop, flags) in &self.orders {
            let ord = compare_values(a.get(*prop), b.get(*prop), *flags);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn nearest_scores(&self, data: &Data) -> Option<HashMap<ObjectId, f64>> {
        let (prop, query, max_results, distance) =
            self.conditions.iter().find_map(|c| match c {
                NativeCondition::Nearest {
                    prop,
                    query,
                    max_results,
                    distance,
                } => Some((*prop, query, *max_results, *distance)),
                _ => None,
            })?;
        let objects = data.objects(self.entity)?;

        let mut scored: Vec<(f64, ObjectId)> = objects
            .iter()
            .filter(|(id, obj)| self.matches(data, **id, &obj.record, None))
            .filter_map(|(id, obj)| {
                let vector = obj.record.get_floats(prop)?;
                (vector.len() == query.len()).then(|| (distance_of(distance, query, vector), *id))
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(max_results as usize);
        Some(scored.into_iter().map(|(d, id)| (id, d)).collect())
    }

    /// `nearest` is `None` while computing nearest neighbor candidates; the
    /// nearest condition itself then counts as satisfied.
    fn matches(
        &self,
        data: &Data,
        id: ObjectId,
        record: &Record,
        nearest: Option<&HashMap<ObjectId, f64>>,
    ) -> bool {
        self.roots
            .iter()
            .all(|i| self.eval(*i, data, id, record, nearest))
            && self
                .links
                .iter()
                .all(|(kind, plan)| plan.link_matches(*kind, data, id, record))
    }

    fn link_matches(&self, kind: LinkKind, data: &Data, id: ObjectId, record: &Record) -> bool {
        match kind {
            LinkKind::Forward { prop, target } => {
                let Some(target_id) = record.get_i64(prop).filter(|t| *t > 0) else {
                    return false;
                };
                data.object(target, target_id as ObjectId)
                    .is_some_and(|obj| self.matches(data, target_id as ObjectId, &obj.record, None))
            }
            LinkKind::Backward { source, prop } => data.objects(source).is_some_and(|objects| {
                objects.iter().any(|(source_id, obj)| {
                    obj.record.get_i64(prop) == Some(id as i64)
                        && self.matches(data, *source_id, &obj.record, None)
                })
            }),
            LinkKind::StandaloneForward { relation, target } => {
                data.linked_targets(relation, id).any(|target_id| {
                    data.object(target, target_id)
                        .is_some_and(|obj| self.matches(data, target_id, &obj.record, None))
                })
            }
            LinkKind::StandaloneBackward { relation, source } => {
                data.linked_sources(relation, id).any(|source_id| {
                    data.object(source, source_id)
                        .is_some_and(|obj| self.matches(data, source_id, &obj.record, None))
                })
            }
        }
    }

    fn eval(
        &self,
        index: usize,
        data: &Data,
        id: ObjectId,
        record: &Record,
        nearest: Option<&HashMap<ObjectId, f64>>,
    ) -> bool {
        match &self.conditions[index] {
            NativeCondition::Null { prop } => record.get(*prop).is_none(),
            NativeCondition::NotNull { prop } => record.get(*prop).is_some(),
            NativeCondition::Int { prop, op, a, b } => record
                .get_i64(*prop)
                .is_some_and(|v| compare_op(*op, &v, a, b)),
            NativeCondition::Double { prop, op, a, b } => record
                .get_f64(*prop)
                .is_some_and(|v| compare_op(*op, &v, a, b)),
            NativeCondition::Str {
                prop,
                op,
                value,
                case_sensitive,
            } => record
                .get_str(*prop)
                .is_some_and(|v| string_matches(*op, v, value, *case_sensitive)),
            NativeCondition::AnyEquals {
                prop,
                value,
                case_sensitive,
            } => record.get_strings(*prop).is_some_and(|items| {
                items
                    .iter()
                    .any(|s| string_matches(QueryOp::Equal, s, value, *case_sensitive))
            }),
            NativeCondition::InStrings {
                prop,
                values,
                case_sensitive,
            } => record.get_str(*prop).is_some_and(|v| {
                values
                    .iter()
                    .any(|s| string_matches(QueryOp::Equal, v, s, *case_sensitive))
            }),
            NativeCondition::Ints {
                prop, op, values, ..
            } => record.get_i64(*prop).is_some_and(|v| {
                let found = values.contains(&v);
                if *op == QueryOp::NotIn {
                    !found
                } else {
                    found
                }
            }),
            NativeCondition::Bytes { prop, op, value } => record
                .get_bytes(*prop)
                .is_some_and(|v| compare_op(*op, &v, &value.as_slice(), &value.as_slice())),
            NativeCondition::Nearest { .. } => nearest.map_or(true, |n| n.contains_key(&id)),
            NativeCondition::RelationCount {
                entity,
                prop,
                count,
            } => {
                let related = data.objects(*entity).map_or(0, |objects| {
                    objects
                        .values()
                        .filter(|o| o.record.get_i64(*prop) == Some(id as i64))
                        .count()
                });
                related == *count as usize
            }
            NativeCondition::All(children) => children
                .iter()
                .all(|c| self.eval(*c, data, id, record, nearest)),
            NativeCondition::Any(children) => children
                .iter()
                .any(|c| self.eval(*c, data, id, record, nearest)),
        }
    }

    /// Replaces the value of the single leaf condition on `entity.prop`.
    pub fn set_param(&mut self, entity: EntityId, prop: PropertyId, param: Param<'_>) -> NativeResult<()> {
        let mut found = Vec::new();
        self.collect_leaves(entity, prop, &mut found);
        match found.as_mut_slice() {
            [cond] => apply_param(cond, param),
            [] => Err(NativeError::illegal_argument(format!(
                "no condition found for {prop} of {entity}"
            ))),
            _ => Err(NativeError::illegal_argument(format!(
                "several conditions found for {prop} of {entity}"
            ))),
        }
    }

    fn collect_leaves<'a>(
        &'a mut self,
        entity: EntityId,
        prop: PropertyId,
        out: &mut Vec<&'a mut NativeCondition>,
    ) {
        let Self {
            entity: own,
            conditions,
            links,
            ..
        } = self;
        if *own == entity {
            out.extend(
                conditions
                    .iter_mut()
                    .filter(|c| c.property() == Some(prop)),
            );
        }
        for (_, plan) in links.iter_mut() {
            plan.collect_leaves(entity, prop, out);
        }
    }

    /// One-line summary.
    pub fn describe(&self, model: &Model) -> String {
        let leaves = self
            .conditions
            .iter()
            .filter(|c| !matches!(c, NativeCondition::All(_) | NativeCondition::Any(_)))
            .count();
        let name = model
            .entity(self.entity)
            .map_or_else(|| self.entity.to_string(), |e| e.name.clone());
        let mut out = format!("Query for entity {name} with {leaves} conditions");
        if !self.links.is_empty() {
            let _ = write!(out, " and {} links", self.links.len());
        }
        out
    }

    /// The full condition expression including values.
    pub fn describe_parameters(&self, model: &Model) -> String {
        let entity = model.entity(self.entity);
        let mut parts: Vec<String> = self
            .roots
            .iter()
            .map(|i| self.describe_condition(*i, model, entity))
            .collect();
        for (kind, plan) in &self.links {
            let inner = plan.describe_parameters(model);
            let part = match kind {
                LinkKind::Forward { prop, .. } => {
                    format!("link {} {{{inner}}}", property_name(entity, *prop))
                }
                LinkKind::Backward { source, prop } => {
                    let source_model = model.entity(*source);
                    let source_name =
                        source_model.map_or_else(|| source.to_string(), |e| e.name.clone());
                    format!(
                        "backlink {source_name}.{} {{{inner}}}",
                        property_name(source_model, *prop)
                    )
                }
                LinkKind::StandaloneForward { relation, .. } => {
                    format!("link {} {{{inner}}}", relation_name(model, *relation))
                }
                LinkKind::StandaloneBackward { relation, source } => {
                    let source_name = model
                        .entity(*source)
                        .map_or_else(|| source.to_string(), |e| e.name.clone());
                    format!(
                        "backlink {source_name}.{} {{{inner}}}",
                        relation_name(model, *relation)
                    )
                }
            };
            parts.push(part);
        }
        if parts.is_empty() {
            "TRUE".to_string()
        } else {
            parts.join(" AND ")
        }
    }

    fn describe_condition(&self, index: usize, model: &Model, entity: Option<&EntityModel>) -> String {
        let cond = &self.conditions[index];
        let name = |prop: &PropertyId| property_name(entity, *prop);
        match cond {
            NativeCondition::Null { prop } => format!("{} is null", name(prop)),
            NativeCondition::NotNull { prop } => format!("{} is not null", name(prop)),
            NativeCondition::Int { prop, op, a, b } => describe_compare(&name(prop), *op, a, b),
            NativeCondition::Double { prop, op, a, b } => describe_compare(&name(prop), *op, a, b),
            NativeCondition::Str {
                prop,
                op,
                value,
                case_sensitive,
            } => format!(
                "{} {op} \"{value}\"{}",
                name(prop),
                case_suffix(*case_sensitive)
            ),
            NativeCondition::AnyEquals {
                prop,
                value,
                case_sensitive,
            } => format!(
                "{} contains element \"{value}\"{}",
                name(prop),
                case_suffix(*case_sensitive)
            ),
            NativeCondition::InStrings {
                prop,
                values,
                case_sensitive,
            } => format!(
                "{} in {values:?}{}",
                name(prop),
                case_suffix(*case_sensitive)
            ),
            NativeCondition::Ints {
                prop, op, values, ..
            } => format!("{} {op} {values:?}", name(prop)),
            NativeCondition::Bytes { prop, op, value } => {
                format!("{} {op} byte[{}]", name(prop), value.len())
            }
            NativeCondition::Nearest {
                prop,
                query,
                max_results,
                ..
            } => format!(
                "{} nearest neighbors (max {max_results}) {query:?}",
                name(prop)
            ),
            NativeCondition::RelationCount {
                entity: source,
                prop,
                count,
            } => {
                let source_model = model.entity(*source);
                format!(
                    "relation count {}.{} == {count}",
                    source_model.map_or_else(|| source.to_string(), |e| e.name.clone()),
                    property_name(source_model, *prop)
                )
            }
            NativeCondition::All(children) | NativeCondition::Any(children) => {
                let joiner = if matches!(cond, NativeCondition::Any(_)) {
                    " OR "
                } else {
                    " AND "
                };
                let inner: Vec<String> = children
                    .iter()
                    .map(|c| self.describe_condition(*c, model, entity))
                    .collect();
                format!("({})", inner.join(joiner))
            }
        }
    }
}

fn apply_param(cond: &mut NativeCondition, param: Param<'_>) -> NativeResult<()> {
    match (cond, param) {
        (NativeCondition::Int { a, .. }, Param::Int(v)) => *a = v,
        (NativeCondition::Int { a, b, .. }, Param::Ints2(x, y)) => {
            *a = x;
            *b = y;
        }
        (NativeCondition::Double { a, .. }, Param::Double(v)) => *a = v,
        (NativeCondition::Double { a, b, .. }, Param::Doubles2(x, y)) => {
            *a = x;
            *b = y;
        }
        (
            NativeCondition::Str { value, .. } | NativeCondition::AnyEquals { value, .. },
            Param::Str(v),
        ) => *value = v.to_string(),
        (NativeCondition::InStrings { values, .. }, Param::Strings(v)) => *values = v.to_vec(),
        (NativeCondition::Ints { values, wide: true, .. }, Param::I64s(v)) => *values = v.to_vec(),
        (NativeCondition::Ints { values, .. }, Param::I32s(v)) => {
            *values = v.iter().map(|x| i64::from(*x)).collect();
        }
        (NativeCondition::Bytes { value, .. }, Param::Bytes(v)) => *value = v.to_vec(),
        (NativeCondition::Nearest { query, .. }, Param::Vector(v)) => {
            if v.len() != query.len() {
                return Err(NativeError::illegal_argument(format!(
                    "query vector has {} dimensions, expected {}",
                    v.len(),
                    query.len()
                )));
            }
            *query = v.to_vec();
        }
        (NativeCondition::Nearest { max_results, .. }, Param::Int(v)) => {
            *max_results = u32::try_from(v)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| NativeError::illegal_argument(format!("invalid max result count {v}")))?;
        }
        (cond, param) => {
            return Err(NativeError::illegal_argument(format!(
                "parameter {param:?} does not fit a {} condition",
                cond.op()
            )));
        }
    }
    Ok(())
}

fn compare_op<T: PartialOrd + ?Sized>(op: QueryOp, v: &T, a: &T, b: &T) -> bool {
    match op {
        QueryOp::Equal => v == a,
        QueryOp::NotEqual => v != a,
        QueryOp::Less => v < a,
        QueryOp::LessOrEqual => v <= a,
        QueryOp::Greater => v > a,
        QueryOp::GreaterOrEqual => v >= a,
        QueryOp::Between => a <= v && v <= b,
        _ => false,
    }
}

fn fold(s: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(s.to_lowercase())
    }
}

fn string_matches(op: QueryOp, value: &str, operand: &str, case_sensitive: bool) -> bool {
    let value = fold(value, case_sensitive);
    let operand = fold(operand, case_sensitive);
    match op {
        QueryOp::StartsWith => value.starts_with(&*operand),
        QueryOp::EndsWith => value.ends_with(&*operand),
        QueryOp::Contains => value.contains(&*operand),
        op => compare_op(op, &*value, &*operand, &*operand),
    }
}

static ZERO: Value = Value::Int(0);

fn compare_values(a: Option<&Value>, b: Option<&Value>, flags: u32) -> Ordering {
    let nulls_zero = flags & order_flags::NULLS_ZERO != 0;
    let a = a.or(nulls_zero.then_some(&ZERO));
    let b = b.or(nulls_zero.then_some(&ZERO));
    let null_order = if flags & order_flags::NULLS_LAST != 0 {
        Ordering::Greater
    } else {
        Ordering::Less
    };
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => null_order,
        (Some(_), None) => null_order.reverse(),
        (Some(x), Some(y)) => {
            let ord = compare_present(x, y, flags);
            if flags & order_flags::DESCENDING != 0 {
                ord.reverse()
            } else {
                ord
            }
        }
    }
}

fn compare_present(a: &Value, b: &Value, flags: u32) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if flags & order_flags::UNSIGNED != 0 {
                (*x as u64).cmp(&(*y as u64))
            } else {
                x.cmp(y)
            }
        }
        (Value::Double(x), Value::Double(y)) => x.total_cmp(y),
        (Value::Text(x), Value::Text(y)) => {
            if flags & order_flags::CASE_SENSITIVE != 0 {
                x.cmp(y)
            } else {
                x.to_lowercase().cmp(&y.to_lowercase())
            }
        }
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn distance_of(distance: DistanceType, a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    match distance {
        DistanceType::Euclidean => a
            .iter()
            .zip(b)
            .map(|(x, y)| {
                let d = f64::from(*x) - f64::from(*y);
                d * d
            })
            .sum(),
        DistanceType::Cosine => {
            let norm = |v: &[f32]| v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
            let denom = norm(a) * norm(b);
            if denom == 0.0 {
                1.0
            } else {
                1.0 - dot / denom
            }
        }
        DistanceType::DotProduct => 1.0 - dot,
    }
}

fn property_name(entity: Option<&EntityModel>, prop: PropertyId) -> String {
    entity
        .and_then(|e| e.property(prop))
        .map_or_else(|| prop.to_string(), |p| p.name.clone())
}

fn relation_name(model: &Model, relation: RelationId) -> String {
    model
        .standalone_relation(relation)
        .map_or_else(|| relation.to_string(), |(_, r)| r.name.clone())
}

fn case_suffix(case_sensitive: bool) -> &'static str {
    if case_sensitive {
        ""
    } else {
        " (case insensitive)"
    }
}

fn describe_compare<T: std::fmt::Display>(name: &str, op: QueryOp, a: &T, b: &T) -> String {
    if op == QueryOp::Between {
        format!("{name} between {a} and {b}")
    } else {
        format!("{name} {op} {a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PutMode;

    const ITEM: EntityId = EntityId(1);
    const ID: PropertyId = PropertyId(1);
    const NAME: PropertyId = PropertyId(2);
    const RANK: PropertyId = PropertyId(3);
    const WEIGHT: PropertyId = PropertyId(4);

    fn model() -> Model {
        Model::builder()
            .entity(ITEM, "Item")
            .id_property(ID, "id")
            .property(NAME, "name", PropertyType::String)
            .property(RANK, "rank", PropertyType::Long)
            .property(WEIGHT, "weight", PropertyType::Double)
            .build()
            .unwrap()
    }

    fn data(model: &Model, items: &[(&str, Option<i64>, f64)]) -> Data {
        let entity = model.entity(ITEM).unwrap();
        let mut data = Data::default();
        for (i, (name, rank, weight)) in items.iter().enumerate() {
            let record = Record::new()
                .with(NAME, *name)
                .with(RANK, *rank)
                .with(WEIGHT, *weight);
            data.put(entity, i as u64 + 1, &record.to_bytes().unwrap(), PutMode::Put)
                .unwrap();
        }
        data
    }

    fn ids(plan: &QueryPlan, data: &Data) -> Vec<ObjectId> {
        plan.execute(data).iter().map(|m| m.id).collect()
    }

    #[test]
    fn implicit_root_and() {
        let model = model();
        let data = data(&model, &[("a", Some(1), 1.0), ("b", Some(2), 2.0), ("c", Some(3), 3.0)]);
        let mut node = BuilderNode::new(ITEM, true);
        node.add(&model, NativeCondition::Int { prop: RANK, op: QueryOp::Greater, a: 1, b: 0 })
            .unwrap();
        node.add(&model, NativeCondition::Double { prop: WEIGHT, op: QueryOp::Less, a: 3.0, b: 0.0 })
            .unwrap();
        assert_eq!(ids(&node.compile().unwrap(), &data), vec![2]);
    }

    #[test]
    fn any_group_and_nulls() {
        let model = model();
        let data = data(&model, &[("a", None, 1.0), ("b", Some(2), 2.0), ("c", Some(3), 3.0)]);
        let mut node = BuilderNode::new(ITEM, true);
        let a = node.add(&model, NativeCondition::Null { prop: RANK }).unwrap();
        let b = node
            .add(&model, NativeCondition::Int { prop: RANK, op: QueryOp::Equal, a: 3, b: 0 })
            .unwrap();
        node.combine(&[a, b], true).unwrap();
        assert_eq!(ids(&node.compile().unwrap(), &data), vec![1, 3]);
    }

    #[test]
    fn sticky_error() {
        let model = model();
        let mut node = BuilderNode::new(ITEM, true);
        let err = node
            .add(&model, NativeCondition::Double { prop: NAME, op: QueryOp::Less, a: 1.0, b: 0.0 })
            .unwrap_err();
        assert_eq!(err.code, crate::error::PROPERTY_TYPE_MISMATCH);
        assert!(node.add(&model, NativeCondition::NotNull { prop: NAME }).is_err());
        assert_eq!(node.compile().unwrap_err().code, err.code);
    }

    #[test]
    fn unsupported_operator() {
        let model = model();
        let mut node = BuilderNode::new(ITEM, true);
        let err = node
            .add(&model, NativeCondition::Double { prop: WEIGHT, op: QueryOp::Equal, a: 1.0, b: 0.0 })
            .unwrap_err();
        assert_eq!(err.code, crate::error::ILLEGAL_ARGUMENT);
    }

    #[test]
    fn combine_rejects_reuse() {
        let model = model();
        let mut node = BuilderNode::new(ITEM, true);
        let a = node.add(&model, NativeCondition::NotNull { prop: NAME }).unwrap();
        let b = node.add(&model, NativeCondition::NotNull { prop: RANK }).unwrap();
        node.combine(&[a, b], false).unwrap();
        assert!(node.combine(&[a], true).is_err());
    }

    #[test]
    fn string_case_handling() {
        let model = model();
        let data = data(&model, &[("aaa", None, 0.0), ("AAA", None, 0.0), ("aaa", None, 0.0)]);
        let plan_for = |case_sensitive| {
            let mut node = BuilderNode::new(ITEM, true);
            node.add(
                &model,
                NativeCondition::Str {
                    prop: NAME,
                    op: QueryOp::Equal,
                    value: "aaa".into(),
                    case_sensitive,
                },
            )
            .unwrap();
            node.compile().unwrap()
        };
        assert_eq!(ids(&plan_for(true), &data).len(), 2);
        assert_eq!(ids(&plan_for(false), &data).len(), 3);
    }

    #[test]
    fn ordering_flags() {
        let model = model();
        let data = data(&model, &[("b", Some(2), 0.0), ("A", None, 0.0), ("c", Some(1), 0.0)]);

        let mut node = BuilderNode::new(ITEM, true);
        node.order(&model, NAME, 0).unwrap();
        let plan = node.compile().unwrap();
        let mut matches = plan.execute(&data);
        plan.sort(&mut matches);
        assert_eq!(matches.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 1, 3]);

        let mut node = BuilderNode::new(ITEM, true);
        node.order(&model, RANK, order_flags::DESCENDING | order_flags::NULLS_LAST)
            .unwrap();
        let plan = node.compile().unwrap();
        let mut matches = plan.execute(&data);
        plan.sort(&mut matches);
        assert_eq!(matches.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 3, 2]);
    }

    #[test]
    fn parameters() {
        let model = model();
        let data = data(&model, &[("a", Some(1), 0.0), ("b", Some(2), 0.0)]);
        let mut node = BuilderNode::new(ITEM, true);
        node.add(&model, NativeCondition::Int { prop: RANK, op: QueryOp::Equal, a: 1, b: 0 })
            .unwrap();
        let mut plan = node.compile().unwrap();
        assert_eq!(ids(&plan, &data), vec![1]);

        plan.set_param(ITEM, RANK, Param::Int(2)).unwrap();
        assert_eq!(ids(&plan, &data), vec![2]);
        assert!(plan.set_param(ITEM, NAME, Param::Str("x")).is_err());
        assert!(plan.set_param(ITEM, RANK, Param::Str("x")).is_err());
        assert_eq!(plan.describe_parameters(&model), "rank equal 2");
    }

    #[test]
    fn distances() {
        assert_eq!(distance_of(DistanceType::Euclidean, &[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert!(distance_of(DistanceType::Cosine, &[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-9);
        assert_eq!(distance_of(DistanceType::Cosine, &[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
