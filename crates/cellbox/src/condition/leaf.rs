//! Leaf conditions: one predicate on one property.

use std::fmt;

use cellbox_engine::{EntityId, PropertyId, QueryOp};

use crate::error::{Error, Result};

/// Operand of a leaf condition.
///
/// The set of shapes is closed; each maps to one family of engine
/// registration calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand (`Null`, `NotNull`).
    None,
    /// Integer operand; the second value is only used by `Between`.
    Int(i64, i64),
    /// Floating operand; the second value is only used by `Between`.
    Double(f64, f64),
    /// 32-bit integer set for `In` / `NotIn` on `Int` properties.
    Int32s(Vec<i32>),
    /// 64-bit integer set for `In` / `NotIn` on `Long`, `Date` and relation
    /// properties.
    Int64s(Vec<i64>),
    /// String compared against a string property.
    Str {
        /// The string.
        value: String,
        /// Compare case-sensitively.
        case_sensitive: bool,
    },
    /// String that must equal an element of a string-vector property.
    StrElement {
        /// The string.
        value: String,
        /// Compare case-sensitively.
        case_sensitive: bool,
    },
    /// String set for `In`.
    Strings {
        /// The strings.
        values: Vec<String>,
        /// Compare case-sensitively.
        case_sensitive: bool,
    },
    /// Byte sequence.
    Bytes(Vec<u8>),
    /// Query vector for nearest neighbour search.
    Vector {
        /// The query vector.
        query: Vec<f32>,
        /// Maximum number of neighbours to return.
        max_results: u32,
    },
}

impl Operand {
    /// Whether `op` can be applied to this operand shape.
    #[must_use]
    pub fn supports(&self, op: QueryOp) -> bool {
        use QueryOp::*;
        match self {
            Self::None => matches!(op, Null | NotNull),
            Self::Int(..) => matches!(
                op,
                Equal | NotEqual | Less | LessOrEqual | Greater | GreaterOrEqual | Between
            ),
            Self::Double(..) => matches!(op, Less | LessOrEqual | Greater | GreaterOrEqual | Between),
            Self::Int32s(_) | Self::Int64s(_) => matches!(op, In | NotIn),
            Self::Str { .. } => matches!(
                op,
                Equal
                    | NotEqual
                    | Less
                    | LessOrEqual
                    | Greater
                    | GreaterOrEqual
                    | Contains
                    | StartsWith
                    | EndsWith
            ),
            Self::StrElement { .. } => op == Contains,
            Self::Strings { .. } => op == In,
            Self::Bytes(_) => matches!(op, Equal | Less | LessOrEqual | Greater | GreaterOrEqual),
            Self::Vector { .. } => op == NearestNeighbors,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::None => "no operand",
            Self::Int(..) => "integer",
            Self::Double(..) => "floating point",
            Self::Int32s(_) => "i32 array",
            Self::Int64s(_) => "i64 array",
            Self::Str { .. } => "string",
            Self::StrElement { .. } => "string element",
            Self::Strings { .. } => "string array",
            Self::Bytes(_) => "byte sequence",
            Self::Vector { .. } => "float vector",
        }
    }
}

/// A single predicate on one property of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    entity: EntityId,
    property: PropertyId,
    op: QueryOp,
    operand: Operand,
}

impl Leaf {
    /// Creates a leaf, checking that `op` fits the operand shape.
    pub fn new(entity: EntityId, property: PropertyId, op: QueryOp, operand: Operand) -> Result<Self> {
        if !operand.supports(op) {
            return Err(Error::illegal_argument(format!(
                "operation {op} is not supported for a {} operand",
                operand.shape()
            )));
        }
        Ok(Self::new_unchecked(entity, property, op, operand))
    }

    pub(crate) const fn new_unchecked(
        entity: EntityId,
        property: PropertyId,
        op: QueryOp,
        operand: Operand,
    ) -> Self {
        Self {
            entity,
            property,
            op,
            operand,
        }
    }

    /// Entity type the property belongs to.
    #[must_use]
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// The property.
    #[must_use]
    pub fn property(&self) -> PropertyId {
        self.property
    }

    /// The operator.
    #[must_use]
    pub fn op(&self) -> QueryOp {
        self.op
    }

    /// The operand.
    #[must_use]
    pub fn operand(&self) -> &Operand {
        &self.operand
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {}", self.entity, self.property, self.op)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int(a, b) if self.op == QueryOp::Between => write!(f, " {a}..={b}"),
            Operand::Int(a, _) => write!(f, " {a}"),
            Operand::Double(a, b) if self.op == QueryOp::Between => write!(f, " {a}..={b}"),
            Operand::Double(a, _) => write!(f, " {a}"),
            Operand::Int32s(values) => write!(f, " {values:?}"),
            Operand::Int64s(values) => write!(f, " {values:?}"),
            Operand::Str { value, .. } | Operand::StrElement { value, .. } => {
                write!(f, " {value:?}")
            }
            Operand::Strings { values, .. } => write!(f, " {values:?}"),
            Operand::Bytes(bytes) => write!(f, " {} bytes", bytes.len()),
            Operand::Vector { query, max_results } => {
                write!(f, " {query:?} (max {max_results})")
            }
        }
    }
}
