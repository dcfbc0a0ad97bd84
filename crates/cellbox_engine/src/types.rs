//! Identifiers, opaque handles and the small enums shared across the
//! engine boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an entity type within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Creates a new entity ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Identifier of a property within its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub u32);

impl PropertyId {
    /// Creates a new property ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "property:{}", self.0)
    }
}

/// Identifier of a standalone (to-many) relation, unique within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationId(pub u32);

impl RelationId {
    /// Creates a new relation ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relation:{}", self.0)
    }
}

/// Object identifier. Zero means "not yet assigned".
pub type ObjectId = u64;

/// Identifier of a registered query condition inside one query builder.
///
/// [`ConditionId::NONE`] is the "no explicit combination" sentinel returned
/// when a root AND group is left to the builder's implicit root semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConditionId(pub u32);

impl ConditionId {
    /// The sentinel "nothing was registered" id.
    pub const NONE: ConditionId = ConditionId(0);

    /// Returns true for the sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw handle value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(handle: $name) -> Self {
                handle.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

handle!(
    /// Opaque handle of an open store.
    StoreHandle,
    "store"
);
handle!(
    /// Opaque handle of a native transaction.
    TxnHandle,
    "txn"
);
handle!(
    /// Opaque handle of a cursor inside a transaction.
    CursorHandle,
    "cursor"
);
handle!(
    /// Opaque handle of a query builder.
    QueryBuilderHandle,
    "qb"
);
handle!(
    /// Opaque handle of a built query.
    QueryHandle,
    "query"
);
handle!(
    /// Opaque handle of an async write queue accessor.
    AsyncHandle,
    "async"
);
handle!(
    /// Opaque token of a registered observer.
    ObserverHandle,
    "observer"
);

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxMode {
    /// Snapshot read.
    Read,
    /// Exclusive write.
    Write,
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// How a put treats an existing object with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PutMode {
    /// Insert or overwrite.
    #[default]
    Put,
    /// Fail with `ID_ALREADY_EXISTS` if the id is taken.
    Insert,
    /// Fail with `ID_NOT_FOUND` if the id does not exist.
    Update,
}

/// Query condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOp {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// Inclusive range.
    Between,
    /// Substring, or element for string vectors.
    Contains,
    /// String prefix.
    StartsWith,
    /// String suffix.
    EndsWith,
    /// Member of a set.
    In,
    /// Not a member of a set.
    NotIn,
    /// Value is null.
    Null,
    /// Value is not null.
    NotNull,
    /// Approximate nearest neighbor search over a vector index.
    NearestNeighbors,
}

impl QueryOp {
    /// Returns the lower-case name used in error messages and descriptions.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::NotEqual => "not equal",
            Self::Less => "less",
            Self::LessOrEqual => "less or equal",
            Self::Greater => "greater",
            Self::GreaterOrEqual => "greater or equal",
            Self::Between => "between",
            Self::Contains => "contains",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Null => "is null",
            Self::NotNull => "is not null",
            Self::NearestNeighbors => "nearest neighbors",
        }
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sort flags for `qb_order`.
pub mod order_flags {
    /// Reverse the order.
    pub const DESCENDING: u32 = 1;
    /// Compare strings case sensitively.
    pub const CASE_SENSITIVE: u32 = 2;
    /// Compare integers as unsigned.
    pub const UNSIGNED: u32 = 4;
    /// Sort nulls after non-null values.
    pub const NULLS_LAST: u32 = 8;
    /// Treat zero as null when sorting.
    pub const NULLS_ZERO: u32 = 16;
}
