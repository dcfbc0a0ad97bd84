//! # Cellbox Engine
//!
//! The native engine boundary for cellbox, plus an in-memory reference
//! engine.
//!
//! The [`Engine`] trait is the raw, handle-based API the binding layer talks
//! to: every entry point takes opaque `u64` handles and plain slices, and
//! returns a [`NativeResult`] carrying an integer result code. Nothing in
//! this crate knows about typed entities; objects cross the boundary as
//! opaque byte buffers (CBOR-encoded [`Record`]s).
//!
//! ## Components
//!
//! - [`Engine`] - one method per native entry point
//! - [`MemoryEngine`] - snapshot-isolated in-memory implementation
//! - [`Model`] - entity and property metadata handed to `store_open`
//! - [`Record`] - the property map objects are encoded as
//! - [`EngineStats`] - resource counters used to verify release discipline
//!
//! ## Example
//!
//! ```rust
//! use cellbox_engine::{
//!     Engine, EntityId, MemoryEngine, Model, PropertyId, PropertyType, PutMode, Record,
//!     StoreConfig, TxMode,
//! };
//!
//! let model = Model::builder()
//!     .entity(EntityId(1), "Note")
//!     .id_property(PropertyId(1), "id")
//!     .property(PropertyId(2), "text", PropertyType::String)
//!     .build()
//!     .unwrap();
//!
//! let engine = MemoryEngine::new();
//! let store = engine
//!     .store_open(&model.to_bytes().unwrap(), &StoreConfig::default())
//!     .unwrap();
//!
//! let txn = engine.txn_begin(store, TxMode::Write).unwrap();
//! let cursor = engine.cursor_open(txn, EntityId(1)).unwrap();
//! let id = engine.cursor_id_for_put(cursor, 0).unwrap();
//! let bytes = Record::new().with(PropertyId(2), "hello").to_bytes().unwrap();
//! engine.cursor_put(cursor, id, &bytes, PutMode::Put).unwrap();
//! engine.txn_success(txn).unwrap();
//!
//! engine.store_close(store).unwrap();
//! assert_eq!(engine.stats().open_transactions(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
pub mod error;
mod memory;
mod model;
mod record;
mod stats;
mod types;

pub use engine::{Engine, ObserverFn, StoreConfig};
pub use error::{ErrorCode, NativeError, NativeResult};
pub use memory::MemoryEngine;
pub use model::{
    property_flags, DistanceType, EntityModel, Model, ModelBuilder, PropertyModel, PropertyType,
    RelationModel, VectorIndex,
};
pub use record::{Record, Value};
pub use stats::{EngineStats, StatsSnapshot};
pub use types::{
    order_flags, AsyncHandle, ConditionId, CursorHandle, EntityId, ObjectId, ObserverHandle,
    PropertyId, PutMode, QueryBuilderHandle, QueryHandle, QueryOp, RelationId, StoreHandle,
    TxMode, TxnHandle,
};
