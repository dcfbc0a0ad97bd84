//! # cellbox
//!
//! Typed bindings over a native object-store engine.
//!
//! The engine is reached through the [`Engine`](cellbox_engine::Engine)
//! trait and opaque handles. This crate wraps those handles so that each is
//! released exactly once, and adds the client-side pieces:
//!
//! - [`Condition`] trees, built from typed [`Property`] handles and lowered
//!   onto the engine's query builder by [`QueryBuilder`]
//! - [`Query`] execution with persistent offset and limit
//! - reentrant [`Transaction`]s and [`Cursor`]s
//! - [`EntityBox`] for typed CRUD and [`AsyncBox`] for queued writes
//!
//! ## Quick start
//!
//! ```rust
//! use cellbox::property::{Property, StringKind};
//! use cellbox::{EntityCodec, Options, Result, Store};
//! use cellbox_engine::{EntityId, Model, ObjectId, PropertyId, PropertyType, Record};
//!
//! struct City {
//!     id: ObjectId,
//!     name: String,
//! }
//!
//! impl EntityCodec for City {
//!     const ENTITY_ID: EntityId = EntityId(1);
//!
//!     fn object_id(&self) -> ObjectId {
//!         self.id
//!     }
//!
//!     fn set_object_id(&mut self, id: ObjectId) {
//!         self.id = id;
//!     }
//!
//!     fn encode(&self) -> Result<Vec<u8>> {
//!         Ok(Record::new()
//!             .with(PropertyId(1), self.id)
//!             .with(PropertyId(2), self.name.as_str())
//!             .to_bytes()?)
//!     }
//!
//!     fn decode(bytes: &[u8]) -> Result<Self> {
//!         let record = Record::from_bytes(bytes)?;
//!         Ok(City {
//!             id: record.object_id(PropertyId(1)),
//!             name: record.get_str(PropertyId(2)).unwrap_or_default().to_string(),
//!         })
//!     }
//! }
//!
//! const NAME: Property<City, StringKind> = Property::new(PropertyId(2));
//!
//! let model = Model::builder()
//!     .entity(EntityId(1), "City")
//!     .id_property(PropertyId(1), "id")
//!     .property(PropertyId(2), "name", PropertyType::String)
//!     .build()
//!     .unwrap();
//! let store = Store::in_memory(Options::new(model)).unwrap();
//!
//! let cities = store.entity_box::<City>();
//! for name in ["Berlin", "Bern", "Oslo"] {
//!     cities.put(&mut City { id: 0, name: name.into() }).unwrap();
//! }
//!
//! let query = cities.query_with(&NAME.starts_with("ber", false)).unwrap();
//! let names: Vec<String> = query.find().unwrap().into_iter().map(|c| c.name).collect();
//! assert_eq!(names, ["Berlin", "Bern"]);
//! ```
//!
//! ## Threads
//!
//! [`Store`], boxes and queries are `Send + Sync`. Transactions and cursors
//! are bound to the thread that opened them and are `!Send`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod async_box;
mod codec;
pub mod condition;
mod cursor;
mod entity_box;
mod error;
pub mod handle;
mod listener;
mod options;
pub mod property;
mod query;
mod store;
mod transaction;

pub use async_box::AsyncBox;
pub use codec::EntityCodec;
pub use condition::{Condition, ConditionSink, Group, Leaf, Operand};
pub use cursor::{Cursor, CursorTx};
pub use entity_box::EntityBox;
pub use error::{check_err, check_found, check_id, check_success, Error, Result};
pub use options::Options;
pub use property::Property;
pub use query::{Query, QueryBuilder};
pub use store::Store;
pub use transaction::Transaction;

pub use cellbox_engine::{
    order_flags, EntityId, ObjectId, PropertyId, PutMode, QueryOp, RelationId, TxMode,
};
