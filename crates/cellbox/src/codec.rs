//! Entity codec trait for typed boxes and queries.

use cellbox_engine::{EntityId, ObjectId};

use crate::error::Result;

/// Trait for types that can be stored in a [`Store`](crate::Store).
///
/// Implementors provide:
/// - `ENTITY_ID`: the entity type id declared in the store's model
/// - `object_id()` / `set_object_id()`: access to the `u64` id, where 0 means
///   "not stored yet"
/// - `encode()` / `decode()`: conversion to and from the engine's object bytes
///
/// # Example
///
/// ```rust
/// use cellbox::{EntityCodec, Error, Result};
/// use cellbox_engine::{EntityId, ObjectId, PropertyId, Record};
///
/// struct Note {
///     id: ObjectId,
///     text: String,
/// }
///
/// impl EntityCodec for Note {
///     const ENTITY_ID: EntityId = EntityId(1);
///
///     fn object_id(&self) -> ObjectId {
///         self.id
///     }
///
///     fn set_object_id(&mut self, id: ObjectId) {
///         self.id = id;
///     }
///
///     fn encode(&self) -> Result<Vec<u8>> {
///         Ok(Record::new()
///             .with(PropertyId(1), self.id)
///             .with(PropertyId(2), self.text.as_str())
///             .to_bytes()?)
///     }
///
///     fn decode(bytes: &[u8]) -> Result<Self> {
///         let record = Record::from_bytes(bytes)?;
///         Ok(Note {
///             id: record.object_id(PropertyId(1)),
///             text: record
///                 .get_str(PropertyId(2))
///                 .ok_or_else(|| Error::codec("Note.text is missing"))?
///                 .to_string(),
///         })
///     }
/// }
/// ```
pub trait EntityCodec: Sized {
    /// The entity type id in the store's model.
    const ENTITY_ID: EntityId;

    /// Returns the object id (0 if the object was never stored).
    fn object_id(&self) -> ObjectId;

    /// Stores the id assigned on put.
    fn set_object_id(&mut self, id: ObjectId);

    /// Encodes the object to engine bytes.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decodes an object from engine bytes.
    fn decode(bytes: &[u8]) -> Result<Self>;
}
