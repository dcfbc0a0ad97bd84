//! Schema model handed to the engine when a store is opened.
//!
//! A [`Model`] lists the entity types with their properties. It is built with
//! the fluent [`ModelBuilder`] and crosses the engine boundary as CBOR bytes
//! ([`Model::to_bytes`] / [`Model::from_bytes`]).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{NativeError, NativeResult};
use crate::types::{EntityId, PropertyId, RelationId};

/// Storage type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// `bool`
    Bool,
    /// `i32`
    Int,
    /// `i64`
    Long,
    /// `f32`
    Float,
    /// `f64`
    Double,
    /// UTF-8 string.
    String,
    /// Milliseconds since the epoch, stored as `i64`.
    Date,
    /// To-one relation, stored as the target object id.
    Relation,
    /// Raw bytes.
    ByteVector,
    /// List of strings.
    StringVector,
    /// List of `f32`.
    FloatVector,
}

impl PropertyType {
    /// Returns true for types stored as integers.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::Long | Self::Date | Self::Relation
        )
    }

    /// Returns true for floating point types.
    #[must_use]
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

/// Property flags.
pub mod property_flags {
    /// The object id property. Exactly one per entity, of type `Long`.
    pub const ID: u32 = 1;
    /// Values must be unique across objects of the entity.
    pub const UNIQUE: u32 = 4;
    /// The property carries a value index.
    pub const INDEXED: u32 = 8;
    /// The property carries a vector index (float vectors only).
    pub const VECTOR_INDEX: u32 = 16;
}

/// Distance function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistanceType {
    /// Squared Euclidean distance.
    #[default]
    Euclidean,
    /// `1 - cosine similarity`.
    Cosine,
    /// `1 - dot product` for normalized vectors.
    DotProduct,
}

/// Vector index parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorIndex {
    /// Expected number of dimensions.
    pub dimensions: u32,
    /// Distance function.
    pub distance: DistanceType,
}

/// A property of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyModel {
    /// Property id, unique within its entity.
    pub id: PropertyId,
    /// Property name.
    pub name: String,
    /// Storage type.
    pub kind: PropertyType,
    /// Combination of [`property_flags`].
    pub flags: u32,
    /// Target entity of a relation property.
    pub target: Option<EntityId>,
    /// Vector index of a float vector property.
    pub vector_index: Option<VectorIndex>,
}

impl PropertyModel {
    /// Returns true if the given flag bits are all set.
    #[must_use]
    pub const fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }
}

/// A standalone to-many relation from its owning entity to `target`.
///
/// Links are stored apart from the objects, as (source id, target id) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationModel {
    /// Relation id, unique within the model.
    pub id: RelationId,
    /// Relation name.
    pub name: String,
    /// Target entity.
    pub target: EntityId,
}

/// An entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityModel {
    /// Entity id, unique within the model.
    pub id: EntityId,
    /// Entity name.
    pub name: String,
    /// Properties in declaration order.
    pub properties: Vec<PropertyModel>,
    /// Standalone relations with this entity as source.
    #[serde(default)]
    pub relations: Vec<RelationModel>,
}

impl EntityModel {
    /// Looks up a property by id.
    #[must_use]
    pub fn property(&self, id: PropertyId) -> Option<&PropertyModel> {
        self.properties.iter().find(|p| p.id == id)
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property_by_name(&self, name: &str) -> Option<&PropertyModel> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns the id property.
    #[must_use]
    pub fn id_property(&self) -> Option<&PropertyModel> {
        self.properties
            .iter()
            .find(|p| p.has_flag(property_flags::ID))
    }
}

/// The schema of a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Model {
    /// Entity types.
    pub entities: Vec<EntityModel>,
}

impl Model {
    /// Starts building a model.
    #[must_use]
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Looks up an entity by id.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&EntityModel> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Looks up a standalone relation together with its source entity.
    #[must_use]
    pub fn standalone_relation(&self, id: RelationId) -> Option<(&EntityModel, &RelationModel)> {
        self.entities
            .iter()
            .find_map(|e| e.relations.iter().find(|r| r.id == id).map(|r| (e, r)))
    }

    /// Looks up an entity by name.
    #[must_use]
    pub fn entity_by_name(&self, name: &str) -> Option<&EntityModel> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Encodes the model as CBOR.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if serialization fails.
    pub fn to_bytes(&self) -> NativeResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| NativeError::illegal_argument(format!("model encoding failed: {e}")))?;
        Ok(out)
    }

    /// Decodes and validates a model from CBOR.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if the bytes are not a valid model.
    pub fn from_bytes(bytes: &[u8]) -> NativeResult<Self> {
        let model: Model = ciborium::from_reader(bytes)
            .map_err(|e| NativeError::illegal_argument(format!("model decoding failed: {e}")))?;
        model.validate()?;
        Ok(model)
    }

    /// Checks ids, names, id properties, relations and vector indexes.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` describing the first problem found.
    pub fn validate(&self) -> NativeResult<()> {
        let mut entity_ids = HashSet::new();
        let mut entity_names = HashSet::new();
        for entity in &self.entities {
            if entity.id.0 == 0 {
                return Err(NativeError::illegal_argument(format!(
                    "entity {} has id 0",
                    entity.name
                )));
            }
            if !entity_ids.insert(entity.id) || !entity_names.insert(entity.name.as_str()) {
                return Err(NativeError::illegal_argument(format!(
                    "duplicate entity {} ({})",
                    entity.name, entity.id
                )));
            }

            let mut prop_ids = HashSet::new();
            let mut prop_names = HashSet::new();
            let mut id_props = 0;
            for prop in &entity.properties {
                if prop.id.0 == 0
                    || !prop_ids.insert(prop.id)
                    || !prop_names.insert(prop.name.as_str())
                {
                    return Err(NativeError::illegal_argument(format!(
                        "invalid or duplicate property {}.{} ({})",
                        entity.name, prop.name, prop.id
                    )));
                }
                if prop.has_flag(property_flags::ID) {
                    id_props += 1;
                    if prop.kind != PropertyType::Long {
                        return Err(NativeError::illegal_argument(format!(
                            "id property {}.{} must be of type Long",
                            entity.name, prop.name
                        )));
                    }
                }
                if prop.kind == PropertyType::Relation && prop.target.is_none() {
                    return Err(NativeError::illegal_argument(format!(
                        "relation {}.{} has no target entity",
                        entity.name, prop.name
                    )));
                }
                if prop.vector_index.is_some() && prop.kind != PropertyType::FloatVector {
                    return Err(NativeError::illegal_argument(format!(
                        "vector index on non-vector property {}.{}",
                        entity.name, prop.name
                    )));
                }
            }
            if id_props != 1 {
                return Err(NativeError::illegal_argument(format!(
                    "entity {} must have exactly one id property, found {id_props}",
                    entity.name
                )));
            }
        }

        let mut relation_ids = HashSet::new();
        for entity in &self.entities {
            for relation in &entity.relations {
                if relation.id.0 == 0 || !relation_ids.insert(relation.id) {
                    return Err(NativeError::illegal_argument(format!(
                        "invalid or duplicate relation {}.{} ({})",
                        entity.name, relation.name, relation.id
                    )));
                }
                if !entity_ids.contains(&relation.target) {
                    return Err(NativeError::illegal_argument(format!(
                        "relation {}.{} targets unknown {}",
                        entity.name, relation.name, relation.target
                    )));
                }
            }
            for prop in &entity.properties {
                if let Some(target) = prop.target {
                    if !entity_ids.contains(&target) {
                        return Err(NativeError::illegal_argument(format!(
                            "relation {}.{} targets unknown {target}",
                            entity.name, prop.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fluent builder for a [`Model`].
///
/// ```rust
/// use cellbox_engine::{EntityId, Model, PropertyId, PropertyType};
///
/// let model = Model::builder()
///     .entity(EntityId(1), "Task")
///     .id_property(PropertyId(1), "id")
///     .property(PropertyId(2), "text", PropertyType::String)
///     .build()
///     .unwrap();
/// assert_eq!(model.entities.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<EntityModel>,
}

impl ModelBuilder {
    /// Starts a new entity; following property calls add to it.
    #[must_use]
    pub fn entity(mut self, id: EntityId, name: impl Into<String>) -> Self {
        self.entities.push(EntityModel {
            id,
            name: name.into(),
            properties: Vec::new(),
            relations: Vec::new(),
        });
        self
    }

    /// Adds the `Long` id property of the current entity.
    #[must_use]
    pub fn id_property(self, id: PropertyId, name: impl Into<String>) -> Self {
        self.property(id, name, PropertyType::Long)
            .flags(property_flags::ID)
    }

    /// Adds a property to the current entity.
    #[must_use]
    pub fn property(mut self, id: PropertyId, name: impl Into<String>, kind: PropertyType) -> Self {
        if let Some(entity) = self.entities.last_mut() {
            entity.properties.push(PropertyModel {
                id,
                name: name.into(),
                kind,
                flags: 0,
                target: None,
                vector_index: None,
            });
        }
        self
    }

    /// Adds a to-one relation property pointing at `target`.
    #[must_use]
    pub fn relation(self, id: PropertyId, name: impl Into<String>, target: EntityId) -> Self {
        let mut this = self.property(id, name, PropertyType::Relation);
        if let Some(prop) = this.last_property() {
            prop.target = Some(target);
            prop.flags |= property_flags::INDEXED;
        }
        this
    }

    /// Adds a standalone to-many relation from the current entity to
    /// `target`.
    #[must_use]
    pub fn standalone_relation(
        mut self,
        id: RelationId,
        name: impl Into<String>,
        target: EntityId,
    ) -> Self {
        if let Some(entity) = self.entities.last_mut() {
            entity.relations.push(RelationModel {
                id,
                name: name.into(),
                target,
            });
        }
        self
    }

    /// Adds flags to the last added property.
    #[must_use]
    pub fn flags(mut self, flags: u32) -> Self {
        if let Some(prop) = self.last_property() {
            prop.flags |= flags;
        }
        self
    }

    /// Puts a vector index on the last added property.
    #[must_use]
    pub fn vector_index(mut self, dimensions: u32, distance: DistanceType) -> Self {
        if let Some(prop) = self.last_property() {
            prop.flags |= property_flags::VECTOR_INDEX;
            prop.vector_index = Some(VectorIndex {
                dimensions,
                distance,
            });
        }
        self
    }

    /// Validates and returns the model.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if the model is inconsistent.
    pub fn build(self) -> NativeResult<Model> {
        let model = Model {
            entities: self.entities,
        };
        model.validate()?;
        Ok(model)
    }

    fn last_property(&mut self) -> Option<&mut PropertyModel> {
        self.entities
            .last_mut()
            .and_then(|e| e.properties.last_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ILLEGAL_ARGUMENT;

    fn sample() -> Model {
        Model::builder()
            .entity(EntityId(1), "Author")
            .id_property(PropertyId(1), "id")
            .property(PropertyId(2), "name", PropertyType::String)
            .entity(EntityId(2), "Book")
            .id_property(PropertyId(1), "id")
            .relation(PropertyId(2), "author", EntityId(1))
            .property(PropertyId(3), "embedding", PropertyType::FloatVector)
            .vector_index(2, DistanceType::Euclidean)
            .build()
            .unwrap()
    }

    #[test]
    fn lookup() {
        let model = sample();
        let book = model.entity_by_name("Book").unwrap();
        assert_eq!(book.id, EntityId(2));
        assert_eq!(book.id_property().unwrap().name, "id");
        let author = book.property_by_name("author").unwrap();
        assert_eq!(author.target, Some(EntityId(1)));
        assert!(author.has_flag(property_flags::INDEXED));
        assert!(book
            .property(PropertyId(3))
            .unwrap()
            .has_flag(property_flags::VECTOR_INDEX));
    }

    #[test]
    fn bytes_roundtrip() {
        let model = sample();
        let bytes = model.to_bytes().unwrap();
        assert_eq!(Model::from_bytes(&bytes).unwrap(), model);
    }

    #[test]
    fn missing_id_property() {
        let err = Model::builder()
            .entity(EntityId(1), "Broken")
            .property(PropertyId(1), "name", PropertyType::String)
            .build()
            .unwrap_err();
        assert_eq!(err.code, ILLEGAL_ARGUMENT);
    }

    #[test]
    fn dangling_relation() {
        let err = Model::builder()
            .entity(EntityId(1), "Book")
            .id_property(PropertyId(1), "id")
            .relation(PropertyId(2), "author", EntityId(9))
            .build()
            .unwrap_err();
        assert!(err.message.contains("unknown"));
    }

    #[test]
    fn standalone_relations() {
        let model = Model::builder()
            .entity(EntityId(1), "Student")
            .id_property(PropertyId(1), "id")
            .standalone_relation(RelationId(1), "teachers", EntityId(2))
            .entity(EntityId(2), "Teacher")
            .id_property(PropertyId(1), "id")
            .build()
            .unwrap();
        let (source, relation) = model.standalone_relation(RelationId(1)).unwrap();
        assert_eq!(source.name, "Student");
        assert_eq!(relation.target, EntityId(2));
        assert!(model.standalone_relation(RelationId(2)).is_none());
        assert_eq!(Model::from_bytes(&model.to_bytes().unwrap()).unwrap(), model);

        let err = Model::builder()
            .entity(EntityId(1), "Student")
            .id_property(PropertyId(1), "id")
            .standalone_relation(RelationId(1), "teachers", EntityId(9))
            .build()
            .unwrap_err();
        assert!(err.message.contains("unknown"));

        let err = Model::builder()
            .entity(EntityId(1), "Student")
            .id_property(PropertyId(1), "id")
            .standalone_relation(RelationId(1), "a", EntityId(1))
            .standalone_relation(RelationId(1), "b", EntityId(1))
            .build()
            .unwrap_err();
        assert_eq!(err.code, ILLEGAL_ARGUMENT);
    }

    #[test]
    fn garbage_bytes() {
        assert!(Model::from_bytes(&[0xff, 0x00, 0x13]).is_err());
    }
}
