//! Object wire format understood by the engine.
//!
//! An object crosses the boundary as a CBOR-encoded [`Record`]: a map from
//! property id to [`Value`]. Absent properties and [`Value::Null`] are both
//! null for query purposes. On put the engine writes the assigned object id
//! into the entity's id property.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NativeError, NativeResult};
use crate::types::{ObjectId, PropertyId};

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Explicit null.
    Null,
    /// Integers, booleans, dates and relation targets.
    Int(i64),
    /// Floats and doubles.
    Double(f64),
    /// Strings.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// String lists.
    TextVec(Vec<String>),
    /// Float vectors.
    FloatVec(Vec<f32>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Double(f64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::TextVec(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Self::FloatVec(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// An object as a property map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<u32, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, builder style. Null values are not stored.
    #[must_use]
    pub fn with(mut self, prop: PropertyId, value: impl Into<Value>) -> Self {
        self.set(prop, value);
        self
    }

    /// Sets a property. Null values remove the property.
    pub fn set(&mut self, prop: PropertyId, value: impl Into<Value>) {
        match value.into() {
            Value::Null => {
                self.fields.remove(&prop.0);
            }
            value => {
                self.fields.insert(prop.0, value);
            }
        }
    }

    /// Returns the value of a property, `None` if null.
    #[must_use]
    pub fn get(&self, prop: PropertyId) -> Option<&Value> {
        self.fields.get(&prop.0).filter(|v| !v.is_null())
    }

    /// Returns the object id stored in `id_prop` (0 if unset).
    #[must_use]
    pub fn object_id(&self, id_prop: PropertyId) -> ObjectId {
        self.get_i64(id_prop).map_or(0, |v| v as ObjectId)
    }

    /// Returns an integer property.
    #[must_use]
    pub fn get_i64(&self, prop: PropertyId) -> Option<i64> {
        match self.get(prop) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a boolean property.
    #[must_use]
    pub fn get_bool(&self, prop: PropertyId) -> Option<bool> {
        self.get_i64(prop).map(|v| v != 0)
    }

    /// Returns a floating point property.
    #[must_use]
    pub fn get_f64(&self, prop: PropertyId) -> Option<f64> {
        match self.get(prop) {
            Some(Value::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a string property.
    #[must_use]
    pub fn get_str(&self, prop: PropertyId) -> Option<&str> {
        match self.get(prop) {
            Some(Value::Text(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a bytes property.
    #[must_use]
    pub fn get_bytes(&self, prop: PropertyId) -> Option<&[u8]> {
        match self.get(prop) {
            Some(Value::Bytes(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a string list property.
    #[must_use]
    pub fn get_strings(&self, prop: PropertyId) -> Option<&[String]> {
        match self.get(prop) {
            Some(Value::TextVec(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a float vector property.
    #[must_use]
    pub fn get_floats(&self, prop: PropertyId) -> Option<&[f32]> {
        match self.get(prop) {
            Some(Value::FloatVec(v)) => Some(v),
            _ => None,
        }
    }

    /// Iterates over the non-null properties in id order.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &Value)> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (PropertyId(*k), v))
    }

    /// Encodes the record as CBOR.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if serialization fails.
    pub fn to_bytes(&self) -> NativeResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| NativeError::illegal_argument(format!("record encoding failed: {e}")))?;
        Ok(out)
    }

    /// Decodes a record from CBOR.
    ///
    /// # Errors
    ///
    /// Returns `ILLEGAL_ARGUMENT` if the bytes are not a record.
    pub fn from_bytes(bytes: &[u8]) -> NativeResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| NativeError::illegal_argument(format!("record decoding failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() {
        let record = Record::new()
            .with(PropertyId(1), 42_i64)
            .with(PropertyId(2), "hello")
            .with(PropertyId(3), true)
            .with(PropertyId(4), vec![1.0_f32, 2.0])
            .with(PropertyId(5), Option::<String>::None);

        assert_eq!(record.object_id(PropertyId(1)), 42);
        assert_eq!(record.get_str(PropertyId(2)), Some("hello"));
        assert_eq!(record.get_bool(PropertyId(3)), Some(true));
        assert_eq!(record.get_floats(PropertyId(4)), Some(&[1.0_f32, 2.0][..]));
        assert!(record.get(PropertyId(5)).is_none());
        assert_eq!(record.get_i64(PropertyId(2)), None);
    }

    #[test]
    fn cbor_roundtrip() {
        let record = Record::new()
            .with(PropertyId(1), 7_i64)
            .with(PropertyId(2), vec![1_u8, 2, 3])
            .with(PropertyId(3), vec!["a".to_string(), "b".to_string()]);
        let bytes = record.to_bytes().unwrap();
        assert_eq!(Record::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn null_removes() {
        let mut record = Record::new().with(PropertyId(1), 1_i64);
        record.set(PropertyId(1), Value::Null);
        assert_eq!(record.iter().count(), 0);
    }

    #[test]
    fn invalid_bytes() {
        assert!(Record::from_bytes(b"not cbor at all").is_err());
    }
}
