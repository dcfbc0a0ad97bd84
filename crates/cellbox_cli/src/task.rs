//! The task entity.

use std::time::{SystemTime, UNIX_EPOCH};

use cellbox::property::{DateKind, Property, StringKind};
use cellbox::{EntityCodec, Result};
use cellbox_engine::{EntityId, Model, NativeResult, ObjectId, PropertyId, PropertyType, Record};
use serde::Serialize;

const ID: PropertyId = PropertyId(1);

/// A to-do item. Dates are milliseconds since the epoch, 0 if unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Task {
    pub id: ObjectId,
    pub text: String,
    pub date_created: i64,
    pub date_finished: i64,
}

impl Task {
    pub const TEXT: Property<Task, StringKind> = Property::new(PropertyId(2));
    pub const DATE_CREATED: Property<Task, DateKind> = Property::new(PropertyId(3));
    pub const DATE_FINISHED: Property<Task, DateKind> = Property::new(PropertyId(4));

    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: 0,
            text: text.into(),
            date_created: now_millis(),
            date_finished: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.date_finished != 0
    }

    pub fn finish(&mut self) {
        self.date_finished = now_millis();
    }
}

impl EntityCodec for Task {
    const ENTITY_ID: EntityId = EntityId(1);

    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut record = Record::new()
            .with(ID, self.id)
            .with(Self::TEXT.id(), self.text.as_str())
            .with(Self::DATE_CREATED.id(), self.date_created);
        // Unfinished tasks leave the date null so `is_null` finds them.
        if self.is_done() {
            record.set(Self::DATE_FINISHED.id(), self.date_finished);
        }
        Ok(record.to_bytes()?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let record = Record::from_bytes(bytes)?;
        Ok(Self {
            id: record.object_id(ID),
            text: record
                .get_str(Self::TEXT.id())
                .unwrap_or_default()
                .to_string(),
            date_created: record.get_i64(Self::DATE_CREATED.id()).unwrap_or(0),
            date_finished: record.get_i64(Self::DATE_FINISHED.id()).unwrap_or(0),
        })
    }
}

pub fn model() -> NativeResult<Model> {
    Model::builder()
        .entity(Task::ENTITY_ID, "Task")
        .id_property(ID, "id")
        .property(Task::TEXT.id(), "text", PropertyType::String)
        .property(Task::DATE_CREATED.id(), "dateCreated", PropertyType::Date)
        .property(Task::DATE_FINISHED.id(), "dateFinished", PropertyType::Date)
        .build()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfinished_date_is_null() {
        let task = Task::new("write tests");
        let record = Record::from_bytes(&task.encode().unwrap()).unwrap();
        assert!(record.get(Task::DATE_FINISHED.id()).is_none());

        let mut done = task.clone();
        done.finish();
        let decoded = Task::decode(&done.encode().unwrap()).unwrap();
        assert!(decoded.is_done());
        assert_eq!(decoded.text, "write tests");
    }
}
