//! Sample schema and store helpers.
//!
//! Four entities cover every property kind the bindings know:
//!
//! | Entity   | Id | Purpose                                      |
//! |----------|----|----------------------------------------------|
//! | [`Foo`]  | 1  | one property of each scalar and vector kind  |
//! | [`City`] | 2  | vector search over a 2-d location            |
//! | [`Author`] | 3 | relation target, standalone relation source  |
//! | [`Book`] | 4  | relation source, standalone relation target  |

use std::ops::Deref;
use std::sync::Arc;

use cellbox::property::{
    BoolKind, BytesKind, DateKind, DoubleKind, FloatVectorKind, IntKind, LongKind, RelationKind,
    RelationStandalone, StringKind, StringVectorKind,
};
use cellbox::{EntityCodec, Options, Property, Result, Store};
use cellbox_engine::{
    DistanceType, EntityId, MemoryEngine, Model, ObjectId, PropertyId, PropertyType, Record,
    RelationId, StatsSnapshot,
};

const ID: PropertyId = PropertyId(1);

/// An entity with one property of most kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Foo {
    /// Object id.
    pub id: ObjectId,
    /// `String`
    pub text: String,
    /// `Int`
    pub number: i32,
    /// `Long`
    pub long: i64,
    /// `Double`
    pub score: f64,
    /// `Bool`
    pub flag: bool,
    /// `StringVector`
    pub tags: Vec<String>,
    /// `ByteVector`
    pub blob: Vec<u8>,
    /// `Date`, milliseconds since the epoch.
    pub created: i64,
}

impl Foo {
    /// `text`
    pub const TEXT: Property<Foo, StringKind> = Property::new(PropertyId(2));
    /// `number`
    pub const NUMBER: Property<Foo, IntKind> = Property::new(PropertyId(3));
    /// `long`
    pub const LONG: Property<Foo, LongKind> = Property::new(PropertyId(4));
    /// `score`
    pub const SCORE: Property<Foo, DoubleKind> = Property::new(PropertyId(5));
    /// `flag`
    pub const FLAG: Property<Foo, BoolKind> = Property::new(PropertyId(6));
    /// `tags`
    pub const TAGS: Property<Foo, StringVectorKind> = Property::new(PropertyId(7));
    /// `blob`
    pub const BLOB: Property<Foo, BytesKind> = Property::new(PropertyId(8));
    /// `created`
    pub const CREATED: Property<Foo, DateKind> = Property::new(PropertyId(9));

    /// A `Foo` with only `text` set.
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    /// A `Foo` with only `number` set.
    pub fn with_number(number: i32) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }
}

impl EntityCodec for Foo {
    const ENTITY_ID: EntityId = EntityId(1);

    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(Record::new()
            .with(ID, self.id)
            .with(Self::TEXT.id(), self.text.as_str())
            .with(Self::NUMBER.id(), self.number)
            .with(Self::LONG.id(), self.long)
            .with(Self::SCORE.id(), self.score)
            .with(Self::FLAG.id(), self.flag)
            .with(Self::TAGS.id(), self.tags.clone())
            .with(Self::BLOB.id(), self.blob.clone())
            .with(Self::CREATED.id(), self.created)
            .to_bytes()?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let record = Record::from_bytes(bytes)?;
        Ok(Self {
            id: record.object_id(ID),
            text: record
                .get_str(Self::TEXT.id())
                .unwrap_or_default()
                .to_string(),
            number: record
                .get_i64(Self::NUMBER.id())
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or_default(),
            long: record.get_i64(Self::LONG.id()).unwrap_or_default(),
            score: record.get_f64(Self::SCORE.id()).unwrap_or_default(),
            flag: record.get_bool(Self::FLAG.id()).unwrap_or_default(),
            tags: record
                .get_strings(Self::TAGS.id())
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            blob: record
                .get_bytes(Self::BLOB.id())
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
            created: record.get_i64(Self::CREATED.id()).unwrap_or_default(),
        })
    }
}

/// A named point, searchable by nearest neighbour.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct City {
    /// Object id.
    pub id: ObjectId,
    /// Name.
    pub name: String,
    /// 2-d location.
    pub location: Vec<f32>,
}

impl City {
    /// `name`
    pub const NAME: Property<City, StringKind> = Property::new(PropertyId(2));
    /// `location`, indexed with squared euclidean distance.
    pub const LOCATION: Property<City, FloatVectorKind> = Property::new(PropertyId(3));

    /// Creates an unsaved city.
    pub fn new(name: &str, x: f32, y: f32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            location: vec![x, y],
        }
    }
}

impl EntityCodec for City {
    const ENTITY_ID: EntityId = EntityId(2);

    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(Record::new()
            .with(ID, self.id)
            .with(Self::NAME.id(), self.name.as_str())
            .with(Self::LOCATION.id(), self.location.clone())
            .to_bytes()?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let record = Record::from_bytes(bytes)?;
        Ok(Self {
            id: record.object_id(ID),
            name: record
                .get_str(Self::NAME.id())
                .unwrap_or_default()
                .to_string(),
            location: record
                .get_floats(Self::LOCATION.id())
                .map(<[f32]>::to_vec)
                .unwrap_or_default(),
        })
    }
}

/// Target of [`Book::AUTHOR`]; keeps its favorite books in
/// [`Author::FAVORITES`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Author {
    /// Object id.
    pub id: ObjectId,
    /// Name.
    pub name: String,
}

impl Author {
    /// `name`
    pub const NAME: Property<Author, StringKind> = Property::new(PropertyId(2));
    /// `favorites`, a standalone relation to [`Book`].
    pub const FAVORITES: RelationStandalone<Author, Book> =
        RelationStandalone::new(RelationId(1));

    /// Creates an unsaved author.
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
        }
    }
}

impl EntityCodec for Author {
    const ENTITY_ID: EntityId = EntityId(3);

    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(Record::new()
            .with(ID, self.id)
            .with(Self::NAME.id(), self.name.as_str())
            .to_bytes()?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let record = Record::from_bytes(bytes)?;
        Ok(Self {
            id: record.object_id(ID),
            name: record
                .get_str(Self::NAME.id())
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// A book with a to-one relation to its [`Author`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Book {
    /// Object id.
    pub id: ObjectId,
    /// Title.
    pub title: String,
    /// Author id, 0 if none.
    pub author: ObjectId,
    /// Publication year.
    pub year: i32,
}

impl Book {
    /// `title`
    pub const TITLE: Property<Book, StringKind> = Property::new(PropertyId(2));
    /// `author`
    pub const AUTHOR: Property<Book, RelationKind<Author>> = Property::new(PropertyId(3));
    /// `year`
    pub const YEAR: Property<Book, IntKind> = Property::new(PropertyId(4));

    /// Creates an unsaved book.
    pub fn new(title: &str, author: ObjectId, year: i32) -> Self {
        Self {
            id: 0,
            title: title.to_string(),
            author,
            year,
        }
    }
}

impl EntityCodec for Book {
    const ENTITY_ID: EntityId = EntityId(4);

    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(Record::new()
            .with(ID, self.id)
            .with(Self::TITLE.id(), self.title.as_str())
            .with(Self::AUTHOR.id(), self.author)
            .with(Self::YEAR.id(), self.year)
            .to_bytes()?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let record = Record::from_bytes(bytes)?;
        Ok(Self {
            id: record.object_id(ID),
            title: record
                .get_str(Self::TITLE.id())
                .unwrap_or_default()
                .to_string(),
            author: record.object_id(Self::AUTHOR.id()),
            year: record
                .get_i64(Self::YEAR.id())
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or_default(),
        })
    }
}

/// The model of all fixture entities.
pub fn model() -> Model {
    Model::builder()
        .entity(Foo::ENTITY_ID, "Foo")
        .id_property(ID, "id")
        .property(Foo::TEXT.id(), "text", PropertyType::String)
        .property(Foo::NUMBER.id(), "number", PropertyType::Int)
        .property(Foo::LONG.id(), "long", PropertyType::Long)
        .property(Foo::SCORE.id(), "score", PropertyType::Double)
        .property(Foo::FLAG.id(), "flag", PropertyType::Bool)
        .property(Foo::TAGS.id(), "tags", PropertyType::StringVector)
        .property(Foo::BLOB.id(), "blob", PropertyType::ByteVector)
        .property(Foo::CREATED.id(), "created", PropertyType::Date)
        .entity(City::ENTITY_ID, "City")
        .id_property(ID, "id")
        .property(City::NAME.id(), "name", PropertyType::String)
        .property(City::LOCATION.id(), "location", PropertyType::FloatVector)
        .vector_index(2, DistanceType::Euclidean)
        .entity(Author::ENTITY_ID, "Author")
        .id_property(ID, "id")
        .property(Author::NAME.id(), "name", PropertyType::String)
        .standalone_relation(Author::FAVORITES.id(), "favorites", Book::ENTITY_ID)
        .entity(Book::ENTITY_ID, "Book")
        .id_property(ID, "id")
        .property(Book::TITLE.id(), "title", PropertyType::String)
        .relation(Book::AUTHOR.id(), "author", Author::ENTITY_ID)
        .property(Book::YEAR.id(), "year", PropertyType::Int)
        .build()
        .expect("fixture model is valid")
}

/// A store over a fresh [`MemoryEngine`] holding the fixture [`model`].
///
/// Derefs to [`Store`]; the engine stays reachable for its counters.
pub struct TestStore {
    /// The engine under the store.
    pub engine: Arc<MemoryEngine>,
    /// The store.
    pub store: Store,
}

impl TestStore {
    /// Opens a store with default options.
    pub fn new() -> Self {
        Self::with_options(|options| options)
    }

    /// Opens a store with options adjusted by `configure`.
    pub fn with_options(configure: impl FnOnce(Options) -> Options) -> Self {
        let engine = Arc::new(MemoryEngine::new());
        let store = Store::open(engine.clone(), configure(Options::new(model())))
            .expect("Failed to open test store");
        Self { engine, store }
    }

    /// Engine counters at this point.
    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Puts `cities` and returns their ids in order.
pub fn put_cities(store: &Store, cities: &[(&str, f32, f32)]) -> Vec<ObjectId> {
    let mut objects: Vec<City> = cities
        .iter()
        .map(|(name, x, y)| City::new(name, *x, *y))
        .collect();
    store
        .entity_box::<City>()
        .put_many(&mut objects)
        .expect("Failed to put cities")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foo_codec_keeps_all_fields() {
        let store = TestStore::new();
        let foos = store.entity_box::<Foo>();
        let mut foo = Foo {
            id: 0,
            text: "t".into(),
            number: -3,
            long: 1 << 40,
            score: 2.5,
            flag: true,
            tags: vec!["a".into(), "b".into()],
            blob: vec![1, 2, 3],
            created: 1_700_000_000_000,
        };
        let id = foos.put(&mut foo).unwrap();
        assert_eq!(foos.get(id).unwrap(), Some(foo));
    }

    #[test]
    fn book_keeps_author() {
        let store = TestStore::new();
        let author = store
            .entity_box::<Author>()
            .put(&mut Author::new("Le Guin"))
            .unwrap();
        let books = store.entity_box::<Book>();
        let id = books
            .put(&mut Book::new("The Dispossessed", author, 1974))
            .unwrap();
        assert_eq!(books.get(id).unwrap().unwrap().author, author);
    }

    #[test]
    fn model_resolves_names() {
        let store = TestStore::new();
        assert_eq!(store.entity_id("City").unwrap(), Some(City::ENTITY_ID));
        assert_eq!(
            store.property_id(Book::ENTITY_ID, "author").unwrap(),
            Some(Book::AUTHOR.id())
        );
    }
}
