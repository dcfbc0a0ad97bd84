//! Integration tests for query building and execution.

use cellbox::{order_flags, Error, ObjectId};
use cellbox_testkit::prelude::*;

fn numbers_store(numbers: &[i32]) -> TestStore {
    let store = TestStore::new();
    let mut foos: Vec<Foo> = numbers.iter().map(|n| Foo::with_number(*n)).collect();
    store.entity_box::<Foo>().put_many(&mut foos).unwrap();
    store
}

fn numbers(foos: &[Foo]) -> Vec<i32> {
    foos.iter().map(|f| f.number).collect()
}

#[test]
fn limit_and_offset_persist_until_reset() {
    let store = numbers_store(&[1, 2, 3, 4, 5]);
    let mut query = store.query::<Foo>().unwrap().build().unwrap();

    query.limit(2).unwrap();
    assert_eq!(numbers(&query.find().unwrap()), [1, 2]);
    assert_eq!(query.find_ids().unwrap().len(), 2);

    query.offset(3).unwrap();
    assert_eq!(numbers(&query.find().unwrap()), [4, 5]);

    query.limit(0).unwrap().offset(0).unwrap();
    assert_eq!(query.find().unwrap().len(), 5);
}

#[test]
fn count_and_remove_refuse_offset_or_limit() {
    let store = numbers_store(&[1, 2, 3]);
    let mut query = store.query::<Foo>().unwrap().build().unwrap();

    query.limit(1).unwrap();
    assert!(matches!(query.count(), Err(Error::IllegalState { .. })));
    assert!(matches!(query.remove(), Err(Error::IllegalState { .. })));

    query.limit(0).unwrap().offset(1).unwrap();
    assert!(matches!(query.count(), Err(Error::IllegalState { .. })));

    query.offset(0).unwrap();
    assert_eq!(query.count().unwrap(), 3);
    assert_eq!(query.remove().unwrap(), 3);
    assert!(store.entity_box::<Foo>().is_empty().unwrap());
}

#[test]
fn ordering() {
    let store = numbers_store(&[3, 1, 2]);
    let mut builder = store.query::<Foo>().unwrap();
    builder.order(Foo::NUMBER, order_flags::DESCENDING).unwrap();
    let query = builder.build().unwrap();
    assert_eq!(numbers(&query.find().unwrap()), [3, 2, 1]);
    assert_eq!(query.find_first().unwrap().unwrap().number, 3);
}

#[test]
fn find_unique() {
    let store = numbers_store(&[1, 2, 2]);
    let foos = store.entity_box::<Foo>();

    let one = foos.query_with(&Foo::NUMBER.equals(1)).unwrap();
    assert_eq!(one.find_unique().unwrap().unwrap().number, 1);

    let none = foos.query_with(&Foo::NUMBER.equals(9)).unwrap();
    assert_eq!(none.find_unique().unwrap(), None);
    assert_eq!(none.find_first().unwrap(), None);

    let two = foos.query_with(&Foo::NUMBER.equals(2)).unwrap();
    assert!(two.find_unique().is_err());
}

#[test]
fn visit_stops_early() {
    let store = numbers_store(&[1, 2, 3, 4]);
    let query = store.query::<Foo>().unwrap().build().unwrap();
    let mut seen = Vec::new();
    query
        .visit(|foo| {
            seen.push(foo.number);
            seen.len() < 2
        })
        .unwrap();
    assert_eq!(seen, [1, 2]);
}

#[test]
fn nearest_neighbors_order_by_score() {
    let store = TestStore::new();
    let ids = put_cities(&store, &[("five", 5.0, 0.0), ("one", 1.0, 0.0), ("three", 3.0, 0.0)]);

    let mut builder = store.query::<City>().unwrap();
    builder
        .nearest_neighbors(City::LOCATION, &[0.0, 0.0], 10)
        .unwrap();
    let query = builder.build().unwrap();

    assert_eq!(query.find_ids_by_score().unwrap(), [ids[1], ids[2], ids[0]]);
    let scored = query.find_with_scores().unwrap();
    let names: Vec<&str> = scored.iter().map(|(c, _)| c.name.as_str()).collect();
    assert_eq!(names, ["one", "three", "five"]);
    let scores: Vec<f64> = scored.iter().map(|(_, s)| *s).collect();
    assert_eq!(scores, [1.0, 9.0, 25.0]);

    let mut visited = Vec::new();
    query
        .visit_with_score(|city, score| {
            visited.push((city.name, score));
            true
        })
        .unwrap();
    assert_eq!(visited.len(), 3);
}

#[test]
fn nearest_neighbors_parameters() {
    let store = TestStore::new();
    let ids = put_cities(&store, &[("a", 0.0, 0.0), ("b", 10.0, 0.0), ("c", 20.0, 0.0)]);
    let mut query = store
        .entity_box::<City>()
        .query_with(&City::LOCATION.nearest_neighbors(&[0.0, 0.0], 1))
        .unwrap();
    assert_eq!(query.find_ids_by_score().unwrap(), [ids[0]]);

    query.set_parameter_vector(City::LOCATION, &[19.0, 0.0]).unwrap();
    assert_eq!(query.find_ids_by_score().unwrap(), [ids[2]]);

    query.set_parameter_max_neighbors(City::LOCATION, 2).unwrap();
    assert_eq!(query.find_ids_by_score().unwrap(), [ids[2], ids[1]]);
}

#[test]
fn parameters_change_a_built_query() {
    let store = numbers_store(&[1, 5, 10]);
    let foos = store.entity_box::<Foo>();

    let mut query = foos.query_with(&Foo::NUMBER.greater_than(4)).unwrap();
    assert_eq!(query.count().unwrap(), 2);
    query.set_parameter_int(Foo::NUMBER, 7).unwrap();
    assert_eq!(query.count().unwrap(), 1);

    let mut range = foos.query_with(&Foo::NUMBER.between(0, 2)).unwrap();
    range.set_parameters_int(Foo::NUMBER, 4, 10).unwrap();
    assert_eq!(numbers(&range.find().unwrap()), [5, 10]);

    let mut set = foos.query_with(&Foo::NUMBER.one_of(&[1])).unwrap();
    set.set_parameter_values(Foo::NUMBER, &[1, 10]).unwrap();
    assert_eq!(set.count().unwrap(), 2);

    let description = set.describe_parameters().unwrap();
    assert!(!description.is_empty());
}

#[test]
fn string_parameters() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();
    for text in ["apple", "banana", "cherry"] {
        foos.put(&mut Foo::with_text(text)).unwrap();
    }

    let mut query = foos.query_with(&Foo::TEXT.starts_with("a", true)).unwrap();
    assert_eq!(query.count().unwrap(), 1);
    query.set_parameter_string(Foo::TEXT, "ch").unwrap();
    assert_eq!(query.find().unwrap()[0].text, "cherry");

    let mut set = foos.query_with(&Foo::TEXT.one_of(&["apple"], true)).unwrap();
    set.set_parameter_strings(Foo::TEXT, &["banana", "cherry"]).unwrap();
    assert_eq!(set.count().unwrap(), 2);
}

#[test]
fn ambiguous_parameter_is_rejected() {
    let store = numbers_store(&[1, 2, 3]);
    let condition = Foo::NUMBER.greater_than(1) & Foo::NUMBER.less_than(3);
    let mut query = store.entity_box::<Foo>().query_with(&condition).unwrap();
    assert!(query.set_parameter_int(Foo::NUMBER, 0).is_err());
    assert!(query.set_parameter_int(Foo::LONG, 0).is_err());
    assert_eq!(query.count().unwrap(), 1);
}

#[test]
fn clones_are_independent() {
    let store = numbers_store(&[1, 5, 10]);
    let mut query = store
        .entity_box::<Foo>()
        .query_with(&Foo::NUMBER.greater_than(0))
        .unwrap();
    query.limit(1).unwrap();

    let mut clone = query.try_clone().unwrap();
    assert_eq!(clone.find().unwrap().len(), 1);

    clone.limit(0).unwrap();
    clone.set_parameter_int(Foo::NUMBER, 4).unwrap();
    assert_eq!(clone.count().unwrap(), 2);
    assert_eq!(numbers(&query.find().unwrap()), [1]);
}

#[test]
fn builder_errors_are_sticky() {
    let store = TestStore::new();
    let mut builder = store.query::<Foo>().unwrap();

    let err = builder.with(&City::NAME.equals("x", true)).unwrap_err();
    assert!(matches!(err, Error::IllegalArgument { .. }));
    assert!(builder.with(&Foo::NUMBER.equals(1)).is_err());
    assert!(builder.order(Foo::NUMBER, 0).is_err());
    assert_eq!(builder.error(), Some(err.clone()));
    assert_eq!(builder.build().unwrap_err(), err);
}

fn library(store: &TestStore) -> (ObjectId, ObjectId) {
    let authors = store.entity_box::<Author>();
    let le_guin = authors.put(&mut Author::new("Le Guin")).unwrap();
    let banks = authors.put(&mut Author::new("Banks")).unwrap();
    authors.put(&mut Author::new("Nobody")).unwrap();

    let mut books = vec![
        Book::new("The Dispossessed", le_guin, 1974),
        Book::new("The Lathe of Heaven", le_guin, 1971),
        Book::new("Excession", banks, 1996),
        Book::new("Anonymous", 0, 2001),
    ];
    store.entity_box::<Book>().put_many(&mut books).unwrap();
    (le_guin, banks)
}

#[test]
fn link_filters_by_target() {
    let store = TestStore::new();
    library(&store);

    let mut builder = store.query::<Book>().unwrap();
    let mut author = builder.link(Book::AUTHOR).unwrap();
    assert!(!author.is_root());
    author.with(&Author::NAME.equals("le guin", false)).unwrap();
    assert!(matches!(author.build(), Err(Error::IllegalState { .. })));
    drop(author);

    let query = builder.build().unwrap();
    let mut titles: Vec<String> = query.find().unwrap().into_iter().map(|b| b.title).collect();
    titles.sort();
    assert_eq!(titles, ["The Dispossessed", "The Lathe of Heaven"]);
}

#[test]
fn backlink_filters_by_source() {
    let store = TestStore::new();
    let (_, banks) = library(&store);

    let mut builder = store.query::<Author>().unwrap();
    builder
        .backlink(Book::AUTHOR)
        .unwrap()
        .with(&Book::YEAR.greater_than(1990))
        .unwrap();
    let query = builder.build().unwrap();
    assert_eq!(query.find_ids().unwrap(), [banks]);
}

#[test]
fn relation_count() {
    let store = TestStore::new();
    let (le_guin, _) = library(&store);

    let mut builder = store.query::<Author>().unwrap();
    builder.relation_count(Book::AUTHOR, 2).unwrap();
    assert_eq!(builder.build().unwrap().find_ids().unwrap(), [le_guin]);

    let mut builder = store.query::<Author>().unwrap();
    builder.relation_count(Book::AUTHOR, 0).unwrap();
    let names: Vec<String> = builder
        .build()
        .unwrap()
        .find()
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, ["Nobody"]);
}

#[test]
fn relation_conditions() {
    let store = TestStore::new();
    let (le_guin, banks) = library(&store);
    let books = store.entity_box::<Book>();

    let by_le_guin = books.query_with(&Book::AUTHOR.equals(le_guin)).unwrap();
    assert_eq!(by_le_guin.count().unwrap(), 2);
    let either = books
        .query_with(&Book::AUTHOR.one_of(&[le_guin, banks]))
        .unwrap();
    assert_eq!(either.count().unwrap(), 3);
}

#[test]
fn closing_twice_releases_once() {
    let store = numbers_store(&[1]);
    let builder = store.query::<Foo>().unwrap();
    let query = builder.build().unwrap();
    builder.close().unwrap();
    builder.close().unwrap();
    query.close().unwrap();
    query.close().unwrap();
    assert!(matches!(query.find(), Err(Error::IllegalState { .. })));
    drop(query);
    drop(builder);
    assert_eq!(store.stats().invalid_releases, 0);
    assert_eq!(store.stats().builders_opened, store.stats().builders_closed);
}

#[test]
fn closed_store_shuts_queries_down() {
    let store = numbers_store(&[1, 2]);
    let query = store.query::<Foo>().unwrap().build().unwrap();
    let foos = store.entity_box::<Foo>();
    store.close().unwrap();
    store.close().unwrap();

    assert!(matches!(query.find(), Err(Error::ShuttingDown { .. })));
    assert!(matches!(foos.count(), Err(Error::ShuttingDown { .. })));
    assert!(matches!(store.query::<Foo>(), Err(Error::ShuttingDown { .. })));
}
