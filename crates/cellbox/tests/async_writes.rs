//! Integration tests for queued writes.

use std::time::Duration;

use cellbox::{AsyncBox, Error};
use cellbox_testkit::prelude::*;

#[test]
fn ids_are_reserved_before_the_write_lands() {
    let store = TestStore::new();
    let async_foos = store.async_box::<Foo>().unwrap();

    let mut objects: Vec<Foo> = (1..=3).map(Foo::with_number).collect();
    let ids: Vec<_> = objects
        .iter_mut()
        .map(|foo| async_foos.put(foo).unwrap())
        .collect();
    assert!(ids.iter().all(|id| *id != 0));
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(objects.iter().map(|f| f.id).collect::<Vec<_>>(), ids);

    assert!(async_foos.await_completion());
    let stored = store.entity_box::<Foo>().get_many(&ids).unwrap();
    assert!(stored.iter().all(Option::is_some));

    // A synchronous put after the queued ones does not reuse their ids.
    let next = store.entity_box::<Foo>().put(&mut Foo::default()).unwrap();
    assert!(next > ids[2]);
}

#[test]
fn full_queue_rejects() {
    let store = TestStore::with_options(|options| {
        options
            .async_max_queue_length(1)
            .async_enqueue_timeout(Duration::from_millis(10))
    });
    let async_foos = store.async_box::<Foo>().unwrap();

    // Hold the writer so the queue cannot drain.
    let tx = store.tx_write().unwrap();
    let mut rejected = None;
    for n in 0..10 {
        if let Err(err) = async_foos.put(&mut Foo::with_number(n)) {
            rejected = Some(err);
            break;
        }
    }
    assert!(matches!(rejected, Some(Error::Rejected { .. })));
    assert!(store.stats().async_rejected >= 1);
    tx.close().unwrap();

    assert!(async_foos.await_completion());
    let stored = store.entity_box::<Foo>().count().unwrap();
    assert!(stored >= 1);
}

#[test]
fn owned_box_uses_its_own_timeout() {
    let store = TestStore::with_options(|options| options.async_max_queue_length(1));
    let async_foos = AsyncBox::<Foo>::with_timeout(&store, Duration::from_millis(5)).unwrap();

    let tx = store.tx_write().unwrap();
    let rejected = (0..10).any(|n| {
        matches!(
            async_foos.put(&mut Foo::with_number(n)),
            Err(Error::Rejected { .. })
        )
    });
    assert!(rejected);
    tx.close().unwrap();

    assert!(async_foos.await_submitted());
    async_foos.close().unwrap();
    async_foos.close().unwrap();
    drop(async_foos);
    assert_eq!(store.stats().invalid_releases, 0);
}

#[test]
fn queued_removes() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();
    let id = foos.put(&mut Foo::with_number(1)).unwrap();

    let async_foos = foos.async_box().unwrap();
    async_foos.remove(id).unwrap();
    assert!(async_foos.await_completion());
    assert!(!foos.contains(id).unwrap());
}

#[test]
fn closing_store_stops_the_queue() {
    let store = TestStore::new();
    let async_foos = store.async_box::<Foo>().unwrap();
    async_foos.put(&mut Foo::with_number(1)).unwrap();
    store.close().unwrap();

    assert!(!async_foos.await_completion());
    assert!(matches!(
        async_foos.put(&mut Foo::default()),
        Err(Error::ShuttingDown { .. })
    ));
}
