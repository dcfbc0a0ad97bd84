//! Integration tests for reentrant transactions, listeners and handle
//! lifetimes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use cellbox::{EntityCodec, EntityId, Error, Result, TxMode};
use cellbox_testkit::prelude::*;

#[test]
fn inner_success_does_not_commit() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();

    let outer = store.tx_write().unwrap();
    let inner = store.tx_write().unwrap();
    assert!(outer.is_top_level());
    assert!(!inner.is_top_level());

    foos.put(&mut Foo::with_number(1)).unwrap();
    inner.success().unwrap();
    assert_eq!(store.stats().transactions_committed, 0);

    outer.close().unwrap();
    assert_eq!(foos.count().unwrap(), 0);
    assert_eq!(store.stats().open_transactions(), 0);
}

#[test]
fn outer_success_commits_nested_work() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();

    let outer = store.tx_write().unwrap();
    {
        let inner = store.tx_write().unwrap();
        foos.put(&mut Foo::with_number(1)).unwrap();
        inner.success().unwrap();
    }
    foos.put(&mut Foo::with_number(2)).unwrap();
    outer.success().unwrap();

    assert_eq!(foos.count().unwrap(), 2);
    assert_eq!(store.stats().transactions_committed, 1);
}

#[test]
fn failed_inner_poisons_outer() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();

    let outer = store.tx_write().unwrap();
    let inner = store.tx_write().unwrap();
    foos.put(&mut Foo::with_number(1)).unwrap();
    inner.close().unwrap();

    assert!(matches!(outer.success(), Err(Error::IllegalState { .. })));
    assert_eq!(foos.count().unwrap(), 0);
    assert_eq!(store.stats().open_transactions(), 0);
}

#[test]
fn outer_cannot_commit_over_open_inner() {
    let store = TestStore::new();
    let outer = store.tx_write().unwrap();
    let inner = store.tx_write().unwrap();
    assert!(matches!(outer.success(), Err(Error::IllegalState { .. })));
    inner.success().unwrap();
    outer.success().unwrap();
}

#[test]
fn read_transactions() {
    let store = TestStore::new();
    let read = store.tx_read().unwrap();
    assert!(matches!(
        store.tx(TxMode::Write),
        Err(Error::IllegalState { .. })
    ));
    assert!(matches!(read.success(), Err(Error::IllegalState { .. })));
    read.close().unwrap();

    let write = store.tx_write().unwrap();
    let nested_read = store.tx_read().unwrap();
    nested_read.close().unwrap();
    write.success().unwrap();
}

#[test]
fn run_in_tx_helpers() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();

    let id = store
        .run_in_write_tx(|_| foos.put(&mut Foo::with_number(1)))
        .unwrap();
    let number = store
        .run_in_read_tx(|_| Ok(foos.get(id)?.map(|f| f.number)))
        .unwrap();
    assert_eq!(number, Some(1));

    let failed: Result<()> = store.run_in_write_tx(|_| {
        foos.put(&mut Foo::with_number(2))?;
        Err(Error::illegal_argument("abort"))
    });
    assert!(failed.is_err());
    assert_eq!(foos.count().unwrap(), 1);
}

#[test]
fn cursors_inside_transactions() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();
    foos.put(&mut Foo::with_number(1)).unwrap();

    let tx = store.tx_read().unwrap();
    let cursor = tx.cursor(Foo::ENTITY_ID).unwrap();
    assert_eq!(cursor.count().unwrap(), 1);
    assert!(cursor.first().unwrap().is_some());
    assert!(cursor.next().unwrap().is_none());
    cursor.close().unwrap();
    cursor.close().unwrap();
    tx.close().unwrap();
    tx.close().unwrap();

    assert!(matches!(tx.cursor(EntityId(1)), Err(Error::IllegalState { .. })));
    let stats = store.stats();
    assert_eq!(stats.open_cursors(), 0);
    assert_eq!(stats.open_transactions(), 0);
    assert_eq!(stats.invalid_releases, 0);
}

#[test]
fn dropping_releases_everything_once() {
    let store = TestStore::new();
    {
        let tx = store.tx_write().unwrap();
        let _cursor = tx.cursor(EntityId(1)).unwrap();
        let _inner = store.tx_write().unwrap();
    }
    {
        let builder = store.query::<Foo>().unwrap();
        let query = builder.build().unwrap();
        query.close().unwrap();
    }
    let stats = store.stats();
    assert_eq!(stats.open_transactions(), 0);
    assert_eq!(stats.open_cursors(), 0);
    assert_eq!(stats.queries_built, stats.queries_closed);
    assert_eq!(stats.invalid_releases, 0);
}

#[test]
fn change_listener_sees_committed_entities() {
    let store = TestStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store
        .set_change_listener(move |ids| sink.lock().unwrap().extend_from_slice(ids))
        .unwrap();

    store
        .run_in_write_tx(|_| {
            store.entity_box::<Foo>().put(&mut Foo::with_number(1))?;
            store.entity_box::<Author>().put(&mut Author::new("a"))?;
            Ok(())
        })
        .unwrap();

    let mut ids = seen.lock().unwrap().clone();
    ids.sort();
    assert_eq!(ids, [EntityId(1), EntityId(3)]);
}

#[test]
fn change_listener_swap_and_remove() {
    let store = TestStore::new();
    let foos = store.entity_box::<Foo>();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&first);
    store
        .set_change_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    foos.put(&mut Foo::with_number(1)).unwrap();

    let counter = Arc::clone(&second);
    store
        .set_change_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    foos.put(&mut Foo::with_number(2)).unwrap();

    store.remove_change_listener().unwrap();
    store.remove_change_listener().unwrap();
    foos.put(&mut Foo::with_number(3)).unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(store.stats().invalid_releases, 0);
}

#[test]
fn listener_can_remove_itself() {
    let store = TestStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (inner, counter) = (store.store.clone(), Arc::clone(&calls));
    store
        .set_change_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.remove_change_listener().unwrap();
        })
        .unwrap();

    let (done, finished) = mpsc::channel();
    let writer = store.store.clone();
    std::thread::spawn(move || {
        let foos = writer.entity_box::<Foo>();
        let result = foos
            .put(&mut Foo::with_number(1))
            .and_then(|_| foos.put(&mut Foo::with_number(2)));
        let _ = done.send(result.map(|_| ()));
    });
    finished
        .recv_timeout(Duration::from_secs(5))
        .expect("commit blocked by its own listener")
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.stats().invalid_releases, 0);
}

#[test]
fn closed_store_rejects_transactions() {
    let store = TestStore::new();
    store.close().unwrap();
    assert!(!store.is_open());
    assert!(matches!(store.tx_read(), Err(Error::ShuttingDown { .. })));
    assert!(matches!(
        store.entity_box::<Foo>().put(&mut Foo::default()),
        Err(Error::ShuttingDown { .. })
    ));
}

#[test]
fn transactions_are_per_thread() {
    let store = TestStore::new();
    let outer = store.tx_write().unwrap();
    let shared = store.store.clone();
    let handle = std::thread::spawn(move || shared.tx_read().map(|tx| tx.is_top_level()));
    outer.success().unwrap();
    assert!(handle.join().unwrap().unwrap());
}
