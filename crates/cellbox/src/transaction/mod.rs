//! Reentrant transactions.
//!
//! The first transaction a thread opens for a store is *top-level* and owns
//! the native transaction. Transactions opened on the same thread while it is
//! active are *inner*: they share the native handle and only record whether
//! they succeeded.
//!
//! ## Commit rules
//!
//! - Only the top-level [`Transaction::success`] commits.
//! - It commits only if every inner write transaction called `success()`;
//!   otherwise the whole transaction is rolled back and `success()` fails
//!   with `IllegalState`.
//! - An inner write transaction inside a top-level read transaction is
//!   rejected with `IllegalState`.
//!
//! Transactions are bound to the thread that opened them (`!Send`).

mod scope;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use cellbox_engine::{EntityId, TxMode};

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::store::Store;

pub(crate) use scope::TxScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Open,
    Closed,
}

/// A read or write transaction.
///
/// Dropping an open transaction closes it; for a top-level write transaction
/// that means rollback.
///
/// # Example
///
/// ```rust
/// # use cellbox::{Options, Store};
/// # use cellbox_engine::{EntityId, Model, PropertyId};
/// # let model = Model::builder()
/// #     .entity(EntityId(1), "Note")
/// #     .id_property(PropertyId(1), "id")
/// #     .build()
/// #     .unwrap();
/// let store = Store::in_memory(Options::new(model)).unwrap();
///
/// let outer = store.tx_write().unwrap();
/// let inner = store.tx_write().unwrap();
/// assert!(outer.is_top_level());
/// assert!(!inner.is_top_level());
///
/// inner.success().unwrap(); // no commit yet
/// outer.success().unwrap(); // commits
/// ```
pub struct Transaction {
    scope: Rc<TxScope>,
    mode: TxMode,
    top_level: bool,
    state: Rc<Cell<State>>,
}

impl Transaction {
    /// Begins a transaction on `store`, joining this thread's active one.
    pub fn begin(store: &Store, mode: TxMode) -> Result<Self> {
        if let Some(scope) = TxScope::active(store) {
            if mode == TxMode::Write && scope.mode == TxMode::Read {
                return Err(Error::illegal_state(
                    "cannot start a write transaction inside a read transaction",
                ));
            }
            scope.enter();
            return Ok(Self {
                scope,
                mode,
                top_level: false,
                state: Rc::new(Cell::new(State::Open)),
            });
        }

        let scope = TxScope::begin(store, mode)?;
        Ok(Self {
            scope,
            mode,
            top_level: true,
            state: Rc::new(Cell::new(State::Open)),
        })
    }

    /// The mode requested for this transaction.
    #[must_use]
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Whether this transaction owns the native transaction.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    /// Whether the transaction can still be used.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.get() == State::Open && self.scope.is_open()
    }

    /// The store this transaction belongs to.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.scope.store
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::illegal_state("transaction is already closed"))
        }
    }

    /// Marks the transaction successful and closes it.
    ///
    /// For the top-level transaction this commits, provided no inner write
    /// transaction was closed without success and none is still open.
    pub fn success(&self) -> Result<()> {
        self.check_open()?;
        if self.mode == TxMode::Read {
            return Err(Error::illegal_state(
                "read transactions cannot be committed",
            ));
        }

        if !self.top_level {
            self.state.set(State::Closed);
            self.scope.leave(true, self.mode);
            return Ok(());
        }

        if self.scope.depth() > 0 {
            return Err(Error::illegal_state(format!(
                "cannot commit while {} inner transaction(s) are still open",
                self.scope.depth()
            )));
        }
        self.state.set(State::Closed);
        if self.scope.is_poisoned() {
            self.scope.close()?;
            tracing::debug!(store = self.store().id(), "transaction rolled back");
            return Err(Error::illegal_state(
                "an inner transaction was closed without success; the transaction was rolled back",
            ));
        }
        self.scope.commit()
    }

    /// Closes the transaction. Closing twice is a no-op.
    ///
    /// Closing a top-level transaction without [`success`](Self::success)
    /// rolls it back; closing an inner write transaction without success
    /// makes the top-level commit fail.
    pub fn close(&self) -> Result<()> {
        if self.state.replace(State::Closed) == State::Closed {
            return Ok(());
        }
        if self.top_level {
            self.scope.close()
        } else {
            self.scope.leave(false, self.mode);
            Ok(())
        }
    }

    /// Opens a cursor for `entity` within this transaction.
    pub fn cursor(&self, entity: EntityId) -> Result<Cursor> {
        self.check_open()?;
        Cursor::open(Rc::clone(&self.scope), Rc::clone(&self.state), entity)
    }

    /// Size of the committed data in bytes.
    pub fn data_size_committed(&self) -> Result<u64> {
        self.check_open()?;
        let (committed, _) = self.engine_data_size()?;
        Ok(committed)
    }

    /// Bytes added (or removed, if negative) by this transaction so far.
    pub fn data_size_change(&self) -> Result<i64> {
        self.check_open()?;
        let (_, change) = self.engine_data_size()?;
        Ok(change)
    }

    fn engine_data_size(&self) -> Result<(u64, i64)> {
        Ok(self
            .store()
            .engine()
            .txn_data_size(self.scope.handle()?)?)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close transaction");
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode)
            .field("top_level", &self.top_level)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use cellbox_engine::{Model, PropertyId, PutMode};

    const ITEM: EntityId = EntityId(1);

    fn store() -> Store {
        let model = Model::builder()
            .entity(ITEM, "Item")
            .id_property(PropertyId(1), "id")
            .build()
            .unwrap();
        Store::in_memory(Options::new(model)).unwrap()
    }

    fn put_one(tx: &Transaction) -> u64 {
        let cursor = tx.cursor(ITEM).unwrap();
        let id = cursor.id_for_put(0).unwrap();
        let bytes = cellbox_engine::Record::new().to_bytes().unwrap();
        cursor.put(id, &bytes, PutMode::Put).unwrap();
        id
    }

    fn count(store: &Store) -> u64 {
        let tx = store.tx_read().unwrap();
        let n = tx.cursor(ITEM).unwrap().count().unwrap();
        tx.close().unwrap();
        n
    }

    #[test]
    fn nested_success_commits_once() {
        let store = store();
        let outer = store.tx_write().unwrap();
        {
            let inner = store.tx_write().unwrap();
            assert!(!inner.is_top_level());
            put_one(&inner);
            inner.success().unwrap();
        }
        outer.success().unwrap();
        assert_eq!(count(&store), 1);
    }

    #[test]
    fn inner_close_without_success_rolls_back() {
        let store = store();
        let outer = store.tx_write().unwrap();
        {
            let inner = store.tx_write().unwrap();
            put_one(&inner);
        }
        let err = outer.success().unwrap_err();
        assert!(matches!(err, Error::IllegalState { .. }));
        assert!(!outer.is_open());
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn commit_with_open_inner_fails() {
        let store = store();
        let outer = store.tx_write().unwrap();
        let inner = store.tx_write().unwrap();
        assert!(matches!(outer.success(), Err(Error::IllegalState { .. })));
        inner.success().unwrap();
        outer.success().unwrap();
    }

    #[test]
    fn write_inside_read_is_rejected() {
        let store = store();
        let read = store.tx_read().unwrap();
        assert!(matches!(store.tx_write(), Err(Error::IllegalState { .. })));
        let nested_read = store.tx_read().unwrap();
        assert!(!nested_read.is_top_level());
        nested_read.close().unwrap();
        read.close().unwrap();
    }

    #[test]
    fn read_success_is_illegal_state() {
        let store = store();
        let read = store.tx_read().unwrap();
        assert!(matches!(read.success(), Err(Error::IllegalState { .. })));
        assert!(read.is_open());
    }

    #[test]
    fn close_is_idempotent() {
        let store = store();
        let tx = store.tx_write().unwrap();
        tx.close().unwrap();
        tx.close().unwrap();
        assert!(matches!(tx.success(), Err(Error::IllegalState { .. })));
        drop(tx);

        // A fresh transaction is top-level again.
        let tx = store.tx_write().unwrap();
        assert!(tx.is_top_level());
    }

    #[test]
    fn data_size_tracks_changes() {
        let store = store();
        let tx = store.tx_write().unwrap();
        assert_eq!(tx.data_size_change().unwrap(), 0);
        put_one(&tx);
        assert!(tx.data_size_change().unwrap() > 0);
        tx.success().unwrap();

        let tx = store.tx_read().unwrap();
        assert!(tx.data_size_committed().unwrap() > 0);
    }
}
