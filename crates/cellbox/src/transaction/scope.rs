//! Per-thread transaction scopes.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use cellbox_engine::{TxMode, TxnHandle};

use crate::error::{Error, Result};
use crate::handle::{ResourceHandle, TxnKind};
use crate::store::Store;

thread_local! {
    static ACTIVE: RefCell<HashMap<u64, Weak<TxScope>>> = RefCell::new(HashMap::new());
}

/// One native transaction and the bookkeeping of the transactions nested in
/// it on the current thread.
#[derive(Debug)]
pub(crate) struct TxScope {
    pub store: Store,
    pub mode: TxMode,
    handle: ResourceHandle<TxnKind>,
    /// Open inner transactions.
    depth: Cell<usize>,
    /// An inner write transaction was closed without success.
    poisoned: Cell<bool>,
}

impl TxScope {
    /// Returns the scope open on this thread for `store`, if any.
    pub fn active(store: &Store) -> Option<Rc<TxScope>> {
        ACTIVE.with(|active| {
            active
                .borrow()
                .get(&store.id())
                .and_then(Weak::upgrade)
                .filter(|scope| scope.is_open())
        })
    }

    /// Begins a native transaction and makes it this thread's scope for the
    /// store.
    pub fn begin(store: &Store, mode: TxMode) -> Result<Rc<TxScope>> {
        let raw = store.engine().txn_begin(store.handle()?, mode)?;
        let scope = Rc::new(TxScope {
            store: store.clone(),
            mode,
            handle: ResourceHandle::new(store.engine().clone(), raw),
            depth: Cell::new(0),
            poisoned: Cell::new(false),
        });
        ACTIVE.with(|active| {
            active
                .borrow_mut()
                .insert(store.id(), Rc::downgrade(&scope));
        });
        tracing::trace!(store = store.id(), txn = %raw, %mode, "transaction begun");
        Ok(scope)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// The native handle; `IllegalState` once the scope was closed.
    pub fn handle(&self) -> Result<TxnHandle> {
        self.handle
            .get()
            .map_err(|_| Error::illegal_state("transaction is already closed"))
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn enter(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    pub fn leave(&self, succeeded: bool, mode: TxMode) {
        self.depth.set(self.depth.get().saturating_sub(1));
        if !succeeded && mode == TxMode::Write {
            self.poisoned.set(true);
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.get()
    }

    /// Commits and releases the native transaction.
    pub fn commit(&self) -> Result<()> {
        let Some(raw) = self.handle.forget() else {
            return Err(Error::illegal_state("transaction is already closed"));
        };
        self.deactivate();
        // The engine releases the transaction whether or not the commit
        // succeeds.
        self.store.engine().txn_success(raw)?;
        tracing::trace!(store = self.store.id(), txn = %raw, "transaction committed");
        Ok(())
    }

    /// Releases the native transaction, rolling back uncommitted writes.
    pub fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.deactivate();
        self.handle.close()
    }

    fn deactivate(&self) {
        let _ = ACTIVE.try_with(|active| {
            let mut active = active.borrow_mut();
            let is_self = active
                .get(&self.store.id())
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), self));
            if is_self {
                active.remove(&self.store.id());
            }
        });
    }
}
