//! Engine counters.
//!
//! Every native resource acquisition and release is counted, so callers can
//! check that handles are released exactly once and that lowering issued the
//! expected combine calls.

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct EngineStats {
    stores_opened: AtomicU64,
    stores_closed: AtomicU64,

    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    transactions_closed: AtomicU64,

    cursors_opened: AtomicU64,
    cursors_closed: AtomicU64,

    builders_opened: AtomicU64,
    builders_closed: AtomicU64,
    conditions_registered: AtomicU64,
    combine_all_calls: AtomicU64,
    combine_any_calls: AtomicU64,

    queries_built: AtomicU64,
    queries_closed: AtomicU64,

    async_enqueued: AtomicU64,
    async_rejected: AtomicU64,
    async_failed: AtomicU64,

    invalid_releases: AtomicU64,
}

macro_rules! counters {
    ($($field:ident => $record:ident),* $(,)?) => {
        impl EngineStats {
            $(
                pub(crate) fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Returns a snapshot of all counters.
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }

        /// A point-in-time copy of [`EngineStats`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        #[allow(missing_docs)]
        pub struct StatsSnapshot {
            $(pub $field: u64,)*
        }
    };
}

counters! {
    stores_opened => record_store_open,
    stores_closed => record_store_close,
    transactions_begun => record_txn_begin,
    transactions_committed => record_txn_commit,
    transactions_rolled_back => record_txn_rollback,
    transactions_closed => record_txn_close,
    cursors_opened => record_cursor_open,
    cursors_closed => record_cursor_close,
    builders_opened => record_builder_open,
    builders_closed => record_builder_close,
    conditions_registered => record_condition,
    combine_all_calls => record_combine_all,
    combine_any_calls => record_combine_any,
    queries_built => record_query_build,
    queries_closed => record_query_close,
    async_enqueued => record_async_enqueue,
    async_rejected => record_async_reject,
    async_failed => record_async_failure,
    invalid_releases => record_invalid_release,
}

impl EngineStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsSnapshot {
    /// Transactions begun but not yet closed.
    #[must_use]
    pub const fn open_transactions(&self) -> u64 {
        self.transactions_begun - self.transactions_closed
    }

    /// Cursors opened but not yet closed.
    #[must_use]
    pub const fn open_cursors(&self) -> u64 {
        self.cursors_opened - self.cursors_closed
    }
}
