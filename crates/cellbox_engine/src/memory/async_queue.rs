//! Bounded async write queue with a single worker thread per store.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{self, NativeError, NativeResult};
use crate::memory::store::StoreState;
use crate::stats::EngineStats;
use crate::types::{EntityId, ObjectId, PutMode};

/// Operations processed per write transaction.
const MAX_BATCH: usize = 64;

/// A queued write.
#[derive(Debug)]
pub(crate) enum AsyncOp {
    Put {
        entity: EntityId,
        id: ObjectId,
        bytes: Vec<u8>,
        mode: PutMode,
    },
    Remove {
        entity: EntityId,
        id: ObjectId,
    },
}

#[derive(Debug, Default)]
struct QueueState {
    ops: VecDeque<AsyncOp>,
    submitted: u64,
    processed: u64,
    failures: u64,
    busy: bool,
    shutdown: bool,
}

pub(crate) struct AsyncQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
    capacity: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
            capacity,
            worker: Mutex::new(None),
        }
    }

    /// Enqueues an operation, waiting up to `timeout` for queue space.
    pub fn enqueue(
        &self,
        store: &Arc<StoreState>,
        stats: &Arc<EngineStats>,
        op: AsyncOp,
        timeout: Duration,
    ) -> NativeResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(NativeError::shutting_down("async queue is shutting down"));
            }
            if state.ops.len() < self.capacity {
                break;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out()
                && state.ops.len() >= self.capacity
                && !state.shutdown
            {
                stats.record_async_reject();
                return Err(NativeError::new(
                    error::TIMEOUT,
                    format!("async queue is full ({} operations)", self.capacity),
                ));
            }
        }
        state.ops.push_back(op);
        state.submitted += 1;
        drop(state);

        self.ensure_worker(store, stats)?;
        stats.record_async_enqueue();
        self.changed.notify_all();
        Ok(())
    }

    fn ensure_worker(&self, store: &Arc<StoreState>, stats: &Arc<EngineStats>) -> NativeResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let store = Arc::clone(store);
        let stats = Arc::clone(stats);
        let handle = std::thread::Builder::new()
            .name(format!("cellbox-async-{}", store.id))
            .spawn(move || run_worker(&store, &stats))
            .map_err(|e| NativeError::new(error::GENERAL, format!("cannot start async worker: {e}")))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Blocks until the queue is empty and the worker idle.
    pub fn await_completion(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return false;
            }
            if state.ops.is_empty() && !state.busy {
                break;
            }
            self.changed.wait(&mut state);
        }
        std::mem::take(&mut state.failures) == 0
    }

    /// Blocks until everything submitted before the call is processed.
    pub fn await_submitted(&self) -> bool {
        let mut state = self.state.lock();
        let target = state.submitted;
        loop {
            if state.shutdown {
                return false;
            }
            if state.processed >= target {
                break;
            }
            self.changed.wait(&mut state);
        }
        std::mem::take(&mut state.failures) == 0
    }

    /// Stops accepting work and wakes all waiters. The worker drains what
    /// is already queued.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.changed.notify_all();
    }

    /// Waits for the worker thread to exit.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("async worker panicked");
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().ops.len()
    }
}

fn run_worker(store: &Arc<StoreState>, stats: &EngineStats) {
    let queue = &store.queue;
    loop {
        let batch: Vec<AsyncOp> = {
            let mut state = queue.state.lock();
            while state.ops.is_empty() {
                if state.shutdown {
                    return;
                }
                queue.changed.wait(&mut state);
            }
            state.busy = true;
            let n = state.ops.len().min(MAX_BATCH);
            state.ops.drain(..n).collect()
        };
        queue.changed.notify_all();

        let failures = apply_batch(store, stats, &batch);

        let mut state = queue.state.lock();
        state.processed += batch.len() as u64;
        state.failures += failures;
        state.busy = false;
        drop(state);
        queue.changed.notify_all();
    }
}

fn apply_batch(store: &StoreState, stats: &EngineStats, batch: &[AsyncOp]) -> u64 {
    let base = match store.begin_write(true) {
        Ok(base) => base,
        Err(e) => {
            tracing::warn!(store = store.id, error = %e, "async batch dropped");
            for _ in batch {
                stats.record_async_failure();
            }
            return batch.len() as u64;
        }
    };

    let mut data = (*base).clone();
    let mut changed = BTreeSet::new();
    let mut failures = 0;
    for op in batch {
        let result = match op {
            AsyncOp::Put {
                entity,
                id,
                bytes,
                mode,
            } => store
                .entity(*entity)
                .and_then(|model| data.put(model, *id, bytes, *mode))
                .map(|()| *entity),
            AsyncOp::Remove { entity, id } => {
                data.remove(*entity, *id);
                Ok(*entity)
            }
        };
        match result {
            Ok(entity) => {
                changed.insert(entity);
            }
            Err(e) => {
                tracing::warn!(store = store.id, error = %e, "async operation failed");
                stats.record_async_failure();
                failures += 1;
            }
        }
    }

    let committed = store.publish(Arc::new(data));
    store.end_write();
    match committed {
        Ok(()) => {
            stats.record_txn_commit();
            store.notify(&changed);
            failures
        }
        Err(e) => {
            tracing::warn!(store = store.id, error = %e, "async batch commit failed");
            stats.record_txn_rollback();
            batch.len() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StoreConfig;
    use crate::model::Model;
    use crate::record::Record;
    use crate::types::PropertyId;

    fn store(capacity: usize) -> Arc<StoreState> {
        let model = Model::builder()
            .entity(EntityId(1), "Item")
            .id_property(PropertyId(1), "id")
            .build()
            .unwrap();
        let config = StoreConfig {
            async_max_queue_length: capacity,
            ..StoreConfig::default()
        };
        Arc::new(StoreState::new(1, model, config))
    }

    fn put(id: ObjectId) -> AsyncOp {
        AsyncOp::Put {
            entity: EntityId(1),
            id,
            bytes: Record::new().to_bytes().unwrap(),
            mode: PutMode::Put,
        }
    }

    #[test]
    fn puts_become_visible_after_await() {
        let store = store(16);
        let stats = Arc::new(EngineStats::new());
        for id in 1..=5 {
            store
                .queue
                .enqueue(&store, &stats, put(id), Duration::from_secs(1))
                .unwrap();
        }
        assert!(store.queue.await_submitted());
        assert!(store.queue.await_completion());
        assert_eq!(store.snapshot().objects(EntityId(1)).unwrap().len(), 5);

        store.start_closing();
        store.queue.join();
    }

    #[test]
    fn full_queue_times_out() {
        let store = store(1);
        let stats = Arc::new(EngineStats::new());
        // Hold the writer slot so the worker cannot drain.
        store.begin_write(false).unwrap();

        store
            .queue
            .enqueue(&store, &stats, put(1), Duration::from_millis(10))
            .unwrap();
        // The worker may have taken the first op already; fill until full.
        let mut rejected = None;
        for id in 2..10 {
            if let Err(e) = store
                .queue
                .enqueue(&store, &stats, put(id), Duration::from_millis(10))
            {
                rejected = Some(e);
                break;
            }
        }
        let err = rejected.unwrap();
        assert_eq!(err.code, error::TIMEOUT);
        assert!(store.queue.len() <= 1);
        assert!(stats.snapshot().async_rejected >= 1);

        store.end_write();
        assert!(store.queue.await_completion());
        store.start_closing();
        store.queue.join();
    }

    #[test]
    fn shutdown_wakes_waiters() {
        let store = store(4);
        store.queue.shutdown();
        assert!(!store.queue.await_completion());
        assert!(!store.queue.await_submitted());
        let stats = Arc::new(EngineStats::new());
        let err = store
            .queue
            .enqueue(&store, &stats, put(1), Duration::from_millis(1))
            .unwrap_err();
        assert_eq!(err.code, error::SHUTTING_DOWN);
    }
}
