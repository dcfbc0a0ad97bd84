//! Per-store state of the memory engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::engine::{ObserverFn, StoreConfig};
use crate::error::{self, NativeError, NativeResult};
use crate::memory::async_queue::AsyncQueue;
use crate::model::{property_flags, EntityModel, Model};
use crate::record::Record;
use crate::types::{EntityId, ObjectId, PutMode, RelationId};

/// A committed object: its encoded bytes plus the decoded record used for
/// query evaluation.
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub bytes: Arc<[u8]>,
    pub record: Arc<Record>,
}

/// Objects of one entity type in id order.
pub(crate) type Objects = BTreeMap<ObjectId, StoredObject>;

/// Links of one standalone relation as (source id, target id) pairs.
#[derive(Debug, Clone)]
struct Links {
    source: EntityId,
    target: EntityId,
    pairs: BTreeSet<(ObjectId, ObjectId)>,
}

/// A complete, immutable view of the store's data.
#[derive(Debug, Clone, Default)]
pub(crate) struct Data {
    entities: BTreeMap<EntityId, Objects>,
    links: BTreeMap<RelationId, Links>,
    size: u64,
}

impl Data {
    pub fn objects(&self, entity: EntityId) -> Option<&Objects> {
        self.entities.get(&entity)
    }

    pub fn object(&self, entity: EntityId, id: ObjectId) -> Option<&StoredObject> {
        self.entities.get(&entity).and_then(|o| o.get(&id))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Writes an object, enforcing the put mode and unique properties.
    ///
    /// The object id is written into the record's id property so stored
    /// bytes always carry their id.
    pub fn put(
        &mut self,
        entity: &EntityModel,
        id: ObjectId,
        bytes: &[u8],
        mode: PutMode,
    ) -> NativeResult<()> {
        if id == 0 {
            return Err(NativeError::illegal_argument("object id must not be 0"));
        }
        let id_prop = entity
            .id_property()
            .ok_or_else(|| NativeError::illegal_state(format!("{} has no id property", entity.name)))?;

        let mut record = Record::from_bytes(bytes)?;
        record.set(id_prop.id, id);
        let bytes: Arc<[u8]> = record.to_bytes()?.into();

        let objects = self.entities.entry(entity.id).or_default();
        let exists = objects.contains_key(&id);
        match mode {
            PutMode::Insert if exists => {
                return Err(NativeError::new(
                    error::ID_ALREADY_EXISTS,
                    format!("{} with id {id} already exists", entity.name),
                ));
            }
            PutMode::Update if !exists => {
                return Err(NativeError::new(
                    error::ID_NOT_FOUND,
                    format!("{} with id {id} does not exist", entity.name),
                ));
            }
            _ => {}
        }

        for prop in entity
            .properties
            .iter()
            .filter(|p| p.has_flag(property_flags::UNIQUE))
        {
            let Some(value) = record.get(prop.id) else {
                continue;
            };
            let clash = objects
                .iter()
                .any(|(other, obj)| *other != id && obj.record.get(prop.id) == Some(value));
            if clash {
                return Err(NativeError::new(
                    error::UNIQUE_VIOLATED,
                    format!("unique constraint violated on {}.{}", entity.name, prop.name),
                ));
            }
        }

        let new_len = bytes.len() as u64;
        let previous = objects.insert(
            id,
            StoredObject {
                bytes,
                record: Arc::new(record),
            },
        );
        if let Some(old) = previous {
            self.size -= old.bytes.len() as u64;
        }
        self.size += new_len;
        Ok(())
    }

    /// Removes an object and its standalone links; returns false if it did
    /// not exist.
    pub fn remove(&mut self, entity: EntityId, id: ObjectId) -> bool {
        let removed = self
            .entities
            .get_mut(&entity)
            .and_then(|objects| objects.remove(&id));
        match removed {
            Some(old) => {
                self.size -= old.bytes.len() as u64;
                self.drop_links(entity, Some(id));
                true
            }
            None => false,
        }
    }

    /// Removes all objects of an entity type and returns their count.
    pub fn remove_all(&mut self, entity: EntityId) -> u64 {
        let Some(objects) = self.entities.remove(&entity) else {
            return 0;
        };
        self.drop_links(entity, None);
        let freed: u64 = objects.values().map(|o| o.bytes.len() as u64).sum();
        self.size -= freed;
        objects.len() as u64
    }

    /// Links `source` to `target`; returns false if they were linked.
    pub fn link(
        &mut self,
        relation: RelationId,
        (source_entity, target_entity): (EntityId, EntityId),
        source: ObjectId,
        target: ObjectId,
    ) -> bool {
        self.links
            .entry(relation)
            .or_insert_with(|| Links {
                source: source_entity,
                target: target_entity,
                pairs: BTreeSet::new(),
            })
            .pairs
            .insert((source, target))
    }

    /// Unlinks `source` from `target`; returns false if they were not linked.
    pub fn unlink(&mut self, relation: RelationId, source: ObjectId, target: ObjectId) -> bool {
        self.links
            .get_mut(&relation)
            .is_some_and(|links| links.pairs.remove(&(source, target)))
    }

    /// Targets linked from `source`, ascending.
    pub fn linked_targets(
        &self,
        relation: RelationId,
        source: ObjectId,
    ) -> impl Iterator<Item = ObjectId> + '_ {
        self.links.get(&relation).into_iter().flat_map(move |links| {
            links
                .pairs
                .range((source, 0)..=(source, ObjectId::MAX))
                .map(|(_, target)| *target)
        })
    }

    /// Sources linking to `target`, ascending.
    pub fn linked_sources(
        &self,
        relation: RelationId,
        target: ObjectId,
    ) -> impl Iterator<Item = ObjectId> + '_ {
        self.links.get(&relation).into_iter().flat_map(move |links| {
            links
                .pairs
                .iter()
                .filter(move |(_, t)| *t == target)
                .map(|(source, _)| *source)
        })
    }

    /// Drops the links touching object `id` of `entity`, or every object of
    /// `entity` for `None`.
    fn drop_links(&mut self, entity: EntityId, id: Option<ObjectId>) {
        let hit = |object: ObjectId| id.map_or(true, |id| id == object);
        for links in self.links.values_mut() {
            let (from, to) = (links.source == entity, links.target == entity);
            if from || to {
                links
                    .pairs
                    .retain(|(source, target)| !((from && hit(*source)) || (to && hit(*target))));
            }
        }
    }
}

/// Shared state of one open store.
pub(crate) struct StoreState {
    pub id: u64,
    pub model: Model,
    pub config: StoreConfig,
    committed: RwLock<Arc<Data>>,
    writer_busy: Mutex<bool>,
    writer_freed: Condvar,
    sequences: Mutex<HashMap<EntityId, ObjectId>>,
    readers: AtomicU32,
    closing: AtomicBool,
    observers: RwLock<BTreeMap<u64, ObserverFn>>,
    pub queue: AsyncQueue,
}

impl std::fmt::Debug for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreState")
            .field("id", &self.id)
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

impl StoreState {
    pub fn new(id: u64, model: Model, config: StoreConfig) -> Self {
        let queue = AsyncQueue::new(config.async_max_queue_length.max(1));
        Self {
            id,
            model,
            config,
            committed: RwLock::new(Arc::new(Data::default())),
            writer_busy: Mutex::new(false),
            writer_freed: Condvar::new(),
            sequences: Mutex::new(HashMap::new()),
            readers: AtomicU32::new(0),
            closing: AtomicBool::new(false),
            observers: RwLock::new(BTreeMap::new()),
            queue,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn check_open(&self) -> NativeResult<()> {
        if self.is_closing() {
            return Err(NativeError::shutting_down("store is shutting down"));
        }
        Ok(())
    }

    /// Marks the store as closing and wakes every waiter.
    pub fn start_closing(&self) {
        self.closing.store(true, Ordering::Release);
        {
            let _busy = self.writer_busy.lock();
            self.writer_freed.notify_all();
        }
        self.queue.shutdown();
    }

    pub fn entity(&self, id: EntityId) -> NativeResult<&EntityModel> {
        self.model
            .entity(id)
            .ok_or_else(|| NativeError::illegal_argument(format!("unknown {id}")))
    }

    pub fn snapshot(&self) -> Arc<Data> {
        Arc::clone(&self.committed.read())
    }

    pub fn begin_read(&self) -> NativeResult<Arc<Data>> {
        self.check_open()?;
        let max = self.config.max_readers.max(1);
        let prev = self.readers.fetch_add(1, Ordering::AcqRel);
        if prev >= max {
            self.readers.fetch_sub(1, Ordering::AcqRel);
            return Err(NativeError::new(
                error::MAX_READERS_EXCEEDED,
                format!("maximum of {max} concurrent readers exceeded"),
            ));
        }
        Ok(self.snapshot())
    }

    pub fn end_read(&self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Acquires the single writer slot. The async worker passes
    /// `allow_closing` so it can drain its queue during shutdown.
    pub fn begin_write(&self, allow_closing: bool) -> NativeResult<Arc<Data>> {
        if !allow_closing {
            self.check_open()?;
        }
        if self.config.read_only {
            return Err(NativeError::illegal_state("store is read-only"));
        }
        let mut busy = self.writer_busy.lock();
        while *busy {
            if !allow_closing && self.is_closing() {
                return Err(NativeError::shutting_down("store is shutting down"));
            }
            self.writer_freed.wait(&mut busy);
        }
        *busy = true;
        Ok(self.snapshot())
    }

    pub fn end_write(&self) {
        *self.writer_busy.lock() = false;
        self.writer_freed.notify_one();
    }

    /// Makes `data` the committed state. Must hold the writer slot.
    pub fn publish(&self, data: Arc<Data>) -> NativeResult<()> {
        let limit = self.config.max_data_size_kb.saturating_mul(1024);
        if limit > 0 && data.size() > limit {
            return Err(NativeError::new(
                error::MAX_DATA_SIZE_EXCEEDED,
                format!(
                    "data size {} exceeds the maximum of {} KiB",
                    data.size(),
                    self.config.max_data_size_kb
                ),
            ));
        }
        *self.committed.write() = data;
        Ok(())
    }

    /// Returns the id to use for a put: the next sequence value for 0,
    /// otherwise `requested` (advancing the sequence past it).
    pub fn next_id(&self, entity: EntityId, requested: ObjectId) -> ObjectId {
        let mut sequences = self.sequences.lock();
        let last = sequences.entry(entity).or_insert(0);
        if requested == 0 {
            *last += 1;
            *last
        } else {
            *last = (*last).max(requested);
            requested
        }
    }

    pub fn add_observer(&self, token: u64, callback: ObserverFn) {
        self.observers.write().insert(token, callback);
    }

    /// Removes an observer. A notification already running keeps its own
    /// reference to the callback until it returns.
    pub fn remove_observer(&self, token: u64) -> bool {
        self.observers.write().remove(&token).is_some()
    }

    pub fn notify(&self, changed: &BTreeSet<EntityId>) {
        if changed.is_empty() {
            return;
        }
        let ids: Vec<EntityId> = changed.iter().copied().collect();
        // Callbacks may register or remove observers themselves.
        let callbacks: Vec<ObserverFn> = self.observers.read().values().cloned().collect();
        for callback in callbacks {
            callback(&ids);
        }
    }
}
