//! In-memory [`ResourceStore`] with call statistics.
//!
//! Each unit of work edits a private copy of the tables and records its
//! writes; `commit` replays them onto the shared tables. Dropping the unit of
//! work throws the copy away. Every call is counted, committed or not, so
//! tests can assert that an operation issued no writes at all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ResourceEntity, ResourceStore, StoreError, StoreResult, UnitOfWork};
use crate::id::{RelationId, ResourceId};
use crate::relation::RelationRecord;

/// Snapshot of the calls a [`MemoryStore`] received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub begins: u64,
    pub commits: u64,
    pub entities_created: u64,
    pub entities_updated: u64,
    pub entities_soft_deleted: u64,
    pub entities_hard_deleted: u64,
    pub relations_created: u64,
    pub relations_updated: u64,
    pub relations_removed: u64,
}

impl StoreStats {
    /// Total number of write calls.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.entities_created
            + self.entities_updated
            + self.entities_soft_deleted
            + self.entities_hard_deleted
            + self.relations_created
            + self.relations_updated
            + self.relations_removed
    }

    /// Relation write calls only.
    #[must_use]
    pub fn relation_writes(&self) -> u64 {
        self.relations_created + self.relations_updated + self.relations_removed
    }
}

#[derive(Debug, Default)]
struct Counters {
    begins: AtomicU64,
    commits: AtomicU64,
    entities_created: AtomicU64,
    entities_updated: AtomicU64,
    entities_soft_deleted: AtomicU64,
    entities_hard_deleted: AtomicU64,
    relations_created: AtomicU64,
    relations_updated: AtomicU64,
    relations_removed: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Default)]
struct Tables {
    entities: BTreeMap<ResourceId, ResourceEntity>,
    relations: BTreeMap<RelationId, RelationRecord>,
}

#[derive(Debug)]
enum Op {
    PutEntity(ResourceEntity),
    DropEntity(ResourceId),
    PutRelation(RelationRecord),
    DropRelation(RelationId),
}

#[derive(Debug)]
struct Shared {
    tables: Mutex<Tables>,
    next_entity: AtomicU64,
    next_relation: AtomicU64,
    counters: Counters,
    unavailable: AtomicBool,
    reject_commits: AtomicBool,
}

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                next_entity: AtomicU64::new(1),
                next_relation: AtomicU64::new(1),
                counters: Counters::default(),
                unavailable: AtomicBool::new(false),
                reject_commits: AtomicBool::new(false),
            }),
        }
    }

    /// Current call statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let c = &self.shared.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StoreStats {
            begins: load(&c.begins),
            commits: load(&c.commits),
            entities_created: load(&c.entities_created),
            entities_updated: load(&c.entities_updated),
            entities_soft_deleted: load(&c.entities_soft_deleted),
            entities_hard_deleted: load(&c.entities_hard_deleted),
            relations_created: load(&c.relations_created),
            relations_updated: load(&c.relations_updated),
            relations_removed: load(&c.relations_removed),
        }
    }

    /// A committed entity, soft-deleted ones included.
    #[must_use]
    pub fn entity(&self, id: ResourceId) -> Option<ResourceEntity> {
        self.shared.tables.lock().entities.get(&id).cloned()
    }

    /// Number of committed entity rows, soft-deleted ones included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.shared.tables.lock().entities.len()
    }

    /// All committed relation records, ordered by id.
    #[must_use]
    pub fn relations(&self) -> Vec<RelationRecord> {
        self.shared.tables.lock().relations.values().cloned().collect()
    }

    /// Insert an entity directly, bypassing statistics. Assigns an id when
    /// the entity has none.
    pub fn seed_entity(&self, mut entity: ResourceEntity) -> ResourceId {
        if entity.id.is_transient() {
            entity.id = ResourceId::new(self.shared.next_entity.fetch_add(1, Ordering::Relaxed));
        } else {
            self.shared
                .next_entity
                .fetch_max(entity.id.get() + 1, Ordering::Relaxed);
        }
        let id = entity.id;
        self.shared.tables.lock().entities.insert(id, entity);
        id
    }

    /// Insert a relation record directly, bypassing statistics.
    pub fn seed_relation(&self, mut record: RelationRecord) -> RelationId {
        if record.id == RelationId::UNSAVED {
            record.id = RelationId::new(self.shared.next_relation.fetch_add(1, Ordering::Relaxed));
        } else {
            self.shared
                .next_relation
                .fetch_max(record.id.get() + 1, Ordering::Relaxed);
        }
        let id = record.id;
        self.shared.tables.lock().relations.insert(id, record);
        id
    }

    /// Make `begin` fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Make `commit` fail with [`StoreError::Unavailable`].
    pub fn set_reject_commits(&self, reject: bool) {
        self.shared.reject_commits.store(reject, Ordering::Relaxed);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        bump(&self.shared.counters.begins);
        if self.shared.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        let working = self.shared.tables.lock().clone();
        Ok(Box::new(MemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            working,
            log: Vec::new(),
        }))
    }
}

struct MemoryUnitOfWork {
    shared: Arc<Shared>,
    working: Tables,
    log: Vec<Op>,
}

impl MemoryUnitOfWork {
    fn put_entity(&mut self, entity: ResourceEntity) {
        self.working.entities.insert(entity.id, entity.clone());
        self.log.push(Op::PutEntity(entity));
    }

    fn put_relation(&mut self, record: RelationRecord) {
        self.working.relations.insert(record.id, record.clone());
        self.log.push(Op::PutRelation(record));
    }

    fn existing_entity(&self, id: ResourceId) -> StoreResult<ResourceEntity> {
        self.working
            .entities
            .get(&id)
            .cloned()
            .ok_or(StoreError::MissingEntity(id))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn load_entities(&mut self) -> StoreResult<Vec<ResourceEntity>> {
        Ok(self
            .working
            .entities
            .values()
            .filter(|entity| !entity.is_deleted())
            .cloned()
            .collect())
    }

    async fn load_relations(&mut self) -> StoreResult<Vec<RelationRecord>> {
        Ok(self.working.relations.values().cloned().collect())
    }

    async fn fetch_entity(&mut self, id: ResourceId) -> StoreResult<Option<ResourceEntity>> {
        Ok(self.working.entities.get(&id).cloned())
    }

    async fn create_entity(&mut self, entity: &ResourceEntity) -> StoreResult<ResourceId> {
        bump(&self.shared.counters.entities_created);
        let id = ResourceId::new(self.shared.next_entity.fetch_add(1, Ordering::Relaxed));
        let mut stored = entity.clone();
        stored.id = id;
        self.put_entity(stored);
        Ok(id)
    }

    async fn update_entity(&mut self, entity: &ResourceEntity) -> StoreResult<()> {
        bump(&self.shared.counters.entities_updated);
        let existing = self.existing_entity(entity.id)?;
        let mut stored = entity.clone();
        stored.created = existing.created;
        stored.deleted = existing.deleted;
        self.put_entity(stored);
        Ok(())
    }

    async fn soft_delete_entity(&mut self, id: ResourceId, at: DateTime<Utc>) -> StoreResult<()> {
        bump(&self.shared.counters.entities_soft_deleted);
        let mut entity = self.existing_entity(id)?;
        entity.deleted = Some(at);
        entity.updated = at;
        self.put_entity(entity);
        Ok(())
    }

    async fn hard_delete_entity(&mut self, id: ResourceId) -> StoreResult<()> {
        bump(&self.shared.counters.entities_hard_deleted);
        self.working
            .entities
            .remove(&id)
            .ok_or(StoreError::MissingEntity(id))?;
        self.log.push(Op::DropEntity(id));
        Ok(())
    }

    async fn relations_of(&mut self, id: ResourceId) -> StoreResult<Vec<RelationRecord>> {
        Ok(self
            .working
            .relations
            .values()
            .filter(|record| record.role_of(id).is_some())
            .cloned()
            .collect())
    }

    async fn create_relation(&mut self, record: &RelationRecord) -> StoreResult<RelationId> {
        bump(&self.shared.counters.relations_created);
        let id = RelationId::new(self.shared.next_relation.fetch_add(1, Ordering::Relaxed));
        self.put_relation(record.clone().with_id(id));
        Ok(id)
    }

    async fn update_relation(&mut self, record: &RelationRecord) -> StoreResult<()> {
        bump(&self.shared.counters.relations_updated);
        if !self.working.relations.contains_key(&record.id) {
            return Err(StoreError::MissingRelation(record.id));
        }
        self.put_relation(record.clone());
        Ok(())
    }

    async fn remove_relation(&mut self, id: RelationId) -> StoreResult<()> {
        bump(&self.shared.counters.relations_removed);
        self.working
            .relations
            .remove(&id)
            .ok_or(StoreError::MissingRelation(id))?;
        self.log.push(Op::DropRelation(id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        bump(&this.shared.counters.commits);
        if this.shared.reject_commits.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("commit rejected".into()));
        }
        let mut tables = this.shared.tables.lock();
        for op in this.log {
            match op {
                Op::PutEntity(entity) => {
                    tables.entities.insert(entity.id, entity);
                }
                Op::DropEntity(id) => {
                    tables.entities.remove(&id);
                }
                Op::PutRelation(record) => {
                    tables.relations.insert(record.id, record);
                }
                Op::DropRelation(id) => {
                    tables.relations.remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::RelationKind;

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let a = uow.create_entity(&ResourceEntity::new("Area")).await.unwrap();
        let b = uow.create_entity(&ResourceEntity::new("Cell")).await.unwrap();
        uow.create_relation(&RelationRecord::new(a, b, RelationKind::ParentChild))
            .await
            .unwrap();
        assert!(store.entity(a).is_none(), "not visible before commit");
        uow.commit().await.unwrap();

        assert!(store.entity(a).is_some());
        assert_eq!(store.relations().len(), 1);
        let stats = store.stats();
        assert_eq!(stats.entities_created, 2);
        assert_eq!(stats.relations_created, 1);
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.writes(), 3);
    }

    #[tokio::test]
    async fn dropping_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.create_entity(&ResourceEntity::new("Area")).await.unwrap();
        }
        assert_eq!(store.entity_count(), 0);
        assert_eq!(store.stats().entities_created, 1);
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_not_loaded() {
        let store = MemoryStore::new();
        let id = store.seed_entity(ResourceEntity::new("Area"));
        let mut uow = store.begin().await.unwrap();
        uow.soft_delete_entity(id, Utc::now()).await.unwrap();
        uow.commit().await.unwrap();

        assert!(store.entity(id).is_some_and(|e| e.is_deleted()));
        let mut uow = store.begin().await.unwrap();
        assert!(uow.load_entities().await.unwrap().is_empty());
        assert!(uow.fetch_entity(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_rows_are_reported() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        assert!(matches!(
            uow.hard_delete_entity(ResourceId::new(4)).await,
            Err(StoreError::MissingEntity(_))
        ));
        assert!(matches!(
            uow.remove_relation(RelationId::new(4)).await,
            Err(StoreError::MissingRelation(_))
        ));
    }

    #[tokio::test]
    async fn switches_simulate_outages() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.begin().await.is_err());
        store.set_unavailable(false);

        store.set_reject_commits(true);
        let mut uow = store.begin().await.unwrap();
        uow.create_entity(&ResourceEntity::new("Area")).await.unwrap();
        let err = uow.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn seeding_advances_id_counters() {
        let store = MemoryStore::new();
        let mut entity = ResourceEntity::new("Area");
        entity.id = ResourceId::new(10);
        store.seed_entity(entity);
        assert_eq!(store.seed_entity(ResourceEntity::new("Area")), ResourceId::new(11));
    }
}
