//! Persistence contracts consumed by the manager.
//!
//! Storage is reached only through a [`UnitOfWork`]: one transaction per
//! `save`, `destroy` or load. Dropping a unit of work without calling
//! [`UnitOfWork::commit`] discards everything it did.

mod memory;

pub use memory::{MemoryStore, StoreStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{RelationId, ResourceId, TypeTag};
use crate::relation::RelationRecord;

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("entity {0} does not exist")]
    MissingEntity(ResourceId),

    #[error("relation {0} does not exist")]
    MissingRelation(RelationId),

    /// Concurrent modification detected by the backend.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The backend cannot be reached right now.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Any other backend specific failure.
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Transient failures; the same call may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Unavailable(_))
    }
}

/// Persisted form of a resource's core fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntity {
    /// Assigned by the store on creation.
    pub id: ResourceId,
    pub type_tag: TypeTag,
    pub name: String,
    pub description: String,
    /// State outside the core schema, produced by `Resource::save_state`.
    pub extension_data: serde_json::Value,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Set by a soft delete.
    pub deleted: Option<DateTime<Utc>>,
}

impl ResourceEntity {
    /// A fresh, not yet stored entity.
    pub fn new(type_tag: impl Into<TypeTag>) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::TRANSIENT,
            type_tag: type_tag.into(),
            name: String::new(),
            description: String::new(),
            extension_data: serde_json::Value::Null,
            created: now,
            updated: now,
            deleted: None,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

/// Source of units of work.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// One storage transaction.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Every entity that is not soft-deleted.
    async fn load_entities(&mut self) -> StoreResult<Vec<ResourceEntity>>;

    /// Every relation record.
    async fn load_relations(&mut self) -> StoreResult<Vec<RelationRecord>>;

    /// An entity by id, soft-deleted ones included.
    async fn fetch_entity(&mut self, id: ResourceId) -> StoreResult<Option<ResourceEntity>>;

    /// Store a new entity and return the id the store assigned.
    async fn create_entity(&mut self, entity: &ResourceEntity) -> StoreResult<ResourceId>;

    async fn update_entity(&mut self, entity: &ResourceEntity) -> StoreResult<()>;

    /// Stamp the entity's deletion time, keeping the row.
    async fn soft_delete_entity(&mut self, id: ResourceId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Remove the entity row.
    async fn hard_delete_entity(&mut self, id: ResourceId) -> StoreResult<()>;

    /// Records where `id` is the source or the target.
    async fn relations_of(&mut self, id: ResourceId) -> StoreResult<Vec<RelationRecord>>;

    /// Store a new record and return the id the store assigned.
    async fn create_relation(&mut self, record: &RelationRecord) -> StoreResult<RelationId>;

    async fn update_relation(&mut self, record: &RelationRecord) -> StoreResult<()>;

    async fn remove_relation(&mut self, id: RelationId) -> StoreResult<()>;

    /// Make every change of this unit of work durable.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::Conflict("row version".into()).is_retryable());
        assert!(StoreError::Unavailable("timeout".into()).is_retryable());
        assert!(!StoreError::MissingEntity(ResourceId::new(1)).is_retryable());
    }

    #[test]
    fn entity_roundtrips_through_json() {
        let mut entity = ResourceEntity::new("Cell");
        entity.id = ResourceId::new(12);
        entity.extension_data = serde_json::json!({ "speed": 3 });
        let json = serde_json::to_string(&entity).unwrap();
        let back: ResourceEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);
        assert!(!back.is_deleted());
    }
}
