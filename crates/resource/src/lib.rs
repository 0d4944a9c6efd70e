//! # Trellis Resource Runtime
//!
//! A live graph of domain resources with capability-scoped access,
//! relational persistence and a managed lifecycle.
//!
//! - [`graph`]: the arena of live resources, with references kept consistent
//!   on both sides of every edge.
//! - [`proxy`]: the type controller handing out capability views
//!   ([`Proxy`]) that wrap resource values crossing the boundary.
//! - [`relation`]: the linker translating between references and persisted
//!   relation records.
//! - [`manager`]: lifecycle, persistence and change notification.

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod id;
pub mod initializer;
pub mod lifecycle;
pub mod manager;
pub mod persistence;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod relation;
pub mod resource;
pub mod value;

pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use events::{EventBus, ResourceEvent};
pub use graph::{CollectionChange, GraphObserver, ObserverId, ResourceGraph};
pub use id::{CapabilityId, RelationId, ResourceId, ResourceKey, SlotName, TypeTag};
pub use initializer::{InitializerContext, InitializerParameters, ResourceInitializer};
pub use lifecycle::Lifecycle;
pub use manager::ResourceManager;
pub use persistence::{
    MemoryStore, ResourceEntity, ResourceStore, StoreError, StoreResult, StoreStats, UnitOfWork,
};
pub use proxy::{Proxy, ProxyEvent, ProxyShape, Subscription, TypeController};
pub use reference::{Cardinality, ReferenceSlot, References, SlotValue};
pub use registry::{CapabilityDecl, ResourceType, TypeRegistry};
pub use relation::{
    LinkReport, RelationDiff, RelationKind, RelationLinker, RelationRecord, RelationRole,
};
pub use resource::{Resource, ResourceContext, ResourceCore};
pub use value::Value;

/// Common imports for defining resource types and driving a manager.
pub mod prelude {
    pub use crate::config::ManagerConfig;
    pub use crate::error::{Error, Result};
    pub use crate::events::ResourceEvent;
    pub use crate::id::{ResourceId, ResourceKey};
    pub use crate::initializer::{InitializerContext, ResourceInitializer};
    pub use crate::lifecycle::Lifecycle;
    pub use crate::manager::ResourceManager;
    pub use crate::proxy::Proxy;
    pub use crate::reference::ReferenceSlot;
    pub use crate::registry::{CapabilityDecl, ResourceType, TypeRegistry};
    pub use crate::relation::RelationKind;
    pub use crate::resource::{Resource, ResourceContext};
    pub use crate::value::Value;
}
