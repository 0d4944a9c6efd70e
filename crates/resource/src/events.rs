//! Event broadcasting for resource lifecycle and change notifications.
//!
//! Provides [`ResourceEvent`] variants emitted by the
//! [`ResourceManager`](crate::manager::ResourceManager) and an [`EventBus`]
//! backed by `tokio::sync::broadcast`.

use tokio::sync::broadcast;

use crate::id::{ResourceId, SlotName, TypeTag};

// ---------------------------------------------------------------------------
// ResourceEvent
// ---------------------------------------------------------------------------

/// Events emitted by the resource manager.
///
/// Subscribers receive cloned copies via [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// An already persisted resource was saved again.
    ///
    /// Never emitted for the first save of a new resource.
    Changed {
        /// The resource identifier.
        resource_id: ResourceId,
        /// Its concrete type.
        type_tag: TypeTag,
    },
    /// The `initialize` hook of a resource completed.
    Initialized {
        /// The resource identifier.
        resource_id: ResourceId,
    },
    /// The `start` hook of a resource completed.
    Started {
        /// The resource identifier.
        resource_id: ResourceId,
    },
    /// The `stop` hook of a resource completed.
    Stopped {
        /// The resource identifier.
        resource_id: ResourceId,
    },
    /// A resource was removed from the graph.
    Destroyed {
        /// The resource identifier.
        resource_id: ResourceId,
        /// Whether its entity row was deleted rather than stamped.
        permanent: bool,
    },
    /// An auto-save collection was persisted.
    CollectionPersisted {
        /// The owning resource.
        resource_id: ResourceId,
        /// The collection slot.
        slot: SlotName,
    },
    /// A background operation failed.
    Error {
        /// The resource identifier.
        resource_id: ResourceId,
        /// Human-readable error description.
        error: String,
    },
}

impl ResourceEvent {
    /// The resource the event is about.
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        match self {
            Self::Changed { resource_id, .. }
            | Self::Initialized { resource_id }
            | Self::Started { resource_id }
            | Self::Stopped { resource_id }
            | Self::Destroyed { resource_id, .. }
            | Self::CollectionPersisted { resource_id, .. }
            | Self::Error { resource_id, .. } => *resource_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Fan-out of [`ResourceEvent`]s to every interested party.
///
/// Delivery is best effort. The manager never waits on a listener, and a
/// listener that lets more than `capacity` events pile up loses the oldest
/// ones (its next `recv` reports `Lagged`).
pub struct EventBus {
    sender: broadcast::Sender<ResourceEvent>,
    capacity: usize,
}

impl EventBus {
    /// A bus retaining up to `capacity` undelivered events per listener.
    ///
    /// `capacity` must be non-zero; [`ManagerConfig::validate`] enforces it
    /// for the `event_buffer` setting.
    ///
    /// [`ManagerConfig::validate`]: crate::config::ManagerConfig::validate
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn emit(&self, event: ResourceEvent) {
        let delivered = self.sender.send(event).unwrap_or(0);
        tracing::trace!(listeners = delivered, "resource event emitted");
    }

    /// A listener that sees every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.sender.subscribe()
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_BUFFER)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("listeners", &self.listeners())
            .finish()
    }
}
